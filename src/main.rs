use structopt::StructOpt;

use bullychat::bootstrap::{Opt, Supervisor};
use bullychat::Result;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();
    Supervisor::run(opt).await
}
