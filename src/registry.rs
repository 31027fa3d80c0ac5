use std::collections::HashMap;

pub type ServerId = u32;

/// Opaque network endpoint, host:port form for the reference transport.
pub type PeerAddress = String;

/// Immutable mapping from `ServerId` to `PeerAddress`, established at
/// startup. Parsing of the `id:host:port,...` startup string belongs to the
/// bootstrap collaborator (see `bootstrap::parse_peers`), not to this
/// component.
///
/// `self_address` lets `GetLeader` answer with this replica's own address
/// when it is the leader, without the peer map (which excludes self)
/// growing a special case for it.
pub struct PeerRegistry {
    self_id: ServerId,
    self_address: PeerAddress,
    peers: HashMap<ServerId, PeerAddress>,
}

impl PeerRegistry {
    /// `peers` must already exclude `self_id`.
    pub fn new(self_id: ServerId, self_address: PeerAddress, peers: HashMap<ServerId, PeerAddress>) -> Self {
        PeerRegistry { self_id, self_address, peers }
    }

    pub fn self_id(&self) -> ServerId {
        self.self_id
    }

    pub fn self_address(&self) -> &PeerAddress {
        &self.self_address
    }

    /// Address of `id`, including `self_id` (resolved to `self_address`).
    pub fn address_of(&self, id: ServerId) -> Option<&PeerAddress> {
        if id == self.self_id {
            Some(&self.self_address)
        } else {
            self.peers.get(&id)
        }
    }

    /// All peers excluding self.
    pub fn peer_ids(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.peers.keys().copied()
    }

    /// Peers with a strictly higher id than self — the set an election
    /// must challenge.
    pub fn higher_ids(&self) -> Vec<ServerId> {
        let mut ids: Vec<ServerId> = self.peers.keys().copied().filter(|&id| id > self.self_id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
