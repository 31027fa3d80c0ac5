use std::sync::Mutex;

/// Thread-safe Lamport logical clock.
///
/// Heartbeat RPCs are deliberately excluded from the happens-before graph:
/// they must never call `tick` or `observe`, only `read`. Mixing liveness
/// probes into the clock would inflate timestamps attached to user
/// messages and break human-legible ordering.
pub struct LamportClock {
    value: Mutex<u64>,
}

impl LamportClock {
    pub fn new() -> Self {
        LamportClock { value: Mutex::new(0) }
    }

    /// Current value, without advancing it.
    pub fn read(&self) -> u64 {
        *self.value.lock().unwrap()
    }

    /// Increment by one and return the new value. Used before emitting a
    /// local event.
    pub fn tick(&self) -> u64 {
        let mut guard = self.value.lock().unwrap();
        *guard += 1;
        *guard
    }

    /// Set to `max(local, remote) + 1` and return the new value. Used on
    /// every receipt of a logical event.
    pub fn observe(&self, remote: u64) -> u64 {
        let mut guard = self.value.lock().unwrap();
        *guard = std::cmp::max(*guard, remote) + 1;
        *guard
    }
}

impl Default for LamportClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_strictly_increasing() {
        let clock = LamportClock::new();
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
    }

    #[test]
    fn observe_exceeds_both_local_and_remote() {
        let clock = LamportClock::new();
        clock.tick(); // value = 1
        let observed = clock.observe(5);
        assert!(observed > 5);
        assert!(observed > 1);
        assert_eq!(observed, 6);
    }

    #[test]
    fn observe_takes_local_when_larger() {
        let clock = LamportClock::new();
        for _ in 0..10 {
            clock.tick();
        }
        let observed = clock.observe(2);
        assert_eq!(observed, 11);
    }

    #[test]
    fn read_does_not_advance() {
        let clock = LamportClock::new();
        clock.tick();
        let before = clock.read();
        let after = clock.read();
        assert_eq!(before, after);
    }
}
