//! Logical identifiers for operations and replicas.
//!
//! Every operation unit a replica produces is addressed by an [`Id`]: the
//! replica's client id plus a per-replica sequence counter (the clock).
//! Origin references, state vectors, delete sets, and the concurrency
//! tie-break all speak in these ids, never in memory addresses, which keeps
//! the operation graph serializable and merge-friendly.

use rand::Rng;

/// Replica identifier.
pub type ClientId = u64;

/// Generates a random client id for a new document.
///
/// Locally generated ids stay inside the 32-bit range so they encode as
/// short varints; ids up to the full `u64` range are accepted from peers
/// and from [`crate::DocOptions`].
pub fn generate_client_id() -> ClientId {
    let mut rng = rand::thread_rng();
    rng.gen_range(1..=u32::MAX as u64)
}

/// Position of one operation unit in a replica's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    pub client: ClientId,
    pub clock: u64,
}

impl Id {
    pub fn new(client: ClientId, clock: u64) -> Self {
        Self { client, clock }
    }

    /// The id `len` units further along the same client's log.
    pub(crate) fn advance(self, len: u64) -> Self {
        Self {
            client: self.client,
            clock: self.clock + len,
        }
    }

}

/// A contiguous run of operation units from one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpan {
    pub client: ClientId,
    pub clock: u64,
    pub len: u64,
}

impl IdSpan {
    pub fn new(client: ClientId, clock: u64, len: u64) -> Self {
        debug_assert!(len > 0);
        Self { client, clock, len }
    }

    pub fn first(&self) -> Id {
        Id::new(self.client, self.clock)
    }

    pub fn last(&self) -> Id {
        Id::new(self.client, self.clock + self.len - 1)
    }

    pub fn end(&self) -> u64 {
        self.clock + self.len
    }

    pub fn contains(&self, id: Id) -> bool {
        id.client == self.client && id.clock >= self.clock && id.clock < self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_fit_in_32_bits() {
        for _ in 0..64 {
            let id = generate_client_id();
            assert!(id >= 1 && id <= u32::MAX as u64);
        }
    }

    #[test]
    fn tie_break_is_client_then_clock() {
        assert!(Id::new(1, 9) < Id::new(2, 0));
        assert!(Id::new(3, 4) < Id::new(3, 5));
    }

    #[test]
    fn span_bounds() {
        let span = IdSpan::new(7, 10, 3);
        assert_eq!(span.first(), Id::new(7, 10));
        assert_eq!(span.last(), Id::new(7, 12));
        assert!(span.contains(Id::new(7, 12)));
        assert!(!span.contains(Id::new(7, 13)));
        assert!(!span.contains(Id::new(8, 10)));
    }
}
