use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::CorrelationError;
use crate::ident::{CorrelationKey, IdentityId};

/// Pending login correlations: `key -> identity`.
///
/// Shared between the engine (which inserts keys when a session starts
/// dialing) and the host's authentication path (which consumes them). Every
/// operation is safe from any thread without outside locking; `resolve` hands a
/// given key's identity to at most one caller.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    pending: DashMap<CorrelationKey, IdentityId>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh key. Fails if the key is already pending.
    pub fn put(&self, key: CorrelationKey, id: IdentityId) -> Result<(), CorrelationError> {
        match self.pending.entry(key) {
            Entry::Occupied(_) => Err(CorrelationError::KeyCollision),
            Entry::Vacant(v) => {
                v.insert(id);
                Ok(())
            }
        }
    }

    /// Atomically remove and return the identity pending under `key`.
    pub fn resolve(&self, key: CorrelationKey) -> Option<IdentityId> {
        self.pending.remove(&key).map(|(_, id)| id)
    }

    /// Void a key without resolving it. Returns whether it was still pending.
    pub fn expire(&self, key: CorrelationKey) -> bool {
        self.pending.remove(&key).is_some()
    }

    pub fn contains(&self, key: CorrelationKey) -> bool {
        self.pending.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn resolve_is_one_shot() {
        let s = CorrelationStore::new();
        let k = CorrelationKey(1);
        let a = IdentityId::derive("a");
        s.put(k, a).unwrap();
        assert_eq!(s.resolve(k), Some(a));
        assert_eq!(s.resolve(k), None);
        assert!(s.is_empty());
    }

    #[test]
    fn put_rejects_live_duplicate_key() {
        let s = CorrelationStore::new();
        let k = CorrelationKey(9);
        s.put(k, IdentityId::derive("a")).unwrap();
        assert_eq!(
            s.put(k, IdentityId::derive("b")),
            Err(CorrelationError::KeyCollision)
        );
        // The original mapping survives the failed put.
        assert_eq!(s.resolve(k), Some(IdentityId::derive("a")));
        // Once consumed, the key may be reused.
        s.put(k, IdentityId::derive("b")).unwrap();
    }

    #[test]
    fn expire_voids_without_returning() {
        let s = CorrelationStore::new();
        let k = CorrelationKey(3);
        s.put(k, IdentityId::derive("a")).unwrap();
        assert!(s.expire(k));
        assert!(!s.expire(k));
        assert_eq!(s.resolve(k), None);
    }

    #[test]
    fn racing_resolvers_on_one_key_yield_one_winner() {
        const THREADS: usize = 16;
        for round in 0..50u128 {
            let s = Arc::new(CorrelationStore::new());
            let k = CorrelationKey(round);
            let id = IdentityId::derive("contended");
            s.put(k, id).unwrap();

            let barrier = Arc::new(Barrier::new(THREADS));
            let handles = (0..THREADS)
                .map(|_| {
                    let s = s.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        s.resolve(k)
                    })
                })
                .collect::<Vec<_>>();
            let wins = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect::<Vec<_>>();
            assert_eq!(wins, vec![id]);
        }
    }

    #[test]
    fn distinct_keys_resolve_to_their_own_identity() {
        const THREADS: usize = 32;
        let s = Arc::new(CorrelationStore::new());
        let mut expected = Vec::new();
        for i in 0..THREADS {
            let id = IdentityId::derive(&format!("bot{i}"));
            let k = CorrelationKey::mint().unwrap();
            s.put(k, id).unwrap();
            expected.push((k, id));
        }

        let barrier = Arc::new(Barrier::new(THREADS));
        let handles = expected
            .iter()
            .copied()
            .map(|(k, id)| {
                let s = s.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    (id, s.resolve(k))
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            let (want, got) = h.join().unwrap();
            assert_eq!(got, Some(want));
        }
        assert!(s.is_empty());
    }
}
