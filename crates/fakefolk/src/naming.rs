use rand::Rng;

use crate::error::{ConfigError, EngineError};
use crate::registry::IdentityRegistry;

/// Candidate names for identities created without an explicit one.
#[derive(Debug, Clone)]
pub struct NamingPool {
    names: Vec<String>,
}

impl NamingPool {
    /// Build the pool, refusing one that could starve `max_identities` creations.
    pub fn new(names: Vec<String>, max_identities: usize) -> Result<Self, ConfigError> {
        let mut seen = std::collections::HashSet::new();
        let mut uniq = Vec::with_capacity(names.len());
        for n in names {
            let n = n.trim().to_string();
            if !folkproto::is_valid_name(&n) {
                return Err(ConfigError::BadPoolName(n));
            }
            if seen.insert(n.clone()) {
                uniq.push(n);
            }
        }
        if uniq.len() < max_identities {
            return Err(ConfigError::NamePoolTooSmall {
                names: uniq.len(),
                max: max_identities,
            });
        }
        Ok(Self { names: uniq })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Draw uniformly from the pool, skipping names already in the raw tier.
    pub fn next_unused_name(&self, registry: &IdentityRegistry) -> Result<String, EngineError> {
        // Bail before the rejection loop if it could never terminate.
        if !self.names.iter().any(|n| !registry.contains_name(n)) {
            return Err(EngineError::NamesExhausted);
        }
        let mut rng = rand::thread_rng();
        loop {
            let name = &self.names[rng.gen_range(0..self.names.len())];
            if !registry.contains_name(name) {
                return Ok(name.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{CorrelationKey, IdentityId};

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pool_smaller_than_capacity_is_fatal() {
        let err = NamingPool::new(names(&["a", "b"]), 3).unwrap_err();
        assert!(matches!(err, ConfigError::NamePoolTooSmall { names: 2, max: 3 }));

        // Duplicates do not count twice.
        let err = NamingPool::new(names(&["a", "a", "b"]), 3).unwrap_err();
        assert!(matches!(err, ConfigError::NamePoolTooSmall { names: 2, max: 3 }));
    }

    #[test]
    fn pool_rejects_names_the_host_would_refuse() {
        let err = NamingPool::new(names(&["ok", "not ok"]), 1).unwrap_err();
        assert!(matches!(err, ConfigError::BadPoolName(n) if n == "not ok"));
    }

    #[test]
    fn draws_skip_names_in_use() {
        let pool = NamingPool::new(names(&["a", "b", "c"]), 3).unwrap();
        let mut reg = IdentityRegistry::new();
        for n in ["a", "c"] {
            reg.insert_raw(n, IdentityId::derive(n), CorrelationKey(u128::from(n.as_bytes()[0])));
        }
        for _ in 0..50 {
            assert_eq!(pool.next_unused_name(&reg).unwrap(), "b");
        }
        reg.insert_raw("b", IdentityId::derive("b"), CorrelationKey(99));
        assert_eq!(pool.next_unused_name(&reg), Err(EngineError::NamesExhausted));
    }

    #[test]
    fn draws_cover_the_pool() {
        let pool = NamingPool::new(names(&["a", "b", "c", "d"]), 1).unwrap();
        let reg = IdentityRegistry::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(pool.next_unused_name(&reg).unwrap());
        }
        assert_eq!(seen.len(), 4);
    }
}
