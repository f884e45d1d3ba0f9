use std::collections::{BTreeMap, HashMap};

use crate::ident::{CorrelationKey, HostEntityRef, IdentityId};

/// Where an identity is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Connecting,
    AwaitingPromotion,
    Active,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Connecting => "connecting",
            LifecycleState::AwaitingPromotion => "awaiting_promotion",
            LifecycleState::Active => "active",
        }
    }

    fn rank(self) -> u8 {
        match self {
            LifecycleState::Created => 0,
            LifecycleState::Connecting => 1,
            LifecycleState::AwaitingPromotion => 2,
            LifecycleState::Active => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub name: String,
    pub id: IdentityId,
    pub key: CorrelationKey,
    /// Set only once the identity is active.
    pub host_ref: Option<HostEntityRef>,
    pub state: LifecycleState,
    pub created_seq: u64,
}

/// Bookkeeping for every live identity.
///
/// Two tiers, each indexed by name and by id:
/// - raw: every identity from creation until removal,
/// - active: identities whose world join was observed and onboarded.
///
/// Active membership is always a subset of raw membership. Removed identities
/// are purged entirely; there is no tombstone.
///
/// Mutation belongs to the engine task only.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    raw: HashMap<IdentityId, IdentityRecord>,
    raw_by_name: HashMap<String, IdentityId>,
    active: HashMap<IdentityId, HostEntityRef>,
    active_by_name: HashMap<String, IdentityId>,
    by_seq: BTreeMap<u64, IdentityId>,
    next_seq: u64,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly created identity to the raw tier.
    ///
    /// Returns `false` (and changes nothing) if the name or id is already present.
    pub fn insert_raw(&mut self, name: &str, id: IdentityId, key: CorrelationKey) -> bool {
        if self.raw.contains_key(&id) || self.raw_by_name.contains_key(name) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.raw.insert(
            id,
            IdentityRecord {
                name: name.to_string(),
                id,
                key,
                host_ref: None,
                state: LifecycleState::Created,
                created_seq: seq,
            },
        );
        self.raw_by_name.insert(name.to_string(), id);
        self.by_seq.insert(seq, id);
        true
    }

    /// Move a pre-active identity forward (`Created -> Connecting -> AwaitingPromotion`).
    ///
    /// Transitions only go forward and never reach `Active`; use `promote_to_active`.
    pub fn advance(&mut self, id: IdentityId, to: LifecycleState) -> bool {
        if to == LifecycleState::Active {
            return false;
        }
        match self.raw.get_mut(&id) {
            Some(rec) if rec.state.rank() < to.rank() => {
                rec.state = to;
                true
            }
            _ => false,
        }
    }

    /// Add an authenticated identity to the active tier. Returns `false` unless
    /// it is in `AwaitingPromotion`.
    pub fn promote_to_active(&mut self, id: IdentityId, host_ref: HostEntityRef) -> bool {
        let Some(rec) = self.raw.get_mut(&id) else {
            return false;
        };
        if rec.state != LifecycleState::AwaitingPromotion {
            return false;
        }
        rec.state = LifecycleState::Active;
        rec.host_ref = Some(host_ref);
        self.active.insert(id, host_ref);
        self.active_by_name.insert(rec.name.clone(), id);
        true
    }

    /// Purge an identity from every index and return its final record.
    pub fn remove_everywhere(&mut self, id: IdentityId) -> Option<IdentityRecord> {
        let rec = self.raw.remove(&id)?;
        self.raw_by_name.remove(&rec.name);
        self.by_seq.remove(&rec.created_seq);
        if self.active.remove(&id).is_some() {
            self.active_by_name.remove(&rec.name);
        }
        Some(rec)
    }

    pub fn by_name(&self, name: &str) -> Option<&IdentityRecord> {
        self.raw_by_name.get(name).and_then(|id| self.raw.get(id))
    }

    pub fn by_id(&self, id: IdentityId) -> Option<&IdentityRecord> {
        self.raw.get(&id)
    }

    pub fn active_by_id(&self, id: IdentityId) -> Option<&IdentityRecord> {
        self.active.get(&id).and_then(|_| self.raw.get(&id))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.raw_by_name.contains_key(name)
    }

    pub fn raw_count(&self) -> usize {
        self.raw.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Raw tier, oldest first.
    pub fn list_ordered_by_creation(&self) -> Vec<&IdentityRecord> {
        self.by_seq
            .values()
            .filter_map(|id| self.raw.get(id))
            .collect()
    }

    /// Ids of the `n` oldest identities.
    pub fn oldest(&self, n: usize) -> Vec<IdentityId> {
        self.by_seq.values().take(n).copied().collect()
    }

    /// Every raw-tier name, unordered.
    pub fn raw_names(&self) -> impl Iterator<Item = &str> {
        self.raw_by_name.keys().map(String::as_str)
    }

    /// Host handles of the active tier.
    pub fn active_refs(&self) -> Vec<HostEntityRef> {
        self.active.values().copied().collect()
    }

    /// Active names, sorted.
    pub fn active_names(&self) -> Vec<String> {
        let mut v = self.active_by_name.keys().cloned().collect::<Vec<_>>();
        v.sort();
        v
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        assert!(self.active.len() <= self.raw.len());
        assert_eq!(self.raw.len(), self.raw_by_name.len());
        assert_eq!(self.raw.len(), self.by_seq.len());
        assert_eq!(self.active.len(), self.active_by_name.len());
        for (id, host_ref) in &self.active {
            let rec = self.raw.get(id).expect("active identity missing from raw tier");
            assert_eq!(rec.state, LifecycleState::Active);
            assert_eq!(rec.host_ref, Some(*host_ref));
            assert_eq!(self.active_by_name.get(&rec.name), Some(id));
        }
        for (name, id) in &self.raw_by_name {
            assert_eq!(&self.raw[id].name, name);
        }
    }
}
