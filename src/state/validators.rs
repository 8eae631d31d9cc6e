use std::collections::{BTreeMap, BTreeSet};

use crate::state::{IdentityStateDb, StateDb};
use crate::types::{Address, IdentityState};

/// Derived, read-only view over the approval index: online validators, pool
/// membership, the discriminated set and network sizes. Rebuilt from the
/// committed state after every block; never consulted mid-application.
#[derive(Clone, Debug, Default)]
pub struct ValidatorsCache {
    validated: BTreeSet<Address>,
    online: BTreeSet<Address>,
    delegations: BTreeMap<Address, Address>,
    pools: BTreeMap<Address, Vec<Address>>,
    discriminated: BTreeSet<Address>,
}

impl ValidatorsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, state: &StateDb, identity_state: &IdentityStateDb) {
        self.validated.clear();
        self.online.clear();
        self.delegations.clear();
        self.pools.clear();
        self.discriminated.clear();

        for (addr, entry) in identity_state.iterate() {
            if entry.validated {
                self.validated.insert(*addr);
            }
            if entry.online {
                self.online.insert(*addr);
            }
            if let Some(pool) = entry.delegatee {
                self.delegations.insert(*addr, pool);
                self.pools.entry(pool).or_default().push(*addr);
            }
        }

        let global_epoch = state.global_epoch();
        for (addr, identity) in state.iterate_identities() {
            if Self::identity_discriminated(identity, global_epoch) {
                self.discriminated.insert(*addr);
            }
        }
        // A pool carries influence only through its members; with none left
        // that are undiscriminated, the pool is withheld as well.
        for (pool, members) in &self.pools {
            if !members.is_empty()
                && members
                    .iter()
                    .all(|member| self.discriminated.contains(member))
            {
                self.discriminated.insert(*pool);
            }
        }
    }

    fn identity_discriminated(identity: &crate::types::Identity, global_epoch: u16) -> bool {
        if matches!(
            identity.state,
            IdentityState::Candidate | IdentityState::Newbie
        ) {
            return true;
        }
        // A fresh undelegation withholds influence for one epoch.
        identity.pending_undelegation.is_some()
            && identity.delegation_epoch.saturating_add(1) >= global_epoch
    }

    pub fn is_validated(&self, addr: &Address) -> bool {
        self.validated.contains(addr)
    }

    /// Whether the identity participates in consensus, directly or through an
    /// online pool.
    pub fn is_online_identity(&self, addr: &Address) -> bool {
        if self.online.contains(addr) {
            return true;
        }
        self.delegations
            .get(addr)
            .map(|pool| self.online.contains(pool))
            .unwrap_or(false)
    }

    pub fn is_pool(&self, addr: &Address) -> bool {
        self.pools.contains_key(addr)
    }

    pub fn pool_size(&self, addr: &Address) -> usize {
        self.pools.get(addr).map(Vec::len).unwrap_or(0)
    }

    pub fn delegatee(&self, addr: &Address) -> Option<Address> {
        self.delegations.get(addr).copied()
    }

    pub fn is_discriminated(&self, addr: &Address) -> bool {
        self.discriminated.contains(addr)
    }

    pub fn network_size(&self) -> usize {
        self.validated.len()
    }

    pub fn online_size(&self) -> usize {
        self.online.len()
    }

    /// Online validators in ascending address order; the committee source for
    /// block rewards when no certificate is supplied.
    pub fn online_validators(&self) -> Vec<Address> {
        self.online.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateDb;

    fn addr(byte: u8) -> Address {
        Address::from_prefix(&[byte])
    }

    fn addr2(a: u8, b: u8) -> Address {
        Address::from_prefix(&[a, b])
    }

    #[test]
    fn discrimination_follows_identity_class_and_undelegation_age() {
        let mut state = StateDb::new();
        let mut identity_state = IdentityStateDb::new();
        state.set_global_epoch(3);

        state.set_identity_state(addr(1), IdentityState::Newbie);
        state.set_identity_state(addr(2), IdentityState::Verified);
        state.set_identity_state(addr(3), IdentityState::Candidate);

        // Undelegated at epoch 2 with global epoch 3: still withheld.
        {
            let identity = state.get_or_new_identity_mut(addr(4));
            identity.state = IdentityState::Human;
            identity.pending_undelegation = Some(addr2(9, 9));
            identity.delegation_epoch = 2;
        }
        // Undelegated long ago: influence restored.
        {
            let identity = state.get_or_new_identity_mut(addr(5));
            identity.state = IdentityState::Human;
            identity.pending_undelegation = Some(addr2(9, 9));
            identity.delegation_epoch = 1;
        }

        let mut cache = ValidatorsCache::new();
        cache.load(&state, &identity_state);
        assert!(cache.is_discriminated(&addr(1)));
        assert!(!cache.is_discriminated(&addr(2)));
        assert!(cache.is_discriminated(&addr(3)));
        assert!(cache.is_discriminated(&addr(4)));
        assert!(!cache.is_discriminated(&addr(5)));

        // A pool of only newbies is withheld; one verified member restores it.
        identity_state.set_delegatee(addr(1), Some(addr2(6, 6)));
        cache.load(&state, &identity_state);
        assert!(cache.is_discriminated(&addr2(6, 6)));

        identity_state.set_delegatee(addr(2), Some(addr2(6, 6)));
        cache.load(&state, &identity_state);
        assert!(!cache.is_discriminated(&addr2(6, 6)));
    }

    #[test]
    fn pool_membership_and_online_lookup() {
        let state = StateDb::new();
        let mut identity_state = IdentityStateDb::new();
        identity_state.set_validated(addr(1), true);
        identity_state.set_delegatee(addr(1), Some(addr(7)));
        identity_state.set_online(addr(7), true);
        identity_state.set_validated(addr(2), true);

        let mut cache = ValidatorsCache::new();
        cache.load(&state, &identity_state);

        assert!(cache.is_pool(&addr(7)));
        assert_eq!(cache.pool_size(&addr(7)), 1);
        assert!(cache.is_online_identity(&addr(1)), "online through the pool");
        assert!(!cache.is_online_identity(&addr(2)));
        assert_eq!(cache.network_size(), 2);
        assert_eq!(cache.online_size(), 1);
    }
}
