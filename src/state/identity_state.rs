use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Entry of the approval index consumed by validator selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedIdentity {
    pub validated: bool,
    pub online: bool,
    pub delegatee: Option<Address>,
}

impl ApprovedIdentity {
    fn is_default(&self) -> bool {
        !self.validated && !self.online && self.delegatee.is_none()
    }
}

/// Validated/online/delegation flags per identity, kept in its own namespace
/// so validator selection never deserializes full identity records. Committed
/// together with [`super::StateDb`] and folded into the same root.
#[derive(Clone, Debug, Default)]
pub struct IdentityStateDb {
    committed: BTreeMap<Address, ApprovedIdentity>,
    layer: BTreeMap<Address, ApprovedIdentity>,
}

impl IdentityStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.layer = self.committed.clone();
    }

    pub fn commit(&mut self) -> [u8; 32] {
        let root = self.root();
        self.committed = self.layer.clone();
        root
    }

    pub fn root(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for (addr, entry) in &self.layer {
            let leaf = bincode::serialize(&(addr, entry)).expect("serialize approval leaf");
            hasher.update(blake3::hash(&leaf).as_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    fn entry_mut(&mut self, addr: Address) -> &mut ApprovedIdentity {
        self.layer.entry(addr).or_default()
    }

    fn prune(&mut self, addr: &Address) {
        if self
            .layer
            .get(addr)
            .map(ApprovedIdentity::is_default)
            .unwrap_or(false)
        {
            self.layer.remove(addr);
        }
    }

    pub fn set_validated(&mut self, addr: Address, validated: bool) {
        self.entry_mut(addr).validated = validated;
        self.prune(&addr);
    }

    pub fn set_online(&mut self, addr: Address, online: bool) {
        self.entry_mut(addr).online = online;
        self.prune(&addr);
    }

    pub fn set_delegatee(&mut self, addr: Address, delegatee: Option<Address>) {
        self.entry_mut(addr).delegatee = delegatee;
        self.prune(&addr);
    }

    pub fn remove(&mut self, addr: &Address) {
        self.layer.remove(addr);
    }

    pub fn is_validated(&self, addr: &Address) -> bool {
        self.layer
            .get(addr)
            .map(|entry| entry.validated)
            .unwrap_or(false)
    }

    pub fn is_online(&self, addr: &Address) -> bool {
        self.layer
            .get(addr)
            .map(|entry| entry.online)
            .unwrap_or(false)
    }

    pub fn delegatee(&self, addr: &Address) -> Option<Address> {
        self.layer.get(addr).and_then(|entry| entry.delegatee)
    }

    /// Whether any identity currently delegates to `pool`.
    pub fn has_delegators(&self, pool: &Address) -> bool {
        self.layer
            .values()
            .any(|entry| entry.delegatee.as_ref() == Some(pool))
    }

    pub fn iterate(&self) -> impl Iterator<Item = (&Address, &ApprovedIdentity)> {
        self.layer.iter()
    }
}
