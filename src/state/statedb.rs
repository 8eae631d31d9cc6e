use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::num::Coin;
use crate::types::{Account, Address, Identity, IdentityState};

/// Phase of the running validation ceremony.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationPeriod {
    #[default]
    None,
    FlipLottery,
    ShortSession,
    LongSession,
    AfterLong,
}

/// Width of the rolling empty-block window behind the VRF proposer threshold.
pub const EMPTY_BLOCK_WINDOW: u32 = 25;

/// Chain-global mutable state. All mutation goes through the typed setters on
/// [`StateDb`]; the tuple itself is a plain value committed with the rest of
/// the state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Globals {
    pub epoch: u16,
    pub global_epoch: u16,
    pub fee_per_gas: Coin,
    pub vrf_proposer_threshold: f64,
    pub empty_block_bits: u32,
    pub shards_num: u32,
    pub validation_period: ValidationPeriod,
    pub next_validation_time: i64,
    pub god_address: Address,
    pub god_invites_used: u16,
    pub status_switch_addresses: BTreeSet<Address>,
    pub delayed_offline_penalties: Vec<Address>,
    pub delegations: BTreeMap<Address, Address>,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            epoch: 0,
            global_epoch: 0,
            fee_per_gas: Coin::zero(),
            vrf_proposer_threshold: 0.5,
            empty_block_bits: 0,
            shards_num: 1,
            validation_period: ValidationPeriod::None,
            next_validation_time: 0,
            god_address: Address::EMPTY,
            god_invites_used: 0,
            status_switch_addresses: BTreeSet::new(),
            delayed_offline_penalties: Vec::new(),
            delegations: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateLayer {
    pub accounts: BTreeMap<Address, Account>,
    pub identities: BTreeMap<Address, Identity>,
    pub globals: Globals,
    pub contracts: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Canonical application state: a committed base plus the working layer the
/// current block mutates. Maps are `BTreeMap`s so that every iteration the
/// consensus code performs is an ascending-address walk.
#[derive(Clone, Debug, Default)]
pub struct StateDb {
    committed: StateLayer,
    layer: StateLayer,
}

impl StateDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_layer(layer: StateLayer) -> Self {
        Self {
            committed: layer.clone(),
            layer,
        }
    }

    /// Drops every uncommitted change.
    pub fn reset(&mut self) {
        self.layer = self.committed.clone();
    }

    /// Snapshot of the working layer, used to roll back a failed effect.
    pub fn snapshot(&self) -> StateLayer {
        self.layer.clone()
    }

    pub fn restore(&mut self, snapshot: StateLayer) {
        self.layer = snapshot;
    }

    pub fn layer(&self) -> &StateLayer {
        &self.layer
    }

    /// Demotes Killed identities and computes the candidate root. Run before
    /// the root is bound into a header; `commit` repeats it idempotently.
    pub fn precommit(&mut self) -> [u8; 32] {
        self.finalize_killed();
        self.root()
    }

    pub fn commit(&mut self) -> [u8; 32] {
        self.finalize_killed();
        let root = self.root();
        self.committed = self.layer.clone();
        root
    }

    /// A Killed identity keeps its record until commit, when it demotes to
    /// Undefined. Attributes inspected by the epoch transition are erased
    /// here; the profile hash and opaque metadata survive.
    fn finalize_killed(&mut self) {
        let killed: Vec<Address> = self
            .layer
            .identities
            .iter()
            .filter(|(_, identity)| identity.state == IdentityState::Killed)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in killed {
            let identity = self.layer.identities.get_mut(&addr).expect("killed identity");
            if identity.profile_hash.is_empty() && identity.metadata.is_empty() {
                self.layer.identities.remove(&addr);
                continue;
            }
            let mut survivor = Identity::default();
            survivor.profile_hash = std::mem::take(&mut identity.profile_hash);
            survivor.metadata = std::mem::take(&mut identity.metadata);
            *identity = survivor;
        }
    }

    /// Merkle root over the canonical serialization: identities in address
    /// order, accounts in address order, globals, contract values.
    pub fn root(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for (addr, identity) in &self.layer.identities {
            let leaf = bincode::serialize(&(addr, identity)).expect("serialize identity leaf");
            hasher.update(blake3::hash(&leaf).as_bytes());
        }
        for (addr, account) in &self.layer.accounts {
            let leaf = bincode::serialize(&(addr, account)).expect("serialize account leaf");
            hasher.update(blake3::hash(&leaf).as_bytes());
        }
        let globals = bincode::serialize(&self.layer.globals).expect("serialize globals");
        hasher.update(blake3::hash(&globals).as_bytes());
        for (key, value) in &self.layer.contracts {
            let leaf = bincode::serialize(&(key, value)).expect("serialize contract leaf");
            hasher.update(blake3::hash(&leaf).as_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    // --- accounts ---

    pub fn account(&self, addr: &Address) -> Option<&Account> {
        self.layer.accounts.get(addr)
    }

    pub fn account_exists(&self, addr: &Address) -> bool {
        self.layer.accounts.contains_key(addr)
    }

    pub fn get_or_new_account_mut(&mut self, addr: Address) -> &mut Account {
        self.layer.accounts.entry(addr).or_default()
    }

    pub fn balance(&self, addr: &Address) -> Coin {
        self.account(addr)
            .map(|account| account.balance.clone())
            .unwrap_or_else(Coin::zero)
    }

    pub fn set_balance(&mut self, addr: Address, balance: Coin) {
        self.get_or_new_account_mut(addr).balance = balance;
    }

    pub fn add_balance(&mut self, addr: Address, amount: &Coin) {
        if amount.is_zero() {
            return;
        }
        self.get_or_new_account_mut(addr).credit(amount);
    }

    pub fn sub_balance(&mut self, addr: Address, amount: &Coin) -> bool {
        self.get_or_new_account_mut(addr).debit(amount)
    }

    pub fn nonce(&self, addr: &Address) -> u32 {
        self.account(addr).map(|account| account.nonce).unwrap_or(0)
    }

    pub fn set_nonce(&mut self, addr: Address, nonce: u32) {
        self.get_or_new_account_mut(addr).nonce = nonce;
    }

    pub fn account_epoch(&self, addr: &Address) -> u16 {
        self.account(addr).map(|account| account.epoch).unwrap_or(0)
    }

    pub fn set_account_epoch(&mut self, addr: Address, epoch: u16) {
        self.get_or_new_account_mut(addr).epoch = epoch;
    }

    pub fn remove_account(&mut self, addr: &Address) {
        self.layer.accounts.remove(addr);
    }

    pub fn iterate_accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.layer.accounts.iter()
    }

    // --- identities ---

    pub fn identity(&self, addr: &Address) -> Option<&Identity> {
        self.layer.identities.get(addr)
    }

    pub fn identity_mut(&mut self, addr: &Address) -> Option<&mut Identity> {
        self.layer.identities.get_mut(addr)
    }

    pub fn get_or_new_identity_mut(&mut self, addr: Address) -> &mut Identity {
        self.layer.identities.entry(addr).or_default()
    }

    pub fn identity_state(&self, addr: &Address) -> IdentityState {
        self.identity(addr)
            .map(|identity| identity.state)
            .unwrap_or(IdentityState::Undefined)
    }

    pub fn set_identity_state(&mut self, addr: Address, state: IdentityState) {
        self.get_or_new_identity_mut(addr).state = state;
    }

    pub fn stake(&self, addr: &Address) -> Coin {
        self.identity(addr)
            .map(|identity| identity.stake.clone())
            .unwrap_or_else(Coin::zero)
    }

    pub fn add_stake(&mut self, addr: Address, amount: &Coin) {
        if amount.is_zero() {
            return;
        }
        self.get_or_new_identity_mut(addr).stake.add_assign(amount);
    }

    pub fn add_replenished_stake(&mut self, addr: Address, amount: &Coin) {
        if amount.is_zero() {
            return;
        }
        let identity = self.get_or_new_identity_mut(addr);
        identity.replenished_stake.add_assign(amount);
    }

    pub fn penalty_seconds(&self, addr: &Address) -> u16 {
        self.identity(addr)
            .map(|identity| identity.penalty_seconds)
            .unwrap_or(0)
    }

    pub fn set_penalty_seconds(&mut self, addr: Address, seconds: u16) {
        self.get_or_new_identity_mut(addr).penalty_seconds = seconds;
    }

    pub fn penalty_timestamp(&self, addr: &Address) -> i64 {
        self.identity(addr)
            .map(|identity| identity.penalty_timestamp)
            .unwrap_or(0)
    }

    pub fn set_penalty_timestamp(&mut self, addr: Address, timestamp: i64) {
        self.get_or_new_identity_mut(addr).penalty_timestamp = timestamp;
    }

    pub fn delegatee(&self, addr: &Address) -> Option<Address> {
        self.identity(addr).and_then(|identity| identity.delegatee)
    }

    pub fn pending_undelegation(&self, addr: &Address) -> Option<Address> {
        self.identity(addr)
            .and_then(|identity| identity.pending_undelegation)
    }

    pub fn remove_identity(&mut self, addr: &Address) {
        self.layer.identities.remove(addr);
    }

    pub fn iterate_identities(&self) -> impl Iterator<Item = (&Address, &Identity)> {
        self.layer.identities.iter()
    }

    // --- globals ---

    pub fn epoch(&self) -> u16 {
        self.layer.globals.epoch
    }

    pub fn inc_epoch(&mut self) {
        self.layer.globals.epoch += 1;
    }

    pub fn global_epoch(&self) -> u16 {
        self.layer.globals.global_epoch
    }

    pub fn set_global_epoch(&mut self, epoch: u16) {
        self.layer.globals.global_epoch = epoch;
    }

    pub fn fee_per_gas(&self) -> Coin {
        self.layer.globals.fee_per_gas.clone()
    }

    pub fn set_fee_per_gas(&mut self, fee: Coin) {
        self.layer.globals.fee_per_gas = fee;
    }

    pub fn vrf_proposer_threshold(&self) -> f64 {
        self.layer.globals.vrf_proposer_threshold
    }

    pub fn set_vrf_proposer_threshold(&mut self, threshold: f64) {
        self.layer.globals.vrf_proposer_threshold = threshold;
    }

    /// Records whether the latest block was an empty block, shifting the
    /// rolling window.
    pub fn register_block_kind(&mut self, empty: bool) {
        let bits = &mut self.layer.globals.empty_block_bits;
        *bits <<= 1;
        if empty {
            *bits |= 1;
        }
        *bits &= (1u32 << EMPTY_BLOCK_WINDOW) - 1;
    }

    pub fn empty_blocks_count(&self) -> u32 {
        self.layer.globals.empty_block_bits.count_ones()
    }

    pub fn shards_num(&self) -> u32 {
        self.layer.globals.shards_num
    }

    pub fn set_shards_num(&mut self, shards: u32) {
        self.layer.globals.shards_num = shards.max(1);
    }

    pub fn validation_period(&self) -> ValidationPeriod {
        self.layer.globals.validation_period
    }

    pub fn set_validation_period(&mut self, period: ValidationPeriod) {
        self.layer.globals.validation_period = period;
    }

    pub fn next_validation_time(&self) -> i64 {
        self.layer.globals.next_validation_time
    }

    pub fn set_next_validation_time(&mut self, time: i64) {
        self.layer.globals.next_validation_time = time;
    }

    pub fn god_address(&self) -> Address {
        self.layer.globals.god_address
    }

    pub fn set_god_address(&mut self, addr: Address) {
        self.layer.globals.god_address = addr;
    }

    pub fn god_invites_used(&self) -> u16 {
        self.layer.globals.god_invites_used
    }

    pub fn inc_god_invites_used(&mut self) {
        self.layer.globals.god_invites_used += 1;
    }

    pub fn reset_god_invites_used(&mut self) {
        self.layer.globals.god_invites_used = 0;
    }

    // --- pending status switches ---

    pub fn toggle_status_switch_address(&mut self, addr: Address) {
        let set = &mut self.layer.globals.status_switch_addresses;
        if !set.remove(&addr) {
            set.insert(addr);
        }
    }

    pub fn has_status_switch(&self, addr: &Address) -> bool {
        self.layer.globals.status_switch_addresses.contains(addr)
    }

    pub fn status_switch_addresses(&self) -> Vec<Address> {
        self.layer
            .globals
            .status_switch_addresses
            .iter()
            .copied()
            .collect()
    }

    pub fn clear_status_switch_addresses(&mut self) {
        self.layer.globals.status_switch_addresses.clear();
    }

    // --- delayed offline penalties ---

    pub fn add_delayed_penalty(&mut self, addr: Address) {
        let pending = &mut self.layer.globals.delayed_offline_penalties;
        if !pending.contains(&addr) {
            pending.push(addr);
        }
    }

    pub fn has_delayed_penalty(&self, addr: &Address) -> bool {
        self.layer.globals.delayed_offline_penalties.contains(addr)
    }

    pub fn remove_delayed_penalty(&mut self, addr: &Address) {
        self.layer
            .globals
            .delayed_offline_penalties
            .retain(|pending| pending != addr);
    }

    pub fn delayed_offline_penalties(&self) -> Vec<Address> {
        self.layer.globals.delayed_offline_penalties.clone()
    }

    pub fn clear_delayed_penalties(&mut self) {
        self.layer.globals.delayed_offline_penalties.clear();
    }

    // --- pending delegations ---

    /// Adds or removes a pending delegation entry. The empty address encodes
    /// an undelegation request.
    pub fn toggle_delegation_address(&mut self, addr: Address, target: Address) {
        let pending = &mut self.layer.globals.delegations;
        if pending.remove(&addr).is_none() {
            pending.insert(addr, target);
        }
    }

    pub fn has_pending_delegation(&self, addr: &Address) -> bool {
        self.layer.globals.delegations.contains_key(addr)
    }

    pub fn delegations(&self) -> &BTreeMap<Address, Address> {
        &self.layer.globals.delegations
    }

    /// Whether any pending delegation points at `addr`.
    pub fn is_delegation_target(&self, addr: &Address) -> bool {
        self.layer
            .globals
            .delegations
            .values()
            .any(|target| target == addr)
    }

    pub fn clear_delegations(&mut self) {
        self.layer.globals.delegations.clear();
    }

    // --- contract store ---

    pub fn contract_value(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.layer.contracts.get(key)
    }

    pub fn set_contract_value(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.layer.contracts.insert(key, value);
    }

    pub fn remove_contract_value(&mut self, key: &[u8]) {
        self.layer.contracts.remove(key);
    }
}
