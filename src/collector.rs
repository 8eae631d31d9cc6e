//! Stats collection capability.
//!
//! The applicator reports economic events through a single [`StatsCollector`]
//! object. Implementations observe; none of these calls may influence any
//! state-root-affecting computation. Production nodes typically run the
//! no-op collector, indexers the recording one.

use crate::num::Coin;
use crate::types::Address;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardKind {
    Proposer,
    FinalCommittee,
    Staking,
    Candidate,
    Flips,
    ReportedFlips,
    Invitations,
    SavedInvite,
    Foundation,
    ZeroWallet,
}

pub trait StatsCollector {
    fn set_total_reward(&mut self, _total: &Coin) {}
    fn add_minted_coins(&mut self, _amount: &Coin) {}
    fn add_burnt_coins(&mut self, _amount: &Coin) {}
    fn add_reward(
        &mut self,
        _dest: &Address,
        _identity: &Address,
        _balance: &Coin,
        _stake: &Coin,
        _kind: RewardKind,
    ) {
    }
    fn add_penalty_seconds_charge(&mut self, _addr: &Address, _seconds: u16) {}
    fn add_killed_identity(&mut self, _addr: &Address) {}
    fn add_removed_transitive_delegation(&mut self, _delegator: &Address, _delegatee: &Address) {}
}

/// Collector that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCollector;

impl StatsCollector for NoopCollector {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewardRecord {
    pub dest: Address,
    pub identity: Address,
    pub balance: Coin,
    pub stake: Coin,
    pub kind: RewardKind,
}

/// Collector that records totals, used by tests to check the supply
/// conservation invariant.
#[derive(Clone, Debug, Default)]
pub struct RecordingCollector {
    pub total_reward: Coin,
    pub minted: Coin,
    pub burnt: Coin,
    pub rewards: Vec<RewardRecord>,
    pub killed: Vec<Address>,
    pub removed_transitive_delegations: Vec<(Address, Address)>,
}

impl StatsCollector for RecordingCollector {
    fn set_total_reward(&mut self, total: &Coin) {
        self.total_reward = total.clone();
    }

    fn add_minted_coins(&mut self, amount: &Coin) {
        self.minted.add_assign(amount);
    }

    fn add_burnt_coins(&mut self, amount: &Coin) {
        self.burnt.add_assign(amount);
    }

    fn add_reward(
        &mut self,
        dest: &Address,
        identity: &Address,
        balance: &Coin,
        stake: &Coin,
        kind: RewardKind,
    ) {
        self.rewards.push(RewardRecord {
            dest: *dest,
            identity: *identity,
            balance: balance.clone(),
            stake: stake.clone(),
            kind,
        });
    }

    fn add_killed_identity(&mut self, addr: &Address) {
        self.killed.push(*addr);
    }

    fn add_removed_transitive_delegation(&mut self, delegator: &Address, delegatee: &Address) {
        self.removed_transitive_delegations
            .push((*delegator, *delegatee));
    }
}
