//! Epoch-transition housekeeping: invite distribution, penalty reset, stale
//! identity cleanup, shard balancing and dust clearing.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::collector::StatsCollector;
use crate::config::ConsensusConf;
use crate::num::Coin;
use crate::state::AppState;
use crate::types::{Address, IdentityState};

#[derive(Clone, Copy)]
struct RankedIdentity {
    addr: Address,
    score: u32,
}

/// Hands out the epoch's invites and resets per-epoch identity attributes.
///
/// Invites go to the strongest identities by total ceremony score: every
/// Human gets one, then Humans a second, then Verified identities one, each
/// pass walking the ranking until the budget runs dry. Identities tying the
/// score at the cut-off are admitted with it.
pub fn set_new_identities_attributes(
    app: &mut AppState,
    invites_budget: u32,
    _network_size: usize,
    bad_authors: &BTreeSet<Address>,
    collector: &mut dyn StatsCollector,
) {
    let epoch = app.state.epoch();
    let global_epoch = app.state.global_epoch();
    let god = app.state.god_address();

    let mut humans = Vec::new();
    let mut verified = Vec::new();
    let mut all = Vec::new();
    let mut stale_undefined = Vec::new();

    for (addr, identity) in app.state.iterate_identities() {
        all.push(*addr);
        if bad_authors.contains(addr) {
            continue;
        }
        let ranked = RankedIdentity {
            addr: *addr,
            score: identity.total_score_permille(),
        };
        match identity.state {
            IdentityState::Human => humans.push(ranked),
            IdentityState::Verified => verified.push(ranked),
            IdentityState::Undefined => {
                // A stake-holding ghost whose account went quiet is purged.
                if !identity.stake.is_zero()
                    && *addr != god
                    && app.state.account_epoch(addr) < epoch
                {
                    stale_undefined.push(*addr);
                }
            }
            _ => {}
        }
    }

    let rank = |entries: &mut Vec<RankedIdentity>| {
        entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.addr.cmp(&b.addr)));
    };
    rank(&mut humans);
    rank(&mut verified);

    let mut awards: BTreeMap<Address, u8> = BTreeMap::new();
    let mut budget = i64::from(invites_budget);
    distribute_invites(&humans, &mut budget, &mut awards);
    distribute_invites(&humans, &mut budget, &mut awards);
    distribute_invites(&verified, &mut budget, &mut awards);

    for addr in &all {
        let invites = awards.get(addr).copied().unwrap_or(0);
        let stale_undelegation = {
            let identity = app.state.get_or_new_identity_mut(*addr);
            identity.invites = invites;
            identity.penalty_seconds = 0;
            identity.penalty_timestamp = 0;
            identity.validation_txs.clear();
            identity.pending_undelegation.is_some()
                && identity.delegation_epoch.saturating_add(1) < global_epoch
        };
        if stale_undelegation {
            let identity = app.state.get_or_new_identity_mut(*addr);
            identity.pending_undelegation = None;
        }
    }

    for addr in stale_undefined {
        let identity = app.state.get_or_new_identity_mut(addr);
        identity.state = IdentityState::Killed;
        identity.stake = Coin::zero();
        identity.replenished_stake = Coin::zero();
        collector.add_killed_identity(&addr);
    }

    debug!(
        invites = invites_budget,
        winners = awards.len(),
        "epoch invites distributed"
    );
}

/// One ranked pass: award an invite per identity while the budget lasts, and
/// admit score ties at the cut-off.
fn distribute_invites(
    ranked: &[RankedIdentity],
    budget: &mut i64,
    awards: &mut BTreeMap<Address, u8>,
) {
    let mut cutoff: Option<u32> = None;
    for entry in ranked {
        if *budget > 0 {
            *awards.entry(entry.addr).or_insert(0) += 1;
            *budget -= 1;
            if *budget == 0 {
                cutoff = Some(entry.score);
            }
        } else if cutoff == Some(entry.score) {
            *awards.entry(entry.addr).or_insert(0) += 1;
        } else {
            break;
        }
    }
}

/// Clears delegations whose target has itself become a delegator. Such links
/// can only appear through out-of-order kills; surfacing them keeps the
/// no-transitive-delegation invariant intact.
pub fn prune_transitive_delegations(
    app: &mut AppState,
    collector: &mut dyn StatsCollector,
) -> Vec<Address> {
    let broken: Vec<(Address, Address)> = app
        .state
        .iterate_identities()
        .filter_map(|(addr, identity)| {
            let delegatee = identity.delegatee?;
            let target_delegates = app
                .state
                .identity(&delegatee)
                .map(|target| target.delegatee.is_some())
                .unwrap_or(false);
            target_delegates.then_some((*addr, delegatee))
        })
        .collect();
    let mut removed = Vec::with_capacity(broken.len());
    for (addr, delegatee) in broken {
        app.state.get_or_new_identity_mut(addr).delegatee = None;
        app.identity_state.set_delegatee(addr, None);
        collector.add_removed_transitive_delegation(&addr, &delegatee);
        removed.push(addr);
    }
    removed
}

/// Keeps every shard within `[min_shard_size, max_shard_size]` by halving or
/// doubling the shard count, then reassigns identities round-robin in
/// address order.
pub fn balance_shards(app: &mut AppState, conf: &ConsensusConf) {
    let relevant: Vec<Address> = app
        .state
        .iterate_identities()
        .filter(|(_, identity)| {
            matches!(
                identity.state,
                IdentityState::Newbie
                    | IdentityState::Verified
                    | IdentityState::Human
                    | IdentityState::Suspended
                    | IdentityState::Zombie
            )
        })
        .map(|(addr, _)| *addr)
        .collect();

    let population = relevant.len() as u32;
    let mut shards = app.state.shards_num();
    while shards > 1 && population / shards < conf.min_shard_size {
        shards /= 2;
    }
    while population / shards > conf.max_shard_size {
        shards *= 2;
    }

    if shards != app.state.shards_num() {
        info!(from = app.state.shards_num(), to = shards, "rebalancing shards");
    }
    app.state.set_shards_num(shards);
    for (index, addr) in relevant.iter().enumerate() {
        let shard = 1 + (index as u32 % shards) as u16;
        app.state.get_or_new_identity_mut(*addr).shard_id = shard;
    }
}

/// Deletes accounts whose balance fell below the dust threshold and that no
/// identity record references. The threshold scales inversely with the
/// network: `10 DNA / network_size`.
pub fn clear_dust_accounts(
    app: &mut AppState,
    network_size: usize,
    collector: &mut dyn StatsCollector,
) {
    let threshold = dust_threshold(network_size);
    let dust: Vec<(Address, Coin)> = app
        .state
        .iterate_accounts()
        .filter(|(addr, account)| {
            account.balance < threshold && app.state.identity(addr).is_none()
        })
        .map(|(addr, account)| (*addr, account.balance.clone()))
        .collect();
    for (addr, balance) in dust {
        app.state.remove_account(&addr);
        collector.add_burnt_coins(&balance);
    }
}

pub fn dust_threshold(network_size: usize) -> Coin {
    Coin::from_dna(10).div_u64(network_size.max(1) as u64)
}
