//! Epoch-close reward engine.
//!
//! Pays the staking, candidate, flip, report, invitation, foundation and
//! zero-wallet shares of the epoch pot, in that order. Identities inside each
//! category are visited in ascending address order; per-identity weights are
//! single-precision floats by consensus rule.

use std::collections::BTreeMap;

use tracing::info;

use crate::collector::{RewardKind, StatsCollector};
use crate::config::ConsensusConf;
use crate::num::{mul_div_f32, split_reward, stake_weight, Coin};
use crate::state::AppState;
use crate::types::{Address, IdentityState, ShardId, ValidationResults};

/// Runs every reward category for the closing epoch. Returns nothing; all
/// effects land in `app`.
pub fn reward_valid_identities(
    app: &mut AppState,
    conf: &ConsensusConf,
    validation_results: &BTreeMap<ShardId, ValidationResults>,
    epoch_durations: &[u32],
    collector: &mut dyn StatsCollector,
) {
    let current_epoch_duration = epoch_durations.last().copied().unwrap_or(0);
    let total = conf
        .block_reward
        .add(&conf.final_committee_reward)
        .mul_u64(u64::from(current_epoch_duration));
    collector.set_total_reward(&total);
    info!(total = %total, "distributing epoch rewards");

    let stake_weights =
        add_successful_validation_reward(app, conf, validation_results, &total, collector);
    add_flip_reward(app, conf, validation_results, &total, collector);
    add_report_reward(app, conf, validation_results, &total, collector);
    add_invitation_reward(
        app,
        conf,
        validation_results,
        &total,
        epoch_durations,
        &stake_weights,
        collector,
    );
    add_foundation_payouts(app, conf, &total, collector);
    add_zero_wallet_fund(app, conf, &total, collector);
}

/// Credits one epoch reward: split into balance and stake, the balance part
/// redirected to the delegatee.
fn add_epoch_reward(
    app: &mut AppState,
    addr: Address,
    reward: &Coin,
    is_newbie: bool,
    conf: &ConsensusConf,
    kind: RewardKind,
    collector: &mut dyn StatsCollector,
) {
    if reward.is_zero() {
        return;
    }
    let (balance, stake) = split_reward(reward, is_newbie, conf);
    let dest = app.state.delegatee(&addr).unwrap_or(addr);
    app.state.add_balance(dest, &balance);
    app.state.add_stake(addr, &stake);
    collector.add_minted_coins(&balance);
    collector.add_minted_coins(&stake);
    collector.add_reward(&dest, &addr, &balance, &stake, kind);
}

/// Pure-stake credit used for invitee rewards: the full amount locks as
/// replenished stake on the identity itself.
fn add_reward_to_stake(
    app: &mut AppState,
    addr: Address,
    reward: &Coin,
    kind: RewardKind,
    collector: &mut dyn StatsCollector,
) {
    if reward.is_zero() {
        return;
    }
    app.state.add_stake(addr, reward);
    app.state.add_replenished_stake(addr, reward);
    collector.add_minted_coins(reward);
    collector.add_reward(&addr, &addr, &Coin::zero(), reward, kind);
}

fn shard_results<'a>(
    validation_results: &'a BTreeMap<ShardId, ValidationResults>,
    shard: ShardId,
) -> Option<&'a ValidationResults> {
    validation_results.get(&shard)
}

fn add_successful_validation_reward(
    app: &mut AppState,
    conf: &ConsensusConf,
    validation_results: &BTreeMap<ShardId, ValidationResults>,
    total: &Coin,
    collector: &mut dyn StatsCollector,
) -> BTreeMap<Address, f32> {
    let epoch = app.state.epoch();
    let staking_pot = mul_div_f32(total, conf.staking_reward_percent, 1.0);
    let candidate_pot = mul_div_f32(total, conf.candidate_reward_percent, 1.0);

    struct Entry {
        addr: Address,
        weight: f32,
        is_candidate: bool,
        is_newbie: bool,
    }

    let mut stake_weights = BTreeMap::new();
    let mut entries = Vec::new();
    let mut total_weight = 0f32;
    let mut total_candidates = 0u64;

    for (addr, identity) in app.state.iterate_identities() {
        if !identity.state.newbie_or_better() {
            continue;
        }
        let penalized = shard_results(validation_results, identity.shard_id)
            .map(|results| results.bad_authors.contains(addr))
            .unwrap_or(false);
        if penalized {
            continue;
        }
        let is_candidate = identity.birthday == epoch;
        if is_candidate {
            total_candidates += 1;
        }
        let weight = if identity.stake.is_zero() {
            0.0
        } else {
            let weight = stake_weight(&identity.stake);
            total_weight += weight;
            weight
        };
        stake_weights.insert(*addr, weight);
        entries.push(Entry {
            addr: *addr,
            weight,
            is_candidate,
            is_newbie: identity.state == IdentityState::Newbie,
        });
    }

    let god = app.state.god_address();
    stake_weights
        .entry(god)
        .or_insert_with(|| stake_weight(&app.state.stake(&god)));

    if total_weight == 0.0 && total_candidates == 0 {
        return stake_weights;
    }

    let candidate_share = if total_candidates > 0 {
        candidate_pot.div_u64(total_candidates)
    } else {
        Coin::zero()
    };

    for entry in entries {
        if entry.is_candidate {
            add_epoch_reward(
                app,
                entry.addr,
                &candidate_share,
                entry.is_newbie,
                conf,
                RewardKind::Candidate,
                collector,
            );
        }
        if entry.weight > 0.0 {
            let reward = mul_div_f32(&staking_pot, entry.weight, total_weight);
            add_epoch_reward(
                app,
                entry.addr,
                &reward,
                entry.is_newbie,
                conf,
                RewardKind::Staking,
                collector,
            );
        }
    }
    stake_weights
}

fn add_flip_reward(
    app: &mut AppState,
    conf: &ConsensusConf,
    validation_results: &BTreeMap<ShardId, ValidationResults>,
    total: &Coin,
    collector: &mut dyn StatsCollector,
) {
    let flip_pot = mul_div_f32(total, conf.flip_reward_percent, 1.0);
    let shards_num = app.state.shards_num() as ShardId;

    let mut total_weight = 0f32;
    for shard in 1..=shards_num {
        let Some(results) = shard_results(validation_results, shard) else {
            continue;
        };
        for author in results.good_authors.values() {
            if author.missed {
                continue;
            }
            for flip in &author.flips_to_reward {
                total_weight += flip.grade.reward_coef();
            }
        }
        if conf.reports_reward_percent > 0.0 {
            continue;
        }
        for reporters in results.reporters_to_reward_by_flip.values() {
            if !reporters.is_empty() {
                total_weight += 1.0;
            }
        }
    }
    if total_weight == 0.0 {
        return;
    }

    for shard in 1..=shards_num {
        let Some(results) = shard_results(validation_results, shard) else {
            continue;
        };
        let authors: Vec<(Address, f32, bool)> = results
            .good_authors
            .iter()
            .filter(|(_, author)| !author.missed)
            .map(|(addr, author)| {
                let weight: f32 = author
                    .flips_to_reward
                    .iter()
                    .map(|flip| flip.grade.reward_coef())
                    .sum();
                (
                    *addr,
                    weight,
                    author.new_identity_state == IdentityState::Newbie,
                )
            })
            .collect();
        for (addr, weight, is_newbie) in authors {
            if weight == 0.0 {
                continue;
            }
            let reward = mul_div_f32(&flip_pot, weight, total_weight);
            add_epoch_reward(app, addr, &reward, is_newbie, conf, RewardKind::Flips, collector);
        }
    }

    if conf.reports_reward_percent > 0.0 {
        return;
    }
    // Report rewards are folded into the flip pool when disabled.
    let flip_unit = mul_div_f32(&flip_pot, 1.0, total_weight);
    for shard in 1..=shards_num {
        let Some(results) = shard_results(validation_results, shard) else {
            continue;
        };
        let reporters: Vec<(Address, bool, u64)> = results
            .reporters_to_reward_by_flip
            .values()
            .filter(|reporters| !reporters.is_empty())
            .flat_map(|reporters| {
                let count = reporters.len() as u64;
                reporters.iter().map(move |reporter| {
                    (
                        reporter.address,
                        reporter.new_identity_state == IdentityState::Newbie,
                        count,
                    )
                })
            })
            .collect();
        for (addr, is_newbie, count) in reporters {
            let reward = flip_unit.div_u64(count);
            add_epoch_reward(
                app,
                addr,
                &reward,
                is_newbie,
                conf,
                RewardKind::ReportedFlips,
                collector,
            );
        }
    }
}

fn add_report_reward(
    app: &mut AppState,
    conf: &ConsensusConf,
    validation_results: &BTreeMap<ShardId, ValidationResults>,
    total: &Coin,
    collector: &mut dyn StatsCollector,
) {
    if conf.reports_reward_percent == 0.0 {
        return;
    }
    let pot = mul_div_f32(total, conf.reports_reward_percent, 1.0);
    let shards_num = app.state.shards_num() as ShardId;

    let mut total_reporters = 0u64;
    for shard in 1..=shards_num {
        if let Some(results) = shard_results(validation_results, shard) {
            for reporters in results.reporters_to_reward_by_flip.values() {
                total_reporters += reporters.len() as u64;
            }
        }
    }
    if total_reporters == 0 {
        return;
    }
    let share = pot.div_u64(total_reporters);

    for shard in 1..=shards_num {
        let Some(results) = shard_results(validation_results, shard) else {
            continue;
        };
        let reporters: Vec<(Address, bool)> = results
            .reporters_to_reward_by_flip
            .values()
            .flatten()
            .map(|reporter| {
                (
                    reporter.address,
                    reporter.new_identity_state == IdentityState::Newbie,
                )
            })
            .collect();
        for (addr, is_newbie) in reporters {
            add_epoch_reward(
                app,
                addr,
                &share,
                is_newbie,
                conf,
                RewardKind::ReportedFlips,
                collector,
            );
        }
    }
}

fn coef_by_age(age: u16, conf: &ConsensusConf) -> f32 {
    match age {
        1 => conf.first_invitation_reward_coef,
        2 => conf.second_invitation_reward_coef,
        3 => conf.third_invitation_reward_coef,
        _ => 0.0,
    }
}

/// Weights one successful invite for the inviter and, under upgrade-10, the
/// invitee. The late-epoch dampening factor `1 - min(h/duration, 1)^4 * 0.5`
/// discounts invites activated close to the ceremony.
fn invitation_reward_coef(
    stake_weight: f32,
    age: u16,
    invitee_penalized: bool,
    epoch_height: u32,
    epoch_durations: &[u32],
    conf: &ConsensusConf,
) -> (f32, f32) {
    if age == 0 || age > 3 {
        return (0.0, 0.0);
    }

    let split = |value: f32| -> (f32, f32) {
        if conf.enable_upgrade10 {
            let inviter = value * coef_by_age(age, conf);
            let invitee = if invitee_penalized {
                0.0
            } else {
                value - inviter
            };
            (inviter, invitee)
        } else {
            (value, 0.0)
        }
    };

    let base = if conf.enable_upgrade10 {
        stake_weight
    } else {
        coef_by_age(age, conf)
    };
    if epoch_durations.len() < age as usize {
        return split(base);
    }
    let duration = epoch_durations[epoch_durations.len() - age as usize];
    if duration == 0 {
        return split(base);
    }
    let t = (f64::from(epoch_height) / f64::from(duration)).min(1.0);
    split(base * (1.0 - t.powi(4) * 0.5) as f32)
}

fn add_invitation_reward(
    app: &mut AppState,
    conf: &ConsensusConf,
    validation_results: &BTreeMap<ShardId, ValidationResults>,
    total: &Coin,
    epoch_durations: &[u32],
    stake_weights: &BTreeMap<Address, f32>,
    collector: &mut dyn StatsCollector,
) {
    let pot = mul_div_f32(total, conf.valid_invitation_reward_percent, 1.0);
    let shards_num = app.state.shards_num() as ShardId;

    struct InviteEntry {
        inviter: Address,
        inviter_weight: f32,
        invitee: Address,
        invitee_weight: f32,
        is_newbie: bool,
    }

    let mut total_weight = 0f32;
    let mut entries = Vec::new();
    for shard in 1..=shards_num {
        let Some(results) = shard_results(validation_results, shard) else {
            continue;
        };
        for (addr, inviter) in &results.good_inviters {
            if !inviter.pay_invitation_reward {
                continue;
            }
            for invite in &inviter.successful_invites {
                let weight = stake_weights.get(addr).copied().unwrap_or(0.0);
                let (inviter_weight, invitee_weight) = invitation_reward_coef(
                    weight,
                    invite.age,
                    invite.penalized,
                    invite.epoch_height,
                    epoch_durations,
                    conf,
                );
                total_weight += inviter_weight + invitee_weight;
                entries.push(InviteEntry {
                    inviter: *addr,
                    inviter_weight,
                    invitee: invite.invitee,
                    invitee_weight,
                    is_newbie: inviter.new_identity_state == IdentityState::Newbie,
                });
            }
        }
    }
    if total_weight == 0.0 {
        return;
    }

    for entry in entries {
        if entry.inviter_weight <= 0.0 {
            continue;
        }
        let inviter_reward = mul_div_f32(&pot, entry.inviter_weight, total_weight);
        add_epoch_reward(
            app,
            entry.inviter,
            &inviter_reward,
            entry.is_newbie,
            conf,
            RewardKind::Invitations,
            collector,
        );
        if conf.enable_upgrade10 && entry.invitee_weight > 0.0 {
            let invitee_reward = mul_div_f32(&pot, entry.invitee_weight, total_weight);
            add_reward_to_stake(
                app,
                entry.invitee,
                &invitee_reward,
                RewardKind::Invitations,
                collector,
            );
        }
    }
}

fn add_foundation_payouts(
    app: &mut AppState,
    conf: &ConsensusConf,
    total: &Coin,
    collector: &mut dyn StatsCollector,
) {
    let payout = mul_div_f32(total, conf.foundation_payouts_percent, 1.0);
    if payout.is_zero() {
        return;
    }
    let god = app.state.god_address();
    app.state.add_balance(god, &payout);
    collector.add_minted_coins(&payout);
    collector.add_reward(&god, &god, &payout, &Coin::zero(), RewardKind::Foundation);
}

fn add_zero_wallet_fund(
    app: &mut AppState,
    conf: &ConsensusConf,
    total: &Coin,
    collector: &mut dyn StatsCollector,
) {
    let payout = mul_div_f32(total, conf.zero_wallet_percent, 1.0);
    if payout.is_zero() {
        return;
    }
    let zero = Address::EMPTY;
    app.state.add_balance(zero, &payout);
    collector.add_minted_coins(&payout);
    collector.add_reward(&zero, &zero, &payout, &Coin::zero(), RewardKind::ZeroWallet);
}
