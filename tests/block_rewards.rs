//! Per-block reward distribution, penalty withholding and fee recycling.

mod common;

use common::*;

use dna_chain::collector::{NoopCollector, RecordingCollector};
use dna_chain::num::{block_weight, mul_div_f64, split_reward, Coin};
use dna_chain::types::{Block, BlockFlags, BlockHeader, IdentityState, ProposedHeader};

fn reward_block(time: i64) -> Block {
    Block::new(
        BlockHeader::Proposed(ProposedHeader {
            height: 3,
            parent_hash: String::new(),
            time,
            proposer_pubkey: hex::encode(keypair(1).public.to_bytes()),
            tx_root: String::new(),
            state_root: String::new(),
            flags: BlockFlags::default(),
            seed: String::new(),
            offline_addr: None,
        }),
        Vec::new(),
    )
}

#[test]
fn zero_stake_proposer_keeps_only_fees_and_tips() {
    let proposer_key = keypair(1);
    let proposer = key_address(&proposer_key);
    let member = addr(&[0x1]);
    let mut chain = new_blockchain(
        proposer,
        vec![
            GenesisSpec::identity(proposer, IdentityState::Verified, Coin::zero()),
            GenesisSpec::identity(member, IdentityState::Verified, dna(10)),
        ],
    );
    chain.app_state.identity_state.set_online(proposer, true);
    chain.app_state.identity_state.set_online(member, true);
    chain.commit_state().unwrap();

    let committee = chain.app_state.validators_cache.online_validators();
    let ctx = chain.prepare_block_reward_ctx(proposer, Some(&committee));
    let block = reward_block(1_000);

    chain.apply_block_rewards(&dna(1000), &dna(10), &block, &ctx, &mut NoopCollector);

    // 10% of the fee plus tips, split 80/20, and no share of the block pot.
    assert_eq!(chain.app_state.state.balance(&proposer), dna(88));
    assert_eq!(chain.app_state.state.stake(&proposer), dna(22));

    // The staked committee member takes the whole 6 DNA pot.
    assert_eq!(chain.app_state.state.balance(&member), dna_str("4.8"));
    assert_eq!(chain.app_state.state.stake(&member), dna_str("11.2"));
}

#[test]
fn sole_proposer_without_committee_takes_the_whole_pot() {
    let proposer_key = keypair(1);
    let proposer = key_address(&proposer_key);
    let mut chain = new_blockchain(
        proposer,
        vec![GenesisSpec::identity(
            proposer,
            IdentityState::Verified,
            dna(1),
        )],
    );
    chain.commit_state().unwrap();

    let ctx = chain.prepare_block_reward_ctx(proposer, None);
    assert_eq!(ctx.proposer_stake_weight, 1.0);
    let block = reward_block(1_000);

    chain.apply_block_rewards(&dna(100), &dna(10), &block, &ctx, &mut NoopCollector);

    // 6 DNA pot + 10 DNA fee reward + 10 DNA tips = 26, split 80/20.
    let total = dna(26);
    let (balance, stake) = split_reward(&total, false, &chain.config().consensus);
    assert_eq!(chain.app_state.state.balance(&proposer), balance);
    assert_eq!(
        chain.app_state.state.stake(&proposer),
        stake.add(&dna(1))
    );
}

#[test]
fn running_penalty_withholds_reward_and_burns_elapsed_seconds() {
    let proposer_key = keypair(1);
    let proposer = key_address(&proposer_key);
    let staked = addr(&[0x3]);
    let expired = addr(&[0x5]);
    let mut chain = new_blockchain(
        proposer,
        vec![
            GenesisSpec::identity(proposer, IdentityState::Verified, dna_str("0.0005")),
            GenesisSpec::identity(staked, IdentityState::Verified, dna(25)),
            GenesisSpec::identity(expired, IdentityState::Verified, dna(100)),
        ],
    );
    chain.app_state.identity_state.set_online(proposer, true);
    chain.app_state.identity_state.set_online(staked, true);
    chain.app_state.identity_state.set_online(expired, true);
    chain.app_state.state.set_penalty_seconds(proposer, 100);
    chain.app_state.state.set_penalty_timestamp(proposer, 1450);
    chain.app_state.state.set_penalty_seconds(expired, 100);
    chain.app_state.state.set_penalty_timestamp(expired, 1000);
    chain.commit_state().unwrap();

    let committee = chain.app_state.validators_cache.online_validators();
    let ctx = chain.prepare_block_reward_ctx(proposer, Some(&committee));
    let block = reward_block(1500);

    chain.apply_block_rewards(&dna(1000), &dna(10), &block, &ctx, &mut NoopCollector);

    // The proposer's whole payment is withheld while its penalty runs; the
    // elapsed 50 seconds are charged and the clock advances.
    assert_eq!(chain.app_state.state.balance(&proposer), Coin::zero());
    assert_eq!(chain.app_state.state.stake(&proposer), dna_str("0.0005"));
    assert_eq!(chain.app_state.state.penalty_seconds(&proposer), 50);
    assert_eq!(chain.app_state.state.penalty_timestamp(&proposer), 1500);

    // A penalty whose span elapsed fully also withholds this payment, then
    // clears.
    assert_eq!(chain.app_state.state.balance(&expired), Coin::zero());
    assert_eq!(chain.app_state.state.stake(&expired), dna(100));
    assert_eq!(chain.app_state.state.penalty_seconds(&expired), 0);
    assert_eq!(chain.app_state.state.penalty_timestamp(&expired), 0);

    // The unpenalized member receives its proportional split of the pot.
    let pot = dna(6);
    let expected = mul_div_f64(
        &pot,
        block_weight(&dna(25)),
        ctx.total_stake_weight,
    );
    let (balance, stake) = split_reward(&expected, false, &chain.config().consensus);
    assert_eq!(chain.app_state.state.balance(&staked), balance);
    assert_eq!(chain.app_state.state.stake(&staked), stake.add(&dna(25)));
    assert!(!balance.is_zero());
    // 80/20 split leaves the balance at four times the stake part.
    assert_eq!(
        balance.checked_sub(&stake.mul_u64(4)).map(|rest| rest < dna_str("0.000000000000000005")),
        Some(true)
    );
}

#[test]
fn delegated_identity_reward_goes_to_the_pool_balance() {
    let proposer_key = keypair(1);
    let proposer = key_address(&proposer_key);
    let delegator = addr(&[0x2]);
    let pool = addr(&[0x9]);
    let mut chain = new_blockchain(
        proposer,
        vec![
            GenesisSpec::identity(proposer, IdentityState::Verified, dna(2)),
            GenesisSpec::identity(delegator, IdentityState::Verified, dna(10)),
        ],
    );
    chain
        .app_state
        .state
        .get_or_new_identity_mut(delegator)
        .delegatee = Some(pool);
    chain.app_state.identity_state.set_online(proposer, true);
    chain.commit_state().unwrap();

    let committee = vec![delegator];
    let ctx = chain.prepare_block_reward_ctx(proposer, Some(&committee));
    let block = reward_block(1_000);
    chain.apply_block_rewards(&Coin::zero(), &Coin::zero(), &block, &ctx, &mut NoopCollector);

    let share = mul_div_f64(&dna(6), block_weight(&dna(10)), ctx.total_stake_weight);
    let (balance, stake) = split_reward(&share, false, &chain.config().consensus);
    // The balance part follows the delegation; the stake part sticks.
    assert_eq!(chain.app_state.state.balance(&pool), balance);
    assert_eq!(chain.app_state.state.balance(&delegator), Coin::zero());
    assert_eq!(
        chain.app_state.state.stake(&delegator),
        stake.add(&dna(10))
    );
}

#[test]
fn supply_is_conserved_across_reward_application() {
    let proposer_key = keypair(1);
    let proposer = key_address(&proposer_key);
    let member = addr(&[0x1]);
    let mut chain = new_blockchain(
        proposer,
        vec![
            GenesisSpec::identity(proposer, IdentityState::Verified, dna(3)),
            GenesisSpec::identity(member, IdentityState::Verified, dna(10)),
        ],
    );
    chain.app_state.identity_state.set_online(proposer, true);
    chain.app_state.identity_state.set_online(member, true);
    chain.commit_state().unwrap();

    let supply_before = total_supply(&chain);

    let committee = chain.app_state.validators_cache.online_validators();
    let ctx = chain.prepare_block_reward_ctx(proposer, Some(&committee));
    let block = reward_block(1_000);
    let mut collector = RecordingCollector::default();
    chain.apply_block_rewards(&Coin::zero(), &Coin::zero(), &block, &ctx, &mut collector);

    // With no fees in play every credited wei is freshly minted, so the
    // supply moves by exactly the minted total.
    let supply_after = total_supply(&chain);
    assert!(collector.burnt.is_zero());
    assert!(!collector.minted.is_zero());
    assert_eq!(supply_after, supply_before.add(&collector.minted));
    // Truncating shares can only undershoot the pot, never exceed it.
    assert!(collector.minted <= dna(6));
}

fn total_supply(chain: &dna_chain::chain::Blockchain) -> Coin {
    let mut total = Coin::zero();
    for (_, account) in chain.app_state.state.iterate_accounts() {
        total.add_assign(&account.balance);
    }
    for (_, identity) in chain.app_state.state.iterate_identities() {
        total.add_assign(&identity.stake);
    }
    total
}
