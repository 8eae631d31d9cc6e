//! Delegation switch semantics: pool admission, undelegation, transitive
//! prevention, and killing delegators.

mod common;

use common::*;

use dna_chain::collector::NoopCollector;
use dna_chain::errors::TxError;
use dna_chain::num::Coin;
use dna_chain::types::{Address, IdentityState, SignedTransaction, Transaction, TxType};
use dna_chain::validation::{validate_tx, TxValidationMode};

fn addr2(a: u8, b: u8) -> Address {
    addr(&[a, b])
}

#[test]
fn delegation_switch_applies_pending_entries_in_order() {
    let god = addr(&[0xee]);
    let mut chain = new_blockchain(god, vec![]);
    chain.app_state.state.set_global_epoch(3);

    let app = &mut chain.app_state;

    // 0x1: online newbie asking to undelegate without a delegatee.
    app.state.set_identity_state(addr(&[0x1]), IdentityState::Newbie);
    app.identity_state.set_validated(addr(&[0x1]), true);
    app.identity_state.set_online(addr(&[0x1]), true);
    app.state.toggle_delegation_address(addr(&[0x1]), Address::EMPTY);

    // 0x2: verified, same no-op undelegation.
    app.state.set_identity_state(addr(&[0x2]), IdentityState::Verified);
    app.identity_state.set_validated(addr(&[0x2]), true);
    app.identity_state.set_online(addr(&[0x2]), true);
    app.state.toggle_delegation_address(addr(&[0x2]), Address::EMPTY);

    // 0x3: delegated identity undelegating for real.
    app.state.set_identity_state(addr(&[0x3]), IdentityState::Verified);
    app.state.get_or_new_identity_mut(addr(&[0x3])).delegatee = Some(addr2(0x3, 0x3));
    app.identity_state.set_validated(addr(&[0x3]), true);
    app.identity_state.set_delegatee(addr(&[0x3]), Some(addr2(0x3, 0x3)));
    app.state.toggle_delegation_address(addr(&[0x3]), Address::EMPTY);

    // 0x4: no identity record at all.
    app.state.toggle_delegation_address(addr(&[0x4]), Address::EMPTY);

    // 0x5: plain account delegating to a pool.
    app.state.toggle_delegation_address(addr(&[0x5]), addr2(0x5, 0x5));

    // 0x6: online newbie joining a pool.
    app.state.set_identity_state(addr(&[0x6]), IdentityState::Newbie);
    app.identity_state.set_validated(addr(&[0x6]), true);
    app.identity_state.set_online(addr(&[0x6]), true);
    app.state.toggle_delegation_address(addr(&[0x6]), addr2(0x6, 0x6));

    // 0x7: online human joining a pool.
    app.state.set_identity_state(addr(&[0x7]), IdentityState::Human);
    app.identity_state.set_validated(addr(&[0x7]), true);
    app.identity_state.set_online(addr(&[0x7]), true);
    app.state.toggle_delegation_address(addr(&[0x7]), addr2(0x7, 0x7));

    // 0x8: re-delegating while a pending undelegation exists.
    {
        let identity = app.state.get_or_new_identity_mut(addr(&[0x8]));
        identity.state = IdentityState::Human;
        identity.delegatee = Some(addr2(0x8, 0x8));
        identity.pending_undelegation = Some(addr2(0x8, 0x8));
        identity.delegation_epoch = 1;
    }
    app.identity_state.set_validated(addr(&[0x8]), true);
    app.identity_state.set_online(addr(&[0x8]), true);
    app.state.toggle_delegation_address(addr(&[0x8]), addr2(0x8, 0x8));

    // 0x9: delegating to a target that just undelegated itself.
    app.state.set_identity_state(addr(&[0x9]), IdentityState::Human);
    app.identity_state.set_validated(addr(&[0x9]), true);
    app.identity_state.set_online(addr(&[0x9]), true);
    {
        let target = app.state.get_or_new_identity_mut(addr2(0x9, 0x9));
        target.pending_undelegation = Some(addr(&[0x9, 0x9, 0x9]));
    }
    app.state.toggle_delegation_address(addr(&[0x9]), addr2(0x9, 0x9));

    chain.commit_state().unwrap();

    let block = identity_update_block(3, 1_000);
    let undelegations = chain.apply_delegation_switch(&block);
    chain.commit_state().unwrap();

    assert_eq!(undelegations, vec![addr(&[0x3])]);
    let app = &chain.app_state;

    // No-op undelegations leave the identities online and untouched.
    for byte in [0x1u8, 0x2] {
        assert_eq!(app.state.delegatee(&addr(&[byte])), None);
        assert_eq!(app.state.pending_undelegation(&addr(&[byte])), None);
        assert!(app.identity_state.is_online(&addr(&[byte])));
    }

    // A real undelegation clears the delegatee, records the old pool and
    // forces the identity offline for the epoch.
    assert_eq!(app.state.delegatee(&addr(&[0x3])), None);
    assert_eq!(
        app.state.pending_undelegation(&addr(&[0x3])),
        Some(addr2(0x3, 0x3))
    );
    assert_eq!(
        app.state.identity(&addr(&[0x3])).unwrap().delegation_epoch,
        3
    );
    assert_eq!(app.identity_state.delegatee(&addr(&[0x3])), None);
    assert!(!app.identity_state.is_online(&addr(&[0x3])));
    assert!(app.validators_cache.is_discriminated(&addr(&[0x3])));

    assert_eq!(app.state.delegatee(&addr(&[0x4])), None);
    assert_eq!(app.state.pending_undelegation(&addr(&[0x4])), None);

    // An unvalidated account gets the state-side delegation only.
    assert_eq!(app.state.delegatee(&addr(&[0x5])), Some(addr2(0x5, 0x5)));
    assert_eq!(
        app.state.identity(&addr(&[0x5])).unwrap().delegation_epoch,
        3
    );
    assert_eq!(app.identity_state.delegatee(&addr(&[0x5])), None);
    assert!(!app.identity_state.is_online(&addr(&[0x5])));

    // Validated members join their pools and go offline.
    for byte in [0x6u8, 0x7, 0x8] {
        let pool = addr2(byte, byte);
        assert_eq!(app.state.delegatee(&addr(&[byte])), Some(pool));
        assert_eq!(
            app.state.identity(&addr(&[byte])).unwrap().delegation_epoch,
            3
        );
        assert_eq!(app.state.pending_undelegation(&addr(&[byte])), None);
        assert_eq!(app.identity_state.delegatee(&addr(&[byte])), Some(pool));
        assert!(!app.identity_state.is_online(&addr(&[byte])));
    }

    // A pool of only newbies is withheld from consensus; a human member keeps
    // its pool undiscriminated.
    assert!(app.validators_cache.is_discriminated(&addr(&[0x6])));
    assert!(app.validators_cache.is_discriminated(&addr2(0x6, 0x6)));
    assert!(!app.validators_cache.is_discriminated(&addr(&[0x7])));
    assert!(!app.validators_cache.is_discriminated(&addr2(0x7, 0x7)));
    assert!(!app.validators_cache.is_discriminated(&addr(&[0x8])));
    assert!(!app.validators_cache.is_discriminated(&addr2(0x8, 0x8)));

    // Delegating to a fresh undelegator is rejected silently.
    assert_eq!(app.state.delegatee(&addr(&[0x9])), None);
    assert_eq!(app.state.pending_undelegation(&addr(&[0x9])), None);
    assert!(app.identity_state.is_online(&addr(&[0x9])));

    assert!(app.state.delegations().is_empty());
}

#[test]
fn delegating_to_a_pool_head_is_rejected_at_the_switch() {
    let god = addr(&[0xee]);
    let mut chain = new_blockchain(god, vec![]);
    let member = addr(&[0x1]);
    let pool = addr(&[0x2]);
    let elsewhere = addr(&[0x3]);

    chain.app_state.identity_state.set_validated(member, true);
    chain.app_state.identity_state.set_delegatee(member, Some(pool));
    chain.app_state.state.set_identity_state(pool, IdentityState::Verified);
    chain.app_state.identity_state.set_validated(pool, true);
    // The pool head itself asks to delegate elsewhere.
    chain.app_state.state.toggle_delegation_address(pool, elsewhere);
    chain.commit_state().unwrap();

    let block = identity_update_block(3, 1_000);
    chain.apply_delegation_switch(&block);

    assert_eq!(chain.app_state.state.delegatee(&pool), None);
    assert!(chain.app_state.state.delegations().is_empty());
}

#[test]
fn delegate_tx_preconditions() {
    let key = keypair(5);
    let sender = key_address(&key);
    let pool = addr(&[0x2]);
    let mut chain = new_blockchain(
        sender,
        vec![GenesisSpec {
            address: sender,
            state: Some(IdentityState::Newbie),
            balance: dna(1000),
            stake: Coin::zero(),
        }],
    );
    chain.commit_state().unwrap();
    let conf = chain.config().consensus.clone();

    // Self-delegation is refused outright.
    let self_tx = sign_tx(&key, TxType::Delegate, 1, 0, Some(sender));
    assert!(matches!(
        validate_tx(&chain.app_state, &self_tx, &conf, TxValidationMode::MempoolTx),
        Err(TxError::InvalidRecipient(_))
    ));

    // Delegating to an identity that itself delegates is transitive.
    chain.app_state.state.get_or_new_identity_mut(pool).delegatee = Some(addr(&[0x9]));
    let transitive = sign_tx(&key, TxType::Delegate, 1, 0, Some(pool));
    assert!(matches!(
        validate_tx(&chain.app_state, &transitive, &conf, TxValidationMode::MempoolTx),
        Err(TxError::InvalidRecipient(_))
    ));

    // A clean target is accepted.
    let clean = sign_tx(&key, TxType::Delegate, 1, 0, Some(addr(&[0x3])));
    validate_tx(&chain.app_state, &clean, &conf, TxValidationMode::MempoolTx).unwrap();
}

#[test]
fn undelegate_requires_matching_epoch() {
    let key = keypair(6);
    let sender = key_address(&key);
    let mut chain = new_blockchain(
        sender,
        vec![GenesisSpec {
            address: sender,
            state: Some(IdentityState::Verified),
            balance: dna(1000),
            stake: Coin::zero(),
        }],
    );
    chain.app_state.state.get_or_new_identity_mut(sender).delegatee = Some(addr(&[0x2]));
    chain.app_state.state.set_global_epoch(1);
    chain.commit_state().unwrap();
    let conf = chain.config().consensus.clone();

    let stale = sign_tx(&key, TxType::Undelegate, 1, 0, None);
    assert!(matches!(
        validate_tx(&chain.app_state, &stale, &conf, TxValidationMode::MempoolTx),
        Err(TxError::InvalidEpoch { expected: 1, got: 0 })
    ));

    let current = sign_tx(&key, TxType::Undelegate, 1, 1, None);
    validate_tx(&chain.app_state, &current, &conf, TxValidationMode::MempoolTx).unwrap();
}

#[test]
fn kill_delegator_empties_the_pool_and_preserves_residue() {
    let pool_key = keypair(8);
    let pool = key_address(&pool_key);
    let delegator = addr(&[0x4]);
    let mut chain = new_blockchain(
        pool,
        vec![
            GenesisSpec {
                address: pool,
                state: Some(IdentityState::Newbie),
                balance: dna(1000),
                stake: Coin::zero(),
            },
            GenesisSpec::identity(delegator, IdentityState::Newbie, dna(10)),
        ],
    );
    {
        let identity = chain.app_state.state.get_or_new_identity_mut(delegator);
        identity.delegatee = Some(pool);
        identity.profile_hash = vec![0x1];
        identity.penalty_seconds = 1;
        identity.penalty_timestamp = 2;
        identity.delegation_nonce = 3;
    }
    chain.app_state.identity_state.set_online(pool, true);
    chain.app_state.identity_state.set_delegatee(delegator, Some(pool));
    chain.commit_state().unwrap();
    assert!(chain.app_state.validators_cache.is_pool(&pool));

    let tx = Transaction::new(TxType::KillDelegator, 1, 0, Some(delegator)).with_max_fee(dna(50));
    let signed = SignedTransaction::sign(tx, &pool_key);
    let block = chain.build_block(100, hex::encode(pool_key.public.to_bytes()), vec![signed]);
    chain.apply_block(&block, &mut NoopCollector).unwrap();

    assert_eq!(chain.app_state.validators_cache.pool_size(&pool), 0);
    assert!(!chain.app_state.validators_cache.is_pool(&pool));
    assert!(chain.app_state.validators_cache.is_online_identity(&pool));

    // The killed record demoted to Undefined but kept its profile; the
    // inspected attributes were erased at commit.
    let survivor = chain.app_state.state.identity(&delegator).unwrap();
    assert_eq!(survivor.state, IdentityState::Undefined);
    assert_eq!(survivor.profile_hash, vec![0x1]);
    assert_eq!(survivor.penalty_seconds, 0);
    assert_eq!(survivor.penalty_timestamp, 0);
    assert_eq!(survivor.delegation_nonce, 0);
    // The delegator's stake unlocked into its own balance.
    assert_eq!(chain.app_state.state.balance(&delegator), dna(10));
}
