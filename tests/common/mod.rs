//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use ed25519_dalek::Keypair;

use dna_chain::chain::Blockchain;
use dna_chain::config::{GenesisAccount, GenesisConfig, NodeConfig};
use dna_chain::crypto::{address_from_public_key, keypair_from_seed};
use dna_chain::num::Coin;
use dna_chain::types::{
    Address, Block, BlockFlags, BlockHeader, EmptyBlockHeader, IdentityState, SignedTransaction,
    Transaction, TxType,
};

pub fn addr(prefix: &[u8]) -> Address {
    Address::from_prefix(prefix)
}

pub fn keypair(seed: u8) -> Keypair {
    keypair_from_seed(&[seed; 32]).expect("test keypair")
}

pub fn key_address(keypair: &Keypair) -> Address {
    address_from_public_key(&keypair.public)
}

pub fn dna(value: u64) -> Coin {
    Coin::from_dna(value)
}

pub fn dna_str(value: &str) -> Coin {
    Coin::from_dna_str(value).expect("test amount")
}

pub struct GenesisSpec {
    pub address: Address,
    pub state: Option<IdentityState>,
    pub balance: Coin,
    pub stake: Coin,
}

impl GenesisSpec {
    pub fn identity(address: Address, state: IdentityState, stake: Coin) -> Self {
        Self {
            address,
            state: Some(state),
            balance: Coin::zero(),
            stake,
        }
    }

    pub fn account(address: Address, balance: Coin) -> Self {
        Self {
            address,
            state: None,
            balance,
            stake: Coin::zero(),
        }
    }
}

pub fn test_config(god: Address, alloc: Vec<GenesisSpec>) -> NodeConfig {
    let accounts = alloc
        .into_iter()
        .map(|spec| GenesisAccount {
            address: spec.address.to_string(),
            balance: Some(spec.balance.to_string()),
            stake: Some(spec.stake.to_string()),
            state: spec.state,
        })
        .collect();
    NodeConfig {
        genesis: GenesisConfig {
            god_address: god.to_string(),
            accounts,
            ..GenesisConfig::default()
        },
        ..NodeConfig::default()
    }
}

pub fn new_blockchain(god: Address, alloc: Vec<GenesisSpec>) -> Blockchain {
    Blockchain::new(test_config(god, alloc)).expect("test blockchain")
}

/// An identity-update marker block for driving the switch engines directly.
pub fn identity_update_block(height: u64, time: i64) -> Block {
    Block::new(
        BlockHeader::Empty(EmptyBlockHeader {
            height,
            parent_hash: String::new(),
            time,
            state_root: String::new(),
            flags: BlockFlags::default().with(BlockFlags::IDENTITY_UPDATE),
        }),
        Vec::new(),
    )
}

pub fn sign_tx(
    keypair: &Keypair,
    tx_type: TxType,
    nonce: u32,
    epoch: u16,
    to: Option<Address>,
) -> SignedTransaction {
    SignedTransaction::sign(
        Transaction::new(tx_type, nonce, epoch, to).with_max_fee(dna(50)),
        keypair,
    )
}
