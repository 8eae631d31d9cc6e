//! Disk persistence: every stored value decodes back to what went in.

mod common;

use common::*;

use tempfile::tempdir;

use dna_chain::num::Coin;
use dna_chain::state::StateLayer;
use dna_chain::storage::Storage;
use dna_chain::types::{
    Account, Block, BlockFlags, BlockHeader, Identity, IdentityState, ProposedHeader, Receipt,
};

fn sample_block(height: u64) -> Block {
    let key = keypair(1);
    let tx = sign_tx(
        &key,
        dna_chain::types::TxType::Send,
        1,
        0,
        Some(addr(&[0x2])),
    );
    Block::new(
        BlockHeader::Proposed(ProposedHeader {
            height,
            parent_hash: "ab".repeat(32),
            time: 1_234,
            proposer_pubkey: hex::encode(key.public.to_bytes()),
            tx_root: Block::tx_root(std::slice::from_ref(&tx)),
            state_root: "cd".repeat(32),
            flags: BlockFlags::default().with(BlockFlags::IDENTITY_UPDATE),
            seed: String::new(),
            offline_addr: Some(addr(&[0x9])),
        }),
        vec![tx],
    )
}

#[test]
fn blocks_and_receipts_round_trip() {
    let dir = tempdir().unwrap();
    let storage = Storage::open(dir.path()).unwrap();

    let block = sample_block(7);
    storage.store_block(&block).unwrap();
    let receipts = vec![
        Receipt::success("aa".into(), 23, dna_str("0.23")),
        Receipt::failure("bb".into(), 23, Coin::zero(), "VmError".into()),
    ];
    storage.store_receipts(7, &receipts).unwrap();

    assert_eq!(storage.read_block(7).unwrap().unwrap(), block);
    assert_eq!(storage.read_block(8).unwrap(), None);
    assert_eq!(storage.read_receipts(7).unwrap(), receipts);
    let (tip_height, tip_hash) = storage.tip().unwrap().unwrap();
    assert_eq!(tip_height, 7);
    assert_eq!(tip_hash, block.hash().to_vec());
}

#[test]
fn chain_loads_back_in_height_order() {
    let dir = tempdir().unwrap();
    let storage = Storage::open(dir.path()).unwrap();
    for height in [3u64, 1, 2] {
        storage.store_block(&sample_block(height)).unwrap();
    }
    let chain = storage.load_blockchain().unwrap();
    let heights: Vec<u64> = chain.iter().map(Block::height).collect();
    assert_eq!(heights, vec![1, 2, 3]);
}

#[test]
fn state_snapshots_round_trip() {
    let dir = tempdir().unwrap();
    let storage = Storage::open(dir.path()).unwrap();

    let mut layer = StateLayer::default();
    layer.accounts.insert(
        addr(&[0x1]),
        Account {
            balance: dna_str("12.5"),
            nonce: 4,
            epoch: 2,
        },
    );
    let mut identity = Identity::default();
    identity.state = IdentityState::Human;
    identity.stake = dna(3);
    identity.delegatee = Some(addr(&[0x2]));
    layer.identities.insert(addr(&[0x1]), identity);
    layer.globals.epoch = 2;
    layer.globals.fee_per_gas = dna_str("0.01");

    storage.store_state_snapshot(9, &layer).unwrap();
    let restored = storage.read_state_snapshot(9).unwrap().unwrap();
    assert_eq!(restored, layer);
    assert_eq!(storage.read_state_snapshot(10).unwrap(), None);
}

#[test]
fn reopening_preserves_the_schema() {
    let dir = tempdir().unwrap();
    {
        let storage = Storage::open(dir.path()).unwrap();
        storage.store_block(&sample_block(1)).unwrap();
    }
    let storage = Storage::open(dir.path()).unwrap();
    assert!(storage.read_block(1).unwrap().is_some());
}
