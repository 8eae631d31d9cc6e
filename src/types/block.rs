use serde::{Deserialize, Serialize};

use super::{Address, SignedTransaction};

/// Header flag bits. The values are a consensus constant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFlags(pub u32);

impl BlockFlags {
    pub const IDENTITY_UPDATE: u32 = 1 << 0;
    pub const FLIP_LOTTERY_STARTED: u32 = 1 << 1;
    pub const SHORT_SESSION_STARTED: u32 = 1 << 2;
    pub const LONG_SESSION_STARTED: u32 = 1 << 3;
    pub const AFTER_LONG_SESSION_STARTED: u32 = 1 << 4;
    pub const VALIDATION_FINISHED: u32 = 1 << 5;
    pub const SNAPSHOT: u32 = 1 << 6;
    pub const OFFLINE_PROPOSE: u32 = 1 << 7;
    pub const OFFLINE_COMMIT: u32 = 1 << 8;

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn with(self, flag: u32) -> Self {
        Self(self.0 | flag)
    }
}

/// Header of a block produced by a VRF-selected proposer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedHeader {
    pub height: u64,
    pub parent_hash: String,
    pub time: i64,
    pub proposer_pubkey: String,
    pub tx_root: String,
    pub state_root: String,
    pub flags: BlockFlags,
    pub seed: String,
    /// Identity reported offline by the proposer, if any.
    pub offline_addr: Option<Address>,
}

/// Header of a timeout block carrying no proposer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyBlockHeader {
    pub height: u64,
    pub parent_hash: String,
    pub time: i64,
    pub state_root: String,
    pub flags: BlockFlags,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockHeader {
    Proposed(ProposedHeader),
    Empty(EmptyBlockHeader),
}

impl BlockHeader {
    pub fn height(&self) -> u64 {
        match self {
            BlockHeader::Proposed(header) => header.height,
            BlockHeader::Empty(header) => header.height,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            BlockHeader::Proposed(header) => header.time,
            BlockHeader::Empty(header) => header.time,
        }
    }

    pub fn flags(&self) -> BlockFlags {
        match self {
            BlockHeader::Proposed(header) => header.flags,
            BlockHeader::Empty(header) => header.flags,
        }
    }

    pub fn parent_hash(&self) -> &str {
        match self {
            BlockHeader::Proposed(header) => &header.parent_hash,
            BlockHeader::Empty(header) => &header.parent_hash,
        }
    }

    pub fn state_root(&self) -> &str {
        match self {
            BlockHeader::Proposed(header) => &header.state_root,
            BlockHeader::Empty(header) => &header.state_root,
        }
    }

    pub fn proposer_pubkey(&self) -> Option<&str> {
        match self {
            BlockHeader::Proposed(header) => Some(&header.proposer_pubkey),
            BlockHeader::Empty(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BlockHeader::Empty(_))
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("serializing block header")
    }

    pub fn hash(&self) -> [u8; 32] {
        *blake3::hash(&self.canonical_bytes()).as_bytes()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }
}

/// Aggregated vote of a final-committee member, as emitted by the BFT engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertVote {
    pub voter: Address,
    pub signature: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCert {
    pub round: u64,
    pub votes: Vec<CertVote>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<SignedTransaction>,
    pub cert: Option<BlockCert>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<SignedTransaction>) -> Self {
        Self {
            header,
            transactions,
            cert: None,
        }
    }

    pub fn height(&self) -> u64 {
        self.header.height()
    }

    pub fn hash(&self) -> [u8; 32] {
        self.header.hash()
    }

    /// Deterministic root over the body transactions.
    pub fn tx_root(transactions: &[SignedTransaction]) -> String {
        let mut hasher = blake3::Hasher::new();
        for tx in transactions {
            hasher.update(&tx.hash());
        }
        hex::encode(hasher.finalize().as_bytes())
    }
}
