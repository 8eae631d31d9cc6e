use std::io;

use thiserror::Error;

/// Typed rejection reasons surfaced by the transaction validator. The set is
/// stable across versions: mempool admission and in-block validation report
/// the same kinds, and receipts reference them verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u32, got: u32 },
    #[error("invalid epoch: expected {expected}, got {got}")]
    InvalidEpoch { expected: u16, got: u16 },
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("insufficient invites")]
    InsufficientInvites,
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("invalid sender: {0}")]
    InvalidSender(String),
    #[error("duplicated transaction")]
    DuplicatedTx,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("fee is too low")]
    TxFeeTooLow,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("vm error: {0}")]
    Vm(String),
}

impl TxError {
    /// Stable discriminant used when a rejection reason crosses the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            TxError::InvalidSignature => "InvalidSignature",
            TxError::InvalidNonce { .. } => "InvalidNonce",
            TxError::InvalidEpoch { .. } => "InvalidEpoch",
            TxError::InsufficientFunds => "InsufficientFunds",
            TxError::InsufficientInvites => "InsufficientInvites",
            TxError::InvalidRecipient(_) => "InvalidRecipient",
            TxError::InvalidSender(_) => "InvalidSender",
            TxError::DuplicatedTx => "DuplicatedTx",
            TxError::QuotaExceeded => "QuotaExceeded",
            TxError::TxFeeTooLow => "TxFeeTooLow",
            TxError::Validation(_) => "ValidationError",
            TxError::Vm(_) => "VmError",
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cryptography error: {0}")]
    Crypto(String),
    #[error("transaction rejected: {0}")]
    Transaction(#[from] TxError),
    #[error("block rejected: {0}")]
    Block(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ChainResult<T> = Result<T, ChainError>;
