use serde::{Deserialize, Serialize};

use crate::num::Coin;

/// Outcome of one applied transaction. Receipts are persisted and served to
/// clients; they never feed back into state-root-affecting computation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub success: bool,
    pub gas_used: u64,
    pub fee: Coin,
    /// Stable error kind for failed effects, e.g. a contract trap.
    pub error: Option<String>,
    /// Contract-call output, empty for plain transactions.
    pub output: Vec<u8>,
}

impl Receipt {
    pub fn success(tx_hash: String, gas_used: u64, fee: Coin) -> Self {
        Self {
            tx_hash,
            success: true,
            gas_used,
            fee,
            error: None,
            output: Vec::new(),
        }
    }

    pub fn failure(tx_hash: String, gas_used: u64, fee: Coin, error: String) -> Self {
        Self {
            tx_hash,
            success: false,
            gas_used,
            fee,
            error: Some(error),
            output: Vec::new(),
        }
    }
}
