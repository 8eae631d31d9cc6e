//! Gas accounting and the per-block fee curve.

use crate::num::Coin;
use crate::types::{Transaction, TxType};

/// Gas a block aims to carry; the fee curve is anchored to it.
pub const TARGET_GAS: u64 = 51_200;

/// Sensitivity of the fee curve, as the denominator of 1/k.
const FEE_SENSITIVITY_INV: u64 = 8;

/// Base gas units of a signed transaction without payload.
const TX_BASE_GAS: u64 = 23;

/// Gas units consumed by a transaction. Ceremony and exit transactions are
/// free so that an identity can always leave or validate.
pub fn calculate_gas(tx: &Transaction) -> u64 {
    match tx.tx_type {
        TxType::Kill
        | TxType::Activation
        | TxType::SubmitFlip
        | TxType::SubmitAnswersHash
        | TxType::SubmitShortAnswers
        | TxType::SubmitLongAnswers
        | TxType::Evidence => 0,
        _ => TX_BASE_GAS + tx.payload.len() as u64,
    }
}

/// Smallest fee-per-gas the network accepts: 0.01 DNA shared across the
/// network, 0.01 DNA flat while the network is empty.
pub fn min_fee_per_gas(network_size: usize) -> Coin {
    Coin::from_dna(1)
        .div_u64(100)
        .div_u64(network_size.max(1) as u64)
}

/// Full fee of a transaction at the current gas price.
pub fn calculate_fee(fee_per_gas: &Coin, tx: &Transaction) -> Coin {
    fee_per_gas.mul_u64(calculate_gas(tx))
}

/// Everything a sender must be able to afford.
pub fn calculate_cost(fee_per_gas: &Coin, tx: &Transaction) -> Coin {
    tx.amount.add(&tx.tips).add(&calculate_fee(fee_per_gas, tx))
}

/// Smooths the gas price toward the target load:
/// `f' = f * (1 + (used/target - 1)/8)`, evaluated exactly as
/// `f * (7*target + used) / (8*target)` and floored at the network minimum.
pub fn next_fee_per_gas(current: &Coin, used_gas: u64, network_size: usize) -> Coin {
    let floor = min_fee_per_gas(network_size);
    let current = if current < &floor { &floor } else { current };
    let numerator = (FEE_SENSITIVITY_INV - 1) * TARGET_GAS + used_gas;
    let next = current
        .mul_u64(numerator)
        .div_u64(FEE_SENSITIVITY_INV * TARGET_GAS);
    next.max(floor)
}
