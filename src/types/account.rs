use serde::{Deserialize, Serialize};

use crate::num::Coin;

/// Balance-carrying account record. Accounts are keyed by address in the
/// state store and created lazily on first credit; `epoch` tracks the last
/// epoch the account transacted in, which restarts the nonce sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: Coin,
    pub nonce: u32,
    pub epoch: u16,
}

impl Account {
    pub fn credit(&mut self, amount: &Coin) {
        self.balance.add_assign(amount);
    }

    pub fn debit(&mut self, amount: &Coin) -> bool {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                true
            }
            None => false,
        }
    }
}
