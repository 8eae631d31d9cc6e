mod account;
mod attachments;
mod block;
mod identity;
mod receipt;
mod transaction;
mod validation_results;

pub use account::Account;
pub use attachments::{
    BurnAttachment, ChangeProfileAttachment, DeleteFlipAttachment, OnlineStatusAttachment,
    SubmitFlipAttachment,
};
pub use block::{Block, BlockCert, BlockFlags, BlockHeader, EmptyBlockHeader, ProposedHeader};
pub use identity::{
    decode_score, encode_score, FlipMeta, Identity, IdentityState, TxAddr, ValidationTxBits,
};
pub use receipt::Receipt;
pub use transaction::{SignedTransaction, Transaction, TxType};
pub use validation_results::{
    FlipGrade, FlipToReward, InviterValidationResult, Reporter, SuccessfulInvite,
    ValidationAuthor, ValidationResults,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const ADDRESS_LEN: usize = 20;

/// 20-byte account identifier. Orders bytewise; every consensus-side map walk
/// follows this order.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const EMPTY: Address = Address([0u8; ADDRESS_LEN]);

    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds an address from a short prefix, zero-padded on the right.
    pub fn from_prefix(prefix: &[u8]) -> Self {
        let mut bytes = [0u8; ADDRESS_LEN];
        let len = prefix.len().min(ADDRESS_LEN);
        bytes[..len].copy_from_slice(&prefix[..len]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|_| ())?;
        if bytes.len() != ADDRESS_LEN {
            return Err(());
        }
        let mut data = [0u8; ADDRESS_LEN];
        data.copy_from_slice(&bytes);
        Ok(Self(data))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value
            .parse()
            .map_err(|_| serde::de::Error::custom("invalid address"))
    }
}

pub type ShardId = u16;
