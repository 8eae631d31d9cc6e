use serde::{Deserialize, Serialize};

use super::Address;
use crate::num::Coin;

/// Identity lifecycle states. Discriminants are a consensus constant and must
/// not be reordered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IdentityState {
    #[default]
    Undefined = 0,
    Invite = 1,
    Candidate = 2,
    Verified = 3,
    Suspended = 4,
    Killed = 5,
    Zombie = 6,
    Newbie = 7,
    Human = 8,
}

impl IdentityState {
    pub fn newbie_or_better(self) -> bool {
        matches!(
            self,
            IdentityState::Newbie | IdentityState::Verified | IdentityState::Human
        )
    }

    /// States a Kill transaction may leave from.
    pub fn killable(self) -> bool {
        matches!(
            self,
            IdentityState::Newbie
                | IdentityState::Verified
                | IdentityState::Human
                | IdentityState::Suspended
                | IdentityState::Zombie
        )
    }
}

/// Link between an identity and the transaction that created the relation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAddr {
    pub address: Address,
    pub tx_hash: String,
    pub epoch_height: u32,
}

/// Flip authored by an identity, addressed by CID in the blob store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipMeta {
    pub cid: Vec<u8>,
    pub pair: u8,
}

/// Bitset of ceremony transactions submitted this epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTxBits(u8);

impl ValidationTxBits {
    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn insert(&mut self, bit: u8) {
        self.0 |= bit;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Encodes a ceremony score as one byte: the low nibble holds the achieved
/// points in half-point units, the high nibble the number of answered flips.
pub fn encode_score(half_points: u8, flips: u8) -> u8 {
    debug_assert!(half_points <= 15 && flips <= 15);
    (half_points & 0x0f) | (flips << 4)
}

pub fn decode_score(encoded: u8) -> (u8, u8) {
    (encoded & 0x0f, encoded >> 4)
}

/// Number of ceremony scores an identity keeps.
pub const SCORE_WINDOW: usize = 10;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub state: IdentityState,
    pub stake: Coin,
    /// Portion of `stake` added through replenishment; never exceeds `stake`.
    pub replenished_stake: Coin,
    pub invites: u8,
    /// Epoch of the first Newbie transition.
    pub birthday: u16,
    pub scores: Vec<u8>,
    pub delegatee: Option<Address>,
    pub pending_undelegation: Option<Address>,
    pub delegation_epoch: u16,
    pub delegation_nonce: u32,
    pub profile_hash: Vec<u8>,
    pub penalty_seconds: u16,
    pub penalty_timestamp: i64,
    /// 1-based shard assignment; 0 means unassigned.
    pub shard_id: u16,
    pub flips: Vec<FlipMeta>,
    pub invitees: Vec<TxAddr>,
    pub inviter: Option<TxAddr>,
    pub validation_txs: ValidationTxBits,
    /// Opaque payload preserved across Kill.
    pub metadata: Vec<u8>,
}

impl Identity {
    pub fn add_score(&mut self, encoded: u8) {
        self.scores.push(encoded);
        if self.scores.len() > SCORE_WINDOW {
            let drop = self.scores.len() - SCORE_WINDOW;
            self.scores.drain(..drop);
        }
    }

    /// Ratio of achieved to achievable points over the score window, in
    /// thousandths to keep the ordering exact.
    pub fn total_score_permille(&self) -> u32 {
        let mut achieved = 0u32;
        let mut possible = 0u32;
        for &encoded in &self.scores {
            let (half_points, flips) = decode_score(encoded);
            achieved += u32::from(half_points);
            possible += 2 * u32::from(flips);
        }
        if possible == 0 {
            return 0;
        }
        achieved * 1000 / possible
    }

    pub fn has_flip(&self, cid: &[u8]) -> bool {
        self.flips.iter().any(|flip| flip.cid == cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_encoding_round_trips() {
        let encoded = encode_score(11, 6); // 5.5 points out of 6 flips
        assert_eq!(decode_score(encoded), (11, 6));
    }

    #[test]
    fn total_score_matches_known_ratios() {
        let mut identity = Identity::default();
        for encoded in [
            encode_score(12, 6),
            encode_score(12, 6),
            encode_score(12, 6),
            encode_score(11, 6),
        ] {
            identity.add_score(encoded);
        }
        // 47 of 48 half-points.
        assert_eq!(identity.total_score_permille(), 979);

        let mut identity = Identity::default();
        identity.add_score(encode_score(10, 6));
        assert_eq!(identity.total_score_permille(), 833);
    }

    #[test]
    fn score_window_drops_oldest() {
        let mut identity = Identity::default();
        for i in 0..12u8 {
            identity.add_score(encode_score(i % 12, 6));
        }
        assert_eq!(identity.scores.len(), SCORE_WINDOW);
        assert_eq!(decode_score(identity.scores[0]).0, 2);
    }

    #[test]
    fn killable_states() {
        assert!(IdentityState::Verified.killable());
        assert!(IdentityState::Zombie.killable());
        assert!(!IdentityState::Killed.killable());
        assert!(!IdentityState::Candidate.killable());
        assert!(!IdentityState::Invite.killable());
    }
}
