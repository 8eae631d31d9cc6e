//! Per-shard outcome of a validation ceremony, handed to the epoch-close
//! reward engine by the ceremony collaborator.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{Address, IdentityState};

/// Author grade assigned to a flip by the ceremony.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipGrade {
    None,
    D,
    C,
    B,
    A,
}

impl FlipGrade {
    /// Reward weight per graded flip.
    pub fn reward_coef(self) -> f32 {
        match self {
            FlipGrade::None => 0.0,
            FlipGrade::D => 1.0,
            FlipGrade::C => 2.0,
            FlipGrade::B => 4.0,
            FlipGrade::A => 8.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipToReward {
    pub cid: Vec<u8>,
    pub grade: FlipGrade,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationAuthor {
    pub flips_to_reward: Vec<FlipToReward>,
    pub missed: bool,
    pub new_identity_state: IdentityState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessfulInvite {
    pub age: u16,
    pub tx_hash: String,
    pub epoch_height: u32,
    pub penalized: bool,
    pub invitee: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviterValidationResult {
    pub pay_invitation_reward: bool,
    pub new_identity_state: IdentityState,
    pub successful_invites: Vec<SuccessfulInvite>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reporter {
    pub address: Address,
    pub new_identity_state: IdentityState,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResults {
    pub good_authors: BTreeMap<Address, ValidationAuthor>,
    pub bad_authors: BTreeSet<Address>,
    pub good_inviters: BTreeMap<Address, InviterValidationResult>,
    /// Reporters eligible for a reward, keyed by reported flip index.
    pub reporters_to_reward_by_flip: BTreeMap<u32, Vec<Reporter>>,
}
