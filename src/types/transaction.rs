use ed25519_dalek::{Keypair, PublicKey, Signature};
use serde::{Deserialize, Serialize};

use crate::crypto::{
    address_from_public_key, public_key_from_hex, signature_from_hex, signature_to_hex,
    sign_message, verify_signature,
};
use crate::errors::{ChainError, ChainResult, TxError};
use crate::num::Coin;

use super::Address;

/// Transaction kinds with their wire tags. Tag numbers are a consensus
/// constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    Send = 1,
    Activation = 2,
    Invite = 3,
    Kill = 4,
    SubmitFlip = 5,
    SubmitAnswersHash = 6,
    SubmitShortAnswers = 7,
    SubmitLongAnswers = 8,
    Evidence = 9,
    OnlineStatus = 10,
    KillInvitee = 11,
    ChangeGodAddress = 12,
    Burn = 13,
    ChangeProfile = 14,
    DeleteFlip = 15,
    DeployContract = 16,
    CallContract = 17,
    TerminateContract = 18,
    Delegate = 19,
    Undelegate = 20,
    KillDelegator = 21,
    StoreToIpfs = 22,
    ReplenishStake = 23,
}

impl TxType {
    /// Ceremony transactions recorded in the identity's validation bitset.
    pub fn validation_bit(self) -> Option<u8> {
        match self {
            TxType::SubmitAnswersHash => Some(1),
            TxType::SubmitShortAnswers => Some(2),
            TxType::SubmitLongAnswers => Some(4),
            TxType::Evidence => Some(8),
            _ => None,
        }
    }

    pub fn is_contract(self) -> bool {
        matches!(
            self,
            TxType::DeployContract | TxType::CallContract | TxType::TerminateContract
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_type: TxType,
    pub nonce: u32,
    pub epoch: u16,
    pub to: Option<Address>,
    pub amount: Coin,
    pub max_fee: Coin,
    pub tips: Coin,
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(tx_type: TxType, nonce: u32, epoch: u16, to: Option<Address>) -> Self {
        Self {
            tx_type,
            nonce,
            epoch,
            to,
            amount: Coin::zero(),
            max_fee: Coin::zero(),
            tips: Coin::zero(),
            payload: Vec::new(),
        }
    }

    pub fn with_amount(mut self, amount: Coin) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_max_fee(mut self, max_fee: Coin) -> Self {
        self.max_fee = max_fee;
        self
    }

    pub fn with_tips(mut self, tips: Coin) -> Self {
        self.tips = tips;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("serializing transaction")
    }

    pub fn hash(&self) -> [u8; 32] {
        *blake3::hash(&self.canonical_bytes()).as_bytes()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub payload: Transaction,
    pub public_key: String,
    pub signature: String,
}

impl SignedTransaction {
    pub fn sign(payload: Transaction, keypair: &Keypair) -> Self {
        let signature = sign_message(keypair, &payload.canonical_bytes());
        Self {
            payload,
            public_key: hex::encode(keypair.public.to_bytes()),
            signature: signature_to_hex(&signature),
        }
    }

    /// Sender address recovered from the signing key.
    pub fn from(&self) -> ChainResult<Address> {
        Ok(address_from_public_key(&self.public_key()?))
    }

    pub fn public_key(&self) -> ChainResult<PublicKey> {
        public_key_from_hex(&self.public_key)
    }

    pub fn verify(&self) -> Result<(), TxError> {
        let run = || -> ChainResult<()> {
            let public_key = self.public_key()?;
            let signature: Signature = signature_from_hex(&self.signature)?;
            verify_signature(&public_key, &self.payload.canonical_bytes(), &signature)
        };
        run().map_err(|_: ChainError| TxError::InvalidSignature)
    }

    pub fn hash(&self) -> [u8; 32] {
        self.payload.hash()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }
}
