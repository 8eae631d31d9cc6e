//! Typed transaction payloads. Attachments travel as canonical JSON inside
//! `Transaction::payload`, mirroring the canonical-bytes convention used for
//! signing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::TxError;

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("serializing attachment")
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, TxError> {
    serde_json::from_slice(payload)
        .map_err(|err| TxError::Validation(format!("malformed attachment: {err}")))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStatusAttachment {
    pub online: bool,
}

impl OnlineStatusAttachment {
    pub fn new(online: bool) -> Vec<u8> {
        encode(&Self { online })
    }

    pub fn parse(payload: &[u8]) -> Result<Self, TxError> {
        decode(payload)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFlipAttachment {
    pub cid: Vec<u8>,
}

impl DeleteFlipAttachment {
    pub fn new(cid: Vec<u8>) -> Vec<u8> {
        encode(&Self { cid })
    }

    pub fn parse(payload: &[u8]) -> Result<Self, TxError> {
        decode(payload)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitFlipAttachment {
    pub cid: Vec<u8>,
    pub pair: u8,
}

impl SubmitFlipAttachment {
    pub fn new(cid: Vec<u8>, pair: u8) -> Vec<u8> {
        encode(&Self { cid, pair })
    }

    pub fn parse(payload: &[u8]) -> Result<Self, TxError> {
        decode(payload)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnAttachment {
    pub key: String,
}

impl BurnAttachment {
    pub fn new(key: String) -> Vec<u8> {
        encode(&Self { key })
    }

    pub fn parse(payload: &[u8]) -> Result<Self, TxError> {
        decode(payload)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeProfileAttachment {
    pub hash: Vec<u8>,
}

impl ChangeProfileAttachment {
    pub fn new(hash: Vec<u8>) -> Vec<u8> {
        encode(&Self { hash })
    }

    pub fn parse(payload: &[u8]) -> Result<Self, TxError> {
        decode(payload)
    }
}
