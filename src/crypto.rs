use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};

use crate::errors::{ChainError, ChainResult};
use crate::types::{Address, ADDRESS_LEN};

pub fn sign_message(keypair: &Keypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> ChainResult<()> {
    public_key
        .verify(message, signature)
        .map_err(|err| ChainError::Crypto(format!("signature verification failed: {err}")))
}

/// Derives the 20-byte account address from a public key.
pub fn address_from_public_key(public_key: &PublicKey) -> Address {
    let hash = blake3::hash(public_key.as_bytes());
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&hash.as_bytes()[..ADDRESS_LEN]);
    Address::new(bytes)
}

/// Builds a keypair from fixed secret bytes. Key generation and storage are
/// the keystore's concern; the core only ever reconstructs keys.
pub fn keypair_from_seed(seed: &[u8; 32]) -> ChainResult<Keypair> {
    let secret = SecretKey::from_bytes(seed)
        .map_err(|err| ChainError::Crypto(format!("invalid secret key bytes: {err}")))?;
    let public = PublicKey::from(&secret);
    Ok(Keypair { secret, public })
}

pub fn public_key_from_hex(data: &str) -> ChainResult<PublicKey> {
    let bytes = hex::decode(data)
        .map_err(|err| ChainError::Crypto(format!("invalid public key encoding: {err}")))?;
    PublicKey::from_bytes(&bytes)
        .map_err(|err| ChainError::Crypto(format!("invalid public key bytes: {err}")))
}

pub fn signature_from_hex(data: &str) -> ChainResult<Signature> {
    let bytes = hex::decode(data)
        .map_err(|err| ChainError::Crypto(format!("invalid signature encoding: {err}")))?;
    Signature::from_bytes(&bytes)
        .map_err(|err| ChainError::Crypto(format!("invalid signature bytes: {err}")))
}

pub fn signature_to_hex(signature: &Signature) -> String {
    hex::encode(signature.to_bytes())
}
