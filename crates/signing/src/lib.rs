//! Signer recovery for signed requests.
//!
//! Clients sign the Keccak-256 digest of a payload's canonical bytes with
//! their secp256k1 key and attach the 65-byte `r || s || v` signature in
//! hex. The server recovers the public key from the digest and signature
//! and derives the account address from it, so requests carry no separate
//! identity field that could be forged.

use common_types::{keccak256, Address, Signable};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("payload serialization: {0}")]
    Canonical(#[from] serde_json::Error),
    #[error("no public key recovers from the signature")]
    Recovery,
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Keccak digest of the payload's canonical bytes; the value clients sign.
pub fn payload_digest<T: Signable>(payload: &T) -> Result<[u8; 32], SignatureError> {
    Ok(keccak256(&payload.canonical_bytes()?))
}

/// Recover the account address that signed `payload`.
///
/// The recovery id accepts both the raw 0/1 form and the 27/28 form used
/// by most wallet tooling.
pub fn recover<T: Signable>(signature_hex: &str, payload: &T) -> Result<Address, SignatureError> {
    let raw = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    if raw.len() != 65 {
        return Err(SignatureError::Malformed(format!(
            "expected 65 bytes, got {}",
            raw.len()
        )));
    }
    let v = if raw[64] >= 27 { raw[64] - 27 } else { raw[64] };
    let recovery_id =
        RecoveryId::from_byte(v).ok_or_else(|| SignatureError::Malformed(format!("recovery id {v}")))?;
    let signature =
        Signature::from_slice(&raw[..64]).map_err(|e| SignatureError::Malformed(e.to_string()))?;

    let digest = payload_digest(payload)?;
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| SignatureError::Recovery)?;
    Ok(address_of(&key))
}

/// Sign `payload` with `key`, producing the hex `r || s || v` signature the
/// server expects. This is the client half of [`recover`]; the server only
/// uses it in tests.
pub fn sign<T: Signable>(key: &SigningKey, payload: &T) -> Result<String, SignatureError> {
    let digest = payload_digest(payload)?;
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| SignatureError::Signing(e.to_string()))?;
    let mut raw = signature.to_vec();
    raw.push(recovery_id.to_byte());
    Ok(hex::encode(raw))
}

/// The account address of a public key: the last 20 bytes of the keccak
/// digest of the uncompressed curve point.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    Address::from_digest(keccak256(&point.as_bytes()[1..]))
}
