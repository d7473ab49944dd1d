//! The generic signed request envelope.
//!
//! A type is signable iff it produces its canonical byte form
//! deterministically; those bytes are what the client signed and what the
//! server hashes for signer recovery. The canonical form is the JSON
//! encoding of the payload with fields in declaration order and unset
//! fields omitted, so client and server serializations agree.

use serde::{Deserialize, Serialize};

use crate::{Address, Funding, Market, Order};

/// Capability of producing deterministic canonical bytes for signing.
pub trait Signable: Serialize {
    fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Signable for Order {}
impl Signable for Market {}
impl Signable for Funding {}

/// A payload together with the hex-encoded signature over its canonical
/// bytes. `from` is never read from the wire; it is populated by the
/// server after signer recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRequest<T> {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(skip)]
    pub from: Option<Address>,
    pub payload: T,
}

impl<T> SignedRequest<T> {
    pub fn new(payload: T, signature: String) -> Self {
        Self {
            signature,
            from: None,
            payload,
        }
    }
}
