//! The on-disk pod container.
//!
//! A pod file is a single JSON document: either the plaintext snapshot
//! itself, or an encrypted container whose ciphertext decrypts to the
//! snapshot JSON. The key-derivation salt travels with the ciphertext so
//! any device holding the passphrase can re-derive the key.

use crate::snapshot::{gate_format_version, FormatVersion, Snapshot, CURRENT_FORMAT_VERSION};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The encrypted pod container. All binary fields are base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPod {
    /// Version of the snapshot inside the ciphertext.
    pub format_version: FormatVersion,
    /// Always true; distinguishes the container from a plaintext snapshot.
    pub encrypted: bool,
    /// Key-derivation salt, base64.
    pub salt: String,
    /// AEAD nonce, base64.
    pub nonce: String,
    /// Ciphertext (including auth tag), base64.
    pub ciphertext: String,
}

impl EncryptedPod {
    /// Wraps encryption output in a container at the current version.
    #[must_use]
    pub fn new(salt: String, nonce: String, ciphertext: String) -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            encrypted: true,
            salt,
            nonce,
            ciphertext,
        }
    }
}

/// A decoded pod file: plaintext snapshot or encrypted container.
#[derive(Debug, Clone, PartialEq)]
pub enum PodFile {
    Plain(Snapshot),
    Encrypted(EncryptedPod),
}

impl PodFile {
    /// Parses a pod file, gating on the format version before anything
    /// else. A file claiming `encrypted: true` must carry a ciphertext.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        gate_format_version(&value)?;

        let is_encrypted = value
            .get("encrypted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            && value.get("ciphertext").is_some();

        if is_encrypted {
            Ok(Self::Encrypted(serde_json::from_value(value)?))
        } else {
            Ok(Self::Plain(serde_json::from_value(value)?))
        }
    }

    /// Serializes the pod file to its JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Plain(snapshot) => snapshot.encode(),
            Self::Encrypted(pod) => Ok(serde_json::to_vec(pod)?),
        }
    }
}
