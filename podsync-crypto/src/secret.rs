//! The volatile unlock secret and the gate that guards writes on it.
//!
//! The secret lives only in process memory. It is never serialized, its
//! `Debug` output is redacted, and it is zeroed both on drop and when the
//! gate is explicitly cleared on reset or sign-out.

use crate::error::{CryptoError, CryptoResult};
use std::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The user's unlock secret (a passphrase or a passkey-derived value).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UnlockSecret {
    bytes: Vec<u8>,
}

impl UnlockSecret {
    /// Wraps raw secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Wraps a passphrase.
    pub fn from_passphrase(passphrase: impl AsRef<str>) -> Self {
        Self {
            bytes: passphrase.as_ref().as_bytes().to_vec(),
        }
    }

    /// Exposes the secret bytes to the key-derivation path.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for UnlockSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Holds the optional unlock secret and answers the save path's single
/// question: is there a secret to encrypt with right now?
///
/// This gate is the defense against the bug class where a refactor forgets
/// to thread the secret through: the write path consults the gate instead
/// of trusting its arguments, and refuses rather than writing plaintext.
#[derive(Debug, Default)]
pub struct SecretGate {
    secret: RwLock<Option<UnlockSecret>>,
}

impl SecretGate {
    /// Creates an empty (locked) gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret, replacing (and zeroizing) any previous one.
    pub fn set(&self, secret: UnlockSecret) {
        let mut guard = self.secret.write().expect("secret gate poisoned");
        if let Some(mut old) = guard.replace(secret) {
            old.zeroize();
        }
    }

    /// Clears and zeroizes the held secret.
    pub fn clear(&self) {
        let mut guard = self.secret.write().expect("secret gate poisoned");
        if let Some(mut old) = guard.take() {
            old.zeroize();
        }
    }

    /// True if a secret is currently held.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.secret.read().expect("secret gate poisoned").is_some()
    }

    /// Returns a copy of the secret, or refuses with
    /// [`CryptoError::SecretUnavailable`].
    pub fn require(&self) -> CryptoResult<UnlockSecret> {
        self.secret
            .read()
            .expect("secret gate poisoned")
            .clone()
            .ok_or(CryptoError::SecretUnavailable)
    }
}
