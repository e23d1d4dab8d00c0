//! Error types for the encryption layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed. Wrong key, tampered ciphertext and a truncated
    /// payload all land here — callers must not be able to tell them apart.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// No unlock secret is currently held. Distinct from [`Decryption`]:
    /// the caller should prompt for the secret, not report a wrong one.
    ///
    /// [`Decryption`]: CryptoError::Decryption
    #[error("no unlock secret is held")]
    SecretUnavailable,
}
