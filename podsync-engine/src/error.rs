//! Error taxonomy for the sync engine.
//!
//! Every public engine operation returns a result instead of panicking;
//! the variants map one-to-one onto the conditions the host surface has to
//! react to differently (re-prompt, block, retry indicator).

use podsync_crypto::CryptoError;
use podsync_storage::StorageError;
use podsync_types::TenantId;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An operation needing a storage target was called before
    /// `configure()`. A caller contract violation, not a runtime condition.
    #[error("engine is not configured with a storage target")]
    NotConfigured,

    /// Encryption is mandatory but no unlock secret is held. The write was
    /// refused with zero bytes persisted; it is retried once a secret
    /// appears.
    #[error("encryption required but no unlock secret is held")]
    EncryptionRequired,

    /// Wrong unlock secret or a tampered/corrupted pod — the two are
    /// indistinguishable by design. The user must re-enter the secret;
    /// nothing was applied to the local cache.
    #[error("authentication failed: wrong unlock secret or corrupted pod")]
    Authentication,

    /// The pod belongs to a different tenant than the active session.
    /// Fails closed: no load, no merge, no write.
    #[error("tenant mismatch: pod belongs to \"{bound}\", active tenant is \"{active}\"")]
    TenantMismatch { bound: TenantId, active: TenantId },

    /// The backing store failed (permission revoked, offline). Transient:
    /// retried by the next mutation or poll tick.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The pod declares a format version this build does not understand.
    #[error("unsupported pod format version: {0}")]
    FormatUnsupported(String),

    /// The pod is not valid JSON or not shaped like a pod.
    #[error("malformed pod: {0}")]
    Malformed(String),

    /// Key derivation or encryption failed internally.
    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl From<CryptoError> for SyncError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::SecretUnavailable => Self::EncryptionRequired,
            CryptoError::Decryption(_) => Self::Authentication,
            CryptoError::KeyDerivation(msg) | CryptoError::Encryption(msg) => Self::Crypto(msg),
        }
    }
}

impl From<podsync_types::Error> for SyncError {
    fn from(e: podsync_types::Error) -> Self {
        match e {
            podsync_types::Error::UnsupportedVersion(v) => Self::FormatUnsupported(v),
            podsync_types::Error::Serialization(err) => Self::Malformed(err.to_string()),
        }
    }
}
