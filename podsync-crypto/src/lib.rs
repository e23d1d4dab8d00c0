//! Encryption layer for podsync pods.
//!
//! The pod payload is sealed with ChaCha20-Poly1305 under a key derived
//! from the user's unlock secret with Argon2id. The salt travels with the
//! ciphertext; the nonce is random per encryption. Authentication is part
//! of the cipher: tampering and a wrong key are detected at open time and
//! are deliberately indistinguishable from each other.
//!
//! The [`SecretGate`] holds the volatile unlock secret. It exists so that
//! the save path has a single place to ask "may I write?" — if encryption
//! is mandatory and no secret is held, the gate refuses and nothing is
//! written.

mod cipher;
mod error;
mod key;
mod secret;

pub use cipher::{decrypt, encrypt, open_pod, seal_pod, CipherPayload, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, KdfParams, PodKey, Salt, KEY_SIZE, SALT_SIZE};
pub use secret::{SecretGate, UnlockSecret};
