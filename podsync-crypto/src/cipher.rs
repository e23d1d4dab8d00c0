//! Pod payload encryption using ChaCha20-Poly1305.
//!
//! Authenticated encryption: the Poly1305 tag makes tampering and
//! wrong-key decrypts fail at open time instead of yielding garbage.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, KdfParams, PodKey, Salt};
use crate::secret::UnlockSecret;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Size of the nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypted payload plus the nonce needed to open it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherPayload {
    /// Unique per encryption.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext including the auth tag.
    pub ciphertext: Vec<u8>,
}

impl CipherPayload {
    /// Encodes the nonce and ciphertext as the base64 pair stored in the
    /// pod envelope.
    #[must_use]
    pub fn to_base64_parts(&self) -> (String, String) {
        use base64::{engine::general_purpose::STANDARD, Engine};
        (STANDARD.encode(self.nonce), STANDARD.encode(&self.ciphertext))
    }

    /// Decodes a payload from its base64 envelope fields.
    pub fn from_base64_parts(nonce: &str, ciphertext: &str) -> CryptoResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let nonce_bytes = STANDARD
            .decode(nonce)
            .map_err(|e| CryptoError::Decryption(format!("invalid nonce: {e}")))?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| CryptoError::Decryption("invalid nonce length".to_string()))?;

        let ciphertext = STANDARD
            .decode(ciphertext)
            .map_err(|e| CryptoError::Decryption(format!("invalid ciphertext: {e}")))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Decryption("payload too short".to_string()));
        }

        Ok(Self { nonce, ciphertext })
    }
}

/// Encrypts a plaintext under a pod key with a fresh random nonce.
pub fn encrypt(key: &PodKey, plaintext: &[u8]) -> CryptoResult<CipherPayload> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(CipherPayload {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypts a payload under a pod key.
///
/// A wrong key and a tampered payload fail identically.
pub fn decrypt(key: &PodKey, payload: &CipherPayload) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(&payload.nonce);

    cipher
        .decrypt(nonce, payload.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}

/// Derives a key from the secret under a fresh salt and encrypts the
/// plaintext. Returns the salt so it can be persisted with the ciphertext.
pub fn seal_pod(
    secret: &UnlockSecret,
    params: &KdfParams,
    plaintext: &[u8],
) -> CryptoResult<(Salt, CipherPayload)> {
    let salt = Salt::random();
    let key = derive_key(secret, &salt, params)?;
    let payload = encrypt(&key, plaintext)?;
    Ok((salt, payload))
}

/// Re-derives the key from the persisted salt and decrypts the payload.
pub fn open_pod(
    secret: &UnlockSecret,
    params: &KdfParams,
    salt: &Salt,
    payload: &CipherPayload,
) -> CryptoResult<Vec<u8>> {
    let key = derive_key(secret, salt, params)?;
    decrypt(&key, payload)
}
