//! AES-256-GCM encryption of the padded document.

use crate::error::{ContainerError, ContainerResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A derived container key.
///
/// Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContainerKey {
    bytes: [u8; KEY_SIZE],
}

impl ContainerKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Never log or persist the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Encrypts a plaintext under a fresh random nonce.
    ///
    /// Output is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> ContainerResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.bytes));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ContainerError::encryption_failed("encryption error"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(ciphertext);
        Ok(out)
    }

    /// Decrypts data produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// [`ContainerError::Corrupt`] if the input is too short to contain a
    /// nonce and tag; [`ContainerError::WrongPassphrase`] if authentication
    /// fails.
    pub fn decrypt(&self, data: &[u8]) -> ContainerResult<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ContainerError::corrupt("ciphertext too short"));
        }

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.bytes));
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

        cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| ContainerError::WrongPassphrase)
    }
}

impl std::fmt::Debug for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
