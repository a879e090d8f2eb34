//! Argon2id passphrase hardening.
//!
//! Opening a container is deliberately expensive: the work factor trades open
//! latency for brute-force resistance. Parameters are stored in the container
//! header, so they can be raised over time without breaking old files.

use crate::cipher::{ContainerKey, KEY_SIZE};
use crate::error::{ContainerError, ContainerResult};
use argon2::{Algorithm, Argon2, Params, Version};

/// Size of the KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Tunable Argon2id work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub mem_cost_kib: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Number of parallel lanes.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Creates the default hardened parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliberately weak parameters for tests and benchmarks.
    ///
    /// Never use these for real data.
    #[must_use]
    pub fn insecure_fast() -> Self {
        Self {
            mem_cost_kib: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// Derives a cipher key from a passphrase and salt.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::KdfFailed`] if the parameters are outside the
    /// ranges Argon2 accepts.
    pub fn derive_key(&self, passphrase: &str, salt: &[u8; SALT_SIZE]) -> ContainerResult<ContainerKey> {
        let params = Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| ContainerError::kdf_failed(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut bytes = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut bytes)
            .map_err(|e| ContainerError::kdf_failed(e.to_string()))?;

        Ok(ContainerKey::from_bytes(bytes))
    }
}
