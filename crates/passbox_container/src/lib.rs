//! # Passbox Container
//!
//! Encrypted on-disk container codec for Passbox.
//!
//! A container holds one serialized database document, encrypted as a whole.
//! This crate does not interpret the plaintext; it only provides:
//!
//! - Argon2id passphrase hardening with a tunable work factor
//! - AES-256-GCM authenticated encryption
//! - Plaintext padding to a fixed block size (length-leakage reduction)
//! - Atomic write-temp-then-rename persistence
//!
//! ## File layout
//!
//! ```text
//! magic (4) | version (2) | mem_cost_kib (4) | time_cost (4) | parallelism (4)
//! | salt (16) | nonce (12) | ciphertext + tag
//! ```
//!
//! All integers are little-endian. The KDF parameters travel with the file, so
//! containers written under a different work factor remain readable.
//!
//! ## Error discipline
//!
//! Structural damage (bad magic, truncation, unsupported version, non-UTF-8
//! plaintext) surfaces as [`ContainerError::Corrupt`]; an AEAD authentication
//! failure surfaces as [`ContainerError::WrongPassphrase`] so callers can
//! re-prompt instead of treating it as data loss.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cipher;
mod error;
mod file;
mod kdf;

pub use cipher::{ContainerKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{ContainerError, ContainerResult};
pub use file::{load_encrypted, save_encrypted, PADDING_BLOCK};
pub use kdf::{KdfParams, SALT_SIZE};
