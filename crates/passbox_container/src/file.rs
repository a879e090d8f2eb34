//! Container file encoding and atomic persistence.

use crate::error::{ContainerError, ContainerResult};
use crate::kdf::{KdfParams, SALT_SIZE};
use rand::RngCore;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes identifying a Passbox container.
const MAGIC: [u8; 4] = *b"PBXC";

/// Current container format version.
const FORMAT_VERSION: u16 = 1;

/// Header length: magic, version, three KDF integers, salt.
const HEADER_LEN: usize = 4 + 2 + 4 + 4 + 4 + SALT_SIZE;

/// Plaintext is padded with trailing spaces to a multiple of this size, so the
/// ciphertext length only reveals a coarse bucket of the document size.
pub const PADDING_BLOCK: usize = 4096;

fn pad_plaintext(plaintext: &str) -> Vec<u8> {
    let len = plaintext.len().max(1);
    let padded_len = ((len - 1) / PADDING_BLOCK + 1) * PADDING_BLOCK;

    let mut out = Vec::with_capacity(padded_len);
    out.extend_from_slice(plaintext.as_bytes());
    out.resize(padded_len, b' ');
    out
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Encrypts `plaintext` and writes it to `path` atomically.
///
/// The write goes to a sibling `.tmp` file which is fsynced and then renamed
/// over the target, so readers never observe a partial container.
///
/// # Errors
///
/// Returns an error if key derivation, encryption, or any file operation
/// fails. On failure the target file is left untouched.
pub fn save_encrypted(
    path: &Path,
    passphrase: &str,
    plaintext: &str,
    kdf: &KdfParams,
) -> ContainerResult<()> {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = kdf.derive_key(passphrase, &salt)?;
    let encrypted = key.encrypt(&pad_plaintext(plaintext))?;

    let mut data = Vec::with_capacity(HEADER_LEN + encrypted.len());
    data.extend_from_slice(&MAGIC);
    data.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    data.extend_from_slice(&kdf.mem_cost_kib.to_le_bytes());
    data.extend_from_slice(&kdf.time_cost.to_le_bytes());
    data.extend_from_slice(&kdf.parallelism.to_le_bytes());
    data.extend_from_slice(&salt);
    data.extend_from_slice(&encrypted);

    let tmp = temp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = data.len(), "container written");

    Ok(())
}

/// Reads and decrypts the container at `path`.
///
/// # Errors
///
/// [`ContainerError::Corrupt`] for structural damage,
/// [`ContainerError::WrongPassphrase`] when authentication fails, and
/// [`ContainerError::Io`] for file system errors (including a missing file).
pub fn load_encrypted(path: &Path, passphrase: &str) -> ContainerResult<String> {
    let data = fs::read(path)?;

    if data.len() < HEADER_LEN {
        return Err(ContainerError::corrupt("container too short"));
    }
    if data[0..4] != MAGIC {
        return Err(ContainerError::corrupt("invalid container magic"));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != FORMAT_VERSION {
        return Err(ContainerError::corrupt(format!(
            "unsupported container version: {version}"
        )));
    }

    let mut cursor = 6;
    let mut read_u32 = |data: &[u8]| {
        let v = u32::from_le_bytes([
            data[cursor],
            data[cursor + 1],
            data[cursor + 2],
            data[cursor + 3],
        ]);
        cursor += 4;
        v
    };
    let kdf = KdfParams {
        mem_cost_kib: read_u32(&data),
        time_cost: read_u32(&data),
        parallelism: read_u32(&data),
    };

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&data[cursor..cursor + SALT_SIZE]);

    let key = kdf.derive_key(passphrase, &salt)?;
    let plaintext = key.decrypt(&data[HEADER_LEN..])?;

    let text = String::from_utf8(plaintext)
        .map_err(|_| ContainerError::corrupt("plaintext is not valid UTF-8"))?;

    Ok(text)
}
