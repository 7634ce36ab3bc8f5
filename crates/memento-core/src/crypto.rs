//! Compress-then-encrypt content pipeline
//!
//! Blob layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`, where the
//! ciphertext is ChaCha20-Poly1305 over zstd-compressed plaintext.
//!
//! Keys are 256-bit and either random or derived from a passphrase with
//! PBKDF2-HMAC-SHA256. The iteration count is stored next to every salt so a
//! key can always be re-derived in a later session.

use std::fmt;
use std::io::Read;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{MementoError, MementoResult};

/// Size of a ChaCha20-Poly1305 nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a symmetric key (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a KDF salt
pub const SALT_SIZE: usize = 16;

/// Largest plaintext accepted by [`encrypt`]
pub const MAX_PLAINTEXT_SIZE: usize = 40 * 1024 * 1024;

/// Largest blob [`encrypt`] may produce (remote document limit minus overhead)
pub const MAX_ENCRYPTED_SIZE: usize = 15 * 1024 * 1024;

/// PBKDF2 iterations for new keys
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Fewest PBKDF2 iterations a new key is ever derived with
pub const MIN_KDF_ITERATIONS: u32 = DEFAULT_KDF_ITERATIONS;

const COMPRESSION_LEVEL: i32 = 3;

/// 256-bit symmetric key, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Random key from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Compress and encrypt `plaintext`
///
/// Fails with `SizeLimitExceeded` before doing any work when the plaintext is
/// over [`MAX_PLAINTEXT_SIZE`], and after encryption when the blob is over
/// [`MAX_ENCRYPTED_SIZE`].
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> MementoResult<Vec<u8>> {
    if plaintext.len() > MAX_PLAINTEXT_SIZE {
        return Err(MementoError::SizeLimitExceeded {
            stage: "Plaintext",
            size: plaintext.len(),
            limit: MAX_PLAINTEXT_SIZE,
        });
    }

    let compressed = zstd::encode_all(plaintext, COMPRESSION_LEVEL)
        .map_err(|e| MementoError::Compression(e.to_string()))?;

    let blob = seal(&compressed, key)?;
    if blob.len() > MAX_ENCRYPTED_SIZE {
        return Err(MementoError::SizeLimitExceeded {
            stage: "Encrypted",
            size: blob.len(),
            limit: MAX_ENCRYPTED_SIZE,
        });
    }

    Ok(blob)
}

/// Authenticate, decrypt and decompress a blob produced by [`encrypt`]
pub fn decrypt(blob: &[u8], key: &SymmetricKey) -> MementoResult<Vec<u8>> {
    let compressed = open(blob, key)?;

    let decoder = zstd::stream::read::Decoder::new(compressed.as_slice())
        .map_err(|e| MementoError::Compression(e.to_string()))?;
    let mut plaintext = Vec::new();
    decoder
        .take(MAX_PLAINTEXT_SIZE as u64 + 1)
        .read_to_end(&mut plaintext)
        .map_err(|e| MementoError::Compression(e.to_string()))?;

    if plaintext.len() > MAX_PLAINTEXT_SIZE {
        return Err(MementoError::SizeLimitExceeded {
            stage: "Decompressed",
            size: plaintext.len(),
            limit: MAX_PLAINTEXT_SIZE,
        });
    }

    Ok(plaintext)
}

/// [`encrypt`] for UTF-8 text
pub fn encrypt_text(text: &str, key: &SymmetricKey) -> MementoResult<Vec<u8>> {
    encrypt(text.as_bytes(), key)
}

/// [`decrypt`] for UTF-8 text
pub fn decrypt_text(blob: &[u8], key: &SymmetricKey) -> MementoResult<String> {
    let bytes = decrypt(blob, key)?;
    String::from_utf8(bytes).map_err(|e| MementoError::InvalidText {
        encoding: "utf-8".to_string(),
        details: e.to_string(),
    })
}

/// AEAD-encrypt without compression: `nonce || ciphertext`
pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> MementoResult<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| MementoError::Crypto("AEAD encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Inverse of [`seal`]
///
/// Any failure, including a blob too short to hold a nonce and tag, is an
/// `AuthenticationFailure`.
pub fn open(blob: &[u8], key: &SymmetricKey) -> MementoResult<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(MementoError::AuthenticationFailure);
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| MementoError::AuthenticationFailure)
}

/// Derive a key from a passphrase with the default iteration count
pub fn derive_key(passphrase: &str, salt: &[u8]) -> SymmetricKey {
    derive_key_with_iterations(passphrase, salt, DEFAULT_KDF_ITERATIONS)
}

/// Derive a key from a passphrase with PBKDF2-HMAC-SHA256
pub fn derive_key_with_iterations(passphrase: &str, salt: &[u8], iterations: u32) -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut bytes);
    SymmetricKey(bytes)
}

/// Fresh random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Heuristic check whether bytes look like an encrypted blob
///
/// Only used for diagnostics; it cannot tell ciphertext from other
/// high-entropy binary data.
pub fn looks_encrypted(data: &[u8]) -> bool {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return false;
    }
    // Random bytes of this length are practically never valid UTF-8
    if std::str::from_utf8(data).is_ok() {
        return false;
    }

    let mut seen = [false; 256];
    let mut distinct = 0;
    for &byte in &data[..16] {
        if !seen[byte as usize] {
            seen[byte as usize] = true;
            distinct += 1;
        }
    }
    distinct >= 8
}
