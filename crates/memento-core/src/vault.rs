//! Key management
//!
//! Each encrypted memento owns an X25519 keypair whose private half is sealed
//! with a passphrase-derived key, plus a content salt from which the content
//! key is derived. The material lives in `key.json` next to the control file
//! and is mirrored to the remote store as an `encryption_key` record.
//!
//! Unlocked content keys are cached in a [`KeyRing`] for the session only;
//! nothing derived from a passphrase is ever written to disk.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::config::Config;
use crate::crypto::{self, SymmetricKey, KEY_SIZE, SALT_SIZE};
use crate::error::{MementoError, MementoResult};
use crate::models::DocumentId;
use crate::storage::persistence::atomic_write;

/// Bytes used to record the KDF iteration count in a protected private key
const ITERATIONS_PREFIX: usize = 4;

/// A freshly generated keypair with the private key still in the clear
pub struct KeyPair {
    pub public_key: [u8; KEY_SIZE],
    pub private_key: Zeroizing<[u8; KEY_SIZE]>,
    pub created_at: DateTime<Utc>,
}

impl KeyPair {
    /// Generate a new X25519 keypair from the OS random source
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public_key: *public.as_bytes(),
            private_key: Zeroizing::new(secret.to_bytes()),
            created_at: Utc::now(),
        }
    }
}

/// Persisted key material of one memento (`key.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Referenced from `ControlMetadata::key_reference`
    pub key_id: Uuid,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
    /// `iterations || salt || nonce || ciphertext`
    #[serde(with = "base64_bytes")]
    pub protected_private_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub content_salt: Vec<u8>,
    pub kdf_iterations: u32,
    pub created_at: DateTime<Utc>,
}

#[cfg(not(test))]
const ITERATION_FLOOR: u32 = crypto::MIN_KDF_ITERATIONS;

// Unit tests derive many keys; keep them fast
#[cfg(test)]
const ITERATION_FLOOR: u32 = 1;

/// Configured iteration count, raised to `floor`
fn effective_iterations(configured: u32, floor: u32) -> u32 {
    configured.max(floor)
}

/// Creates, persists and unlocks key material
#[derive(Debug, Clone)]
pub struct KeyVault {
    config: Config,
}

impl KeyVault {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn iterations(&self) -> u32 {
        effective_iterations(self.config.kdf_iterations, ITERATION_FLOOR)
    }

    /// Generate a new X25519 keypair
    pub fn generate_keypair(&self) -> KeyPair {
        KeyPair::generate()
    }

    /// Seal a private key under a key derived from `passphrase`
    pub fn protect_private_key(
        &self,
        private_key: &[u8],
        passphrase: &str,
    ) -> MementoResult<Vec<u8>> {
        let iterations = self.iterations();
        let salt = crypto::generate_salt();
        let wrapping_key = crypto::derive_key_with_iterations(passphrase, &salt, iterations);
        let sealed = crypto::seal(private_key, &wrapping_key)?;

        let mut protected = Vec::with_capacity(ITERATIONS_PREFIX + SALT_SIZE + sealed.len());
        protected.extend_from_slice(&iterations.to_be_bytes());
        protected.extend_from_slice(&salt);
        protected.extend_from_slice(&sealed);
        Ok(protected)
    }

    /// Recover a private key sealed by [`KeyVault::protect_private_key`]
    ///
    /// A wrong passphrase surfaces as `AuthenticationFailure`.
    pub fn unlock(
        &self,
        protected: &[u8],
        passphrase: &str,
    ) -> MementoResult<Zeroizing<Vec<u8>>> {
        if protected.len() < ITERATIONS_PREFIX + SALT_SIZE {
            return Err(MementoError::AuthenticationFailure);
        }
        let (prefix, rest) = protected.split_at(ITERATIONS_PREFIX);
        let (salt, sealed) = rest.split_at(SALT_SIZE);

        let mut iteration_bytes = [0u8; ITERATIONS_PREFIX];
        iteration_bytes.copy_from_slice(prefix);
        let iterations = u32::from_be_bytes(iteration_bytes);
        if iterations == 0 {
            return Err(MementoError::AuthenticationFailure);
        }

        let wrapping_key = crypto::derive_key_with_iterations(passphrase, salt, iterations);
        crypto::open(sealed, &wrapping_key).map(Zeroizing::new)
    }

    /// Generate a keypair and content salt for a memento
    ///
    /// Returns the material to persist and the content key it unlocks to.
    pub fn create_key_material(
        &self,
        passphrase: &str,
    ) -> MementoResult<(KeyMaterial, SymmetricKey)> {
        let keypair = self.generate_keypair();
        let protected_private_key =
            self.protect_private_key(keypair.private_key.as_slice(), passphrase)?;

        let material = KeyMaterial {
            key_id: Uuid::new_v4(),
            public_key: keypair.public_key.to_vec(),
            protected_private_key,
            content_salt: crypto::generate_salt().to_vec(),
            kdf_iterations: self.iterations(),
            created_at: keypair.created_at,
        };

        let key = derive_content_key(&material, passphrase);
        Ok((material, key))
    }

    /// Derive the content key of `material`, checking the passphrase first
    pub fn content_key(
        &self,
        material: &KeyMaterial,
        passphrase: &str,
    ) -> MementoResult<SymmetricKey> {
        let private_key = self.unlock(&material.protected_private_key, passphrase)?;

        let secret_bytes: [u8; KEY_SIZE] = private_key
            .as_slice()
            .try_into()
            .map_err(|_| MementoError::Crypto("private key has the wrong length".to_string()))?;
        let public = PublicKey::from(&StaticSecret::from(secret_bytes));
        if public.as_bytes().as_slice() != material.public_key.as_slice() {
            return Err(MementoError::Crypto(
                "private key does not match the stored public key".to_string(),
            ));
        }

        Ok(derive_content_key(material, passphrase))
    }

    /// Whether `passphrase` unlocks `material`
    pub fn verify_passphrase(&self, material: &KeyMaterial, passphrase: &str) -> bool {
        self.unlock(&material.protected_private_key, passphrase).is_ok()
    }

    /// Write `key.json` for a memento atomically
    pub fn save(&self, id: DocumentId, material: &KeyMaterial) -> MementoResult<()> {
        let json = serde_json::to_vec_pretty(material)?;
        atomic_write(&self.config.key_path(id), &json)?;
        debug!("Saved key material {} for memento {}", material.key_id, id);
        Ok(())
    }

    /// Read `key.json` for a memento, or `None` if it has none
    pub fn load(&self, id: DocumentId) -> MementoResult<Option<KeyMaterial>> {
        let path = self.config.key_path(id);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                MementoError::CorruptMetadata {
                    path,
                    details: e.to_string(),
                }
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MementoError::from_read(e, path)),
        }
    }
}

fn derive_content_key(material: &KeyMaterial, passphrase: &str) -> SymmetricKey {
    crypto::derive_key_with_iterations(
        passphrase,
        &material.content_salt,
        material.kdf_iterations.max(1),
    )
}

/// Session cache of unlocked content keys
#[derive(Debug, Default)]
pub struct KeyRing {
    keys: Mutex<HashMap<DocumentId, SymmetricKey>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: DocumentId, key: SymmetricKey) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, key);
    }

    pub fn get(&self, id: DocumentId) -> Option<SymmetricKey> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Forget a key; it is zeroized on drop
    pub fn remove(&self, id: DocumentId) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
