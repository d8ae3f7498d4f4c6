//! Secret cipher for data source connection secrets using AES-256-GCM
//!
//! Connection strings and API credentials are stored encrypted at rest in the
//! data source configuration table. Each value is sealed with a fresh random
//! nonce and stored as a self-describing text envelope:
//!
//! ```text
//! enc:v1:<base64(nonce || ciphertext || tag)>
//! ```
//!
//! Values without the envelope prefix are legacy plaintext rows. `decrypt`
//! reports them as [`DecryptError::NotEncrypted`], which callers must keep
//! apart from [`DecryptError::AuthenticationFailed`] (wrong key or tampering).
//!
//! ## Configuration
//!
//! - `SOURCEPLANE_SECRET_KEY`: base64-encoded 32-byte current key
//! - `SOURCEPLANE_PREVIOUS_SECRET_KEYS`: comma-separated base64 keys retired by
//!   rotation, newest first
//!
//! The keys are read once at process start and never change afterwards.
//!
//! ## Key Rotation
//!
//! [`SecretCipher::recover`] tries the current key and then each previous key
//! in order. A secret opened with a previous key is re-sealed under the current
//! key so the caller can persist it.

use crate::errors::{Result, SourceplaneError};
use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// Size of the symmetric key in bytes
const KEY_SIZE: usize = 32;

/// Prefix marking a value as an encrypted envelope
pub const ENVELOPE_PREFIX: &str = "enc:v1:";

/// Why a stored secret could not be turned back into plaintext
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptError {
    /// Nothing stored
    #[error("secret is empty")]
    Empty,

    /// Value carries no envelope prefix (legacy plaintext storage)
    #[error("secret is not an encrypted envelope")]
    NotEncrypted,

    /// Envelope prefix present but the payload is unreadable
    #[error("malformed secret envelope: {0}")]
    Malformed(String),

    /// No candidate key authenticates the ciphertext
    #[error("authentication failed (wrong key or tampered ciphertext)")]
    AuthenticationFailed,

    /// Authenticated plaintext is not UTF-8
    #[error("decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}

/// Configuration for the secret cipher
#[derive(Clone)]
pub struct SecretCipherConfig {
    /// Base64-encoded 32-byte current key
    pub current_key_base64: String,
    /// Base64-encoded retired keys, newest first
    pub previous_keys_base64: Vec<String>,
    /// Key version for rotation tracking
    pub key_version: String,
}

impl SecretCipherConfig {
    /// Configuration with a single current key and no rotation history
    pub fn new(current_key_base64: impl Into<String>) -> Self {
        Self {
            current_key_base64: current_key_base64.into(),
            previous_keys_base64: Vec::new(),
            key_version: "default".to_string(),
        }
    }

    /// Add retired keys that `recover` may fall back to
    pub fn with_previous_keys(mut self, keys: Vec<String>) -> Self {
        self.previous_keys_base64 = keys;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let current_key_base64 = std::env::var("SOURCEPLANE_SECRET_KEY").map_err(|_| {
            SourceplaneError::config(
                "SOURCEPLANE_SECRET_KEY environment variable not set. \
                 Generate a key with: sourceplane generate-key",
            )
        })?;

        let previous_keys_base64 = std::env::var("SOURCEPLANE_PREVIOUS_SECRET_KEYS")
            .map(|raw| {
                raw.split(',').map(str::trim).filter(|k| !k.is_empty()).map(String::from).collect()
            })
            .unwrap_or_default();

        let key_version = std::env::var("SOURCEPLANE_SECRET_KEY_VERSION")
            .unwrap_or_else(|_| "default".to_string());

        Ok(Self { current_key_base64, previous_keys_base64, key_version })
    }

    /// Create a development/testing configuration with a fixed key
    /// WARNING: Only use this for development/testing, never in production!
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self::new(base64::engine::general_purpose::STANDARD.encode([0x42u8; KEY_SIZE]))
    }
}

impl std::fmt::Debug for SecretCipherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipherConfig")
            .field("current_key_base64", &"[REDACTED]")
            .field("previous_keys", &self.previous_keys_base64.len())
            .field("key_version", &self.key_version)
            .finish()
    }
}

/// Key material, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
struct CipherKey {
    bytes: [u8; KEY_SIZE],
}

impl CipherKey {
    fn from_base64(encoded: &str, label: &str) -> Result<Self> {
        let mut decoded =
            base64::engine::general_purpose::STANDARD.decode(encoded.trim()).map_err(|e| {
                SourceplaneError::config(format!("Invalid base64 in {}: {}", label, e))
            })?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(SourceplaneError::config(format!(
                "{} must be {} bytes (256 bits), got {} bytes",
                label, KEY_SIZE, len
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Outcome of a successful [`SecretCipher::recover`]
#[derive(Clone)]
pub struct RecoveredSecret {
    pub plaintext: String,
    /// Index into the candidate list (0 = current key)
    pub key_index: usize,
    /// New envelope under the current key, present when `key_index > 0`
    pub reencrypted: Option<String>,
}

impl RecoveredSecret {
    /// Whether the stored value must be written back
    pub fn needs_rewrite(&self) -> bool {
        self.reencrypted.is_some()
    }
}

impl std::fmt::Debug for RecoveredSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveredSecret")
            .field("plaintext", &"[REDACTED]")
            .field("key_index", &self.key_index)
            .field("reencrypted", &self.reencrypted.is_some())
            .finish()
    }
}

/// Process-wide secret cipher
#[derive(Clone)]
pub struct SecretCipher {
    /// Candidate keys; index 0 is the current key
    keys: Arc<Vec<CipherKey>>,
    key_version: String,
    rng: Arc<SystemRandom>,
}

impl SecretCipher {
    /// Create a new cipher from configuration
    pub fn new(config: &SecretCipherConfig) -> Result<Self> {
        let mut keys =
            vec![CipherKey::from_base64(&config.current_key_base64, "SOURCEPLANE_SECRET_KEY")?];
        for (i, encoded) in config.previous_keys_base64.iter().enumerate() {
            keys.push(CipherKey::from_base64(
                encoded,
                &format!("SOURCEPLANE_PREVIOUS_SECRET_KEYS[{}]", i),
            )?);
        }

        debug!(
            key_version = %config.key_version,
            previous_keys = config.previous_keys_base64.len(),
            "Secret cipher initialized"
        );

        Ok(Self {
            keys: Arc::new(keys),
            key_version: config.key_version.clone(),
            rng: Arc::new(SystemRandom::new()),
        })
    }

    /// Generate a fresh random key, base64-encoded
    pub fn generate_key() -> Result<String> {
        let mut key = [0u8; KEY_SIZE];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| SourceplaneError::internal("Failed to generate random key"))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(key);
        key.zeroize();
        Ok(encoded)
    }

    /// Get the current key version
    pub fn key_version(&self) -> &str {
        &self.key_version
    }

    /// Number of candidate keys (current + previous)
    pub fn candidate_count(&self) -> usize {
        self.keys.len()
    }

    /// Whether a stored value carries the encrypted envelope
    pub fn is_encrypted(value: &str) -> bool {
        value.trim_start().starts_with(ENVELOPE_PREFIX)
    }

    /// Encrypt plaintext under the current key and return the text envelope
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            SourceplaneError::internal("Failed to generate random nonce for encryption")
        })?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.keys[0].bytes)
            .map_err(|_| SourceplaneError::internal("Failed to create encryption key"))?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut sealed = plaintext.as_bytes().to_vec();
        sealed.reserve(TAG_SIZE);
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut sealed)
            .map_err(|_| SourceplaneError::internal("Failed to encrypt secret"))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + sealed.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&sealed);

        Ok(format!(
            "{}{}",
            ENVELOPE_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(payload)
        ))
    }

    /// Decrypt a stored value with the current key only
    #[instrument(skip(self, stored))]
    pub fn decrypt(&self, stored: Option<&str>) -> std::result::Result<String, DecryptError> {
        let payload = Self::decode_envelope(stored)?;
        Self::open(&self.keys[0], &payload)
    }

    /// Decrypt with every candidate key in order, re-sealing under the current
    /// key when an older key succeeded
    #[instrument(skip(self, stored), fields(candidates = self.keys.len()))]
    pub fn recover(&self, stored: Option<&str>) -> std::result::Result<RecoveredSecret, DecryptError> {
        let payload = Self::decode_envelope(stored)?;

        for (key_index, key) in self.keys.iter().enumerate() {
            match Self::open(key, &payload) {
                Ok(plaintext) => {
                    if key_index == 0 {
                        return Ok(RecoveredSecret { plaintext, key_index, reencrypted: None });
                    }

                    let reencrypted = self.encrypt(&plaintext).map_err(|e| {
                        warn!(error = %e, "Failed to re-encrypt recovered secret");
                        DecryptError::Malformed("re-encryption failed".to_string())
                    })?;
                    info!(key_index, "Secret opened with a previous key; re-encrypted under current key");
                    return Ok(RecoveredSecret {
                        plaintext,
                        key_index,
                        reencrypted: Some(reencrypted),
                    });
                }
                Err(DecryptError::AuthenticationFailed) => continue,
                Err(other) => return Err(other),
            }
        }

        warn!(candidates = self.keys.len(), "No candidate key authenticated the secret");
        Err(DecryptError::AuthenticationFailed)
    }

    fn decode_envelope(stored: Option<&str>) -> std::result::Result<Vec<u8>, DecryptError> {
        let stored = stored.map(str::trim).filter(|s| !s.is_empty()).ok_or(DecryptError::Empty)?;
        let encoded = stored.strip_prefix(ENVELOPE_PREFIX).ok_or(DecryptError::NotEncrypted)?;

        let payload = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DecryptError::Malformed(format!("invalid base64: {}", e)))?;

        if payload.len() < NONCE_SIZE + TAG_SIZE {
            return Err(DecryptError::Malformed(
                "payload shorter than nonce and authentication tag".to_string(),
            ));
        }

        Ok(payload)
    }

    fn open(key: &CipherKey, payload: &[u8]) -> std::result::Result<String, DecryptError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&payload[..NONCE_SIZE]);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &key.bytes)
            .map_err(|_| DecryptError::Malformed("unusable key".to_string()))?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut buffer = payload[NONCE_SIZE..].to_vec();
        let decrypted = opening_key
            .open_in_place(Aad::empty(), &mut buffer)
            .map_err(|_| DecryptError::AuthenticationFailed)?;

        String::from_utf8(decrypted.to_vec()).map_err(|_| DecryptError::InvalidUtf8)
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key_version", &self.key_version)
            .field("candidate_keys", &self.keys.len())
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}
