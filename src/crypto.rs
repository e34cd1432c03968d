//! Crypto module for credential and message-body encryption
//!
//! Uses AES-256-GCM with HKDF key derivation. The key is derived once per
//! process from the configured master key and an installation-specific salt,
//! and the resulting [`Cipher`] is passed to every component that needs it.
//! - Random 96-bit nonce per encryption, prepended to the ciphertext
//! - Base64 transport encoding so values fit TEXT columns
//! - Key bytes are zeroized on drop

use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const SALT_LEN: usize = 32;

const HKDF_INFO: &[u8] = b"mailsift-credential-encryption-v1";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Salt file error: {0}")]
    Salt(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed - invalid key or corrupted data")]
    Decryption,

    #[error("Encrypted data is malformed: {0}")]
    Malformed(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Zeroize, ZeroizeOnDrop)]
struct KeyBytes([u8; 32]);

/// Symmetric cipher shared by the credential resolver and the storage layer
#[derive(Clone)]
pub struct Cipher {
    key: Arc<KeyBytes>,
    rng: SystemRandom,
}

/// Custom key type for HKDF output
struct AeadKeyLen(usize);

impl hkdf::KeyType for AeadKeyLen {
    fn len(&self) -> usize {
        self.0
    }
}

impl Cipher {
    /// Derive the cipher key from a master secret and a salt
    pub fn from_secret(master_key: &str, salt: &[u8]) -> CryptoResult<Self> {
        if master_key.is_empty() {
            return Err(CryptoError::KeyDerivation(
                "master key must not be empty".to_string(),
            ));
        }

        let hkdf_salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt);
        let prk = hkdf_salt.extract(master_key.as_bytes());

        let info: &[&[u8]] = &[HKDF_INFO];
        let okm = prk
            .expand(info, AeadKeyLen(32))
            .map_err(|_| CryptoError::KeyDerivation("HKDF expansion failed".to_string()))?;

        let mut key = [0u8; 32];
        okm.fill(&mut key)
            .map_err(|_| CryptoError::KeyDerivation("Failed to fill key bytes".to_string()))?;

        let cipher = Self {
            key: Arc::new(KeyBytes(key)),
            rng: SystemRandom::new(),
        };
        key.zeroize();
        Ok(cipher)
    }

    /// Derive the cipher key using the salt stored at `salt_path`, creating it if missing
    pub fn from_secret_and_salt_file(master_key: &str, salt_path: &Path) -> CryptoResult<Self> {
        let salt = get_or_create_salt(salt_path)?;
        Self::from_secret(master_key, &salt)
    }

    fn aead_key(&self) -> CryptoResult<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key.0)
            .map_err(|_| CryptoError::KeyDerivation("invalid AES key length".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt a string
    /// Returns base64-encoded ciphertext with prepended nonce
    pub fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
        let key = self.aead_key()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Encryption)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Encryption)?;

        let mut result = Vec::with_capacity(NONCE_LEN + in_out.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&in_out);

        Ok(base64::engine::general_purpose::STANDARD.encode(&result))
    }

    /// Decrypt a value produced by [`Cipher::encrypt`]
    pub fn decrypt(&self, encrypted: &str) -> CryptoResult<String> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| CryptoError::Malformed(format!("base64: {}", e)))?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed("encrypted data too short".to_string()));
        }

        let key = self.aead_key()?;

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CryptoError::Malformed("invalid nonce".to_string()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Decryption)?;

        let text = String::from_utf8(plaintext.to_vec())
            .map_err(|e| CryptoError::Malformed(format!("utf-8: {}", e)));
        in_out.zeroize();
        text
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> CryptoResult<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    pub fn decrypt_opt(&self, encrypted: Option<&str>) -> CryptoResult<Option<String>> {
        encrypted.map(|e| self.decrypt(e)).transpose()
    }
}

/// Get or create installation-specific salt
fn get_or_create_salt(salt_path: &Path) -> CryptoResult<[u8; SALT_LEN]> {
    if salt_path.exists() {
        let salt_data = fs::read(salt_path)
            .map_err(|e| CryptoError::Salt(format!("Failed to read salt file: {}", e)))?;

        if salt_data.len() == SALT_LEN {
            let mut salt = [0u8; SALT_LEN];
            salt.copy_from_slice(&salt_data);
            return Ok(salt);
        }
        log::warn!("Salt file has unexpected length, regenerating");
    }

    if let Some(parent) = salt_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CryptoError::Salt(format!("Failed to create salt directory: {}", e)))?;
    }

    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| CryptoError::Salt("Failed to generate salt".to_string()))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(salt_path)
            .map_err(|e| CryptoError::Salt(format!("Failed to create salt file: {}", e)))?;
        file.write_all(&salt)
            .map_err(|e| CryptoError::Salt(format!("Failed to write salt: {}", e)))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(salt_path, &salt)
            .map_err(|e| CryptoError::Salt(format!("Failed to write salt: {}", e)))?;
    }

    Ok(salt)
}
