//! # Encrypted Credentials
//!
//! Feed credentials can be kept off the host as an AES-256-CBC encrypted JSON
//! document served over HTTP. The file holds two base64 lines, the IV then the
//! ciphertext, and is decrypted with a hex-encoded 32-byte key.

use aes::Aes256;
use base64::{engine::general_purpose, Engine as _};
use cbc::Decryptor;
use cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use thiserror::Error;

use crate::core::types::Credentials;

/// Why encrypted credentials could not be loaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// HTTP failure or non-success status.
    #[error("Network error: {0}")]
    Network(String),

    /// Wrong key, wrong key length or bad padding.
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// The blob is not two base64 lines with a 16-byte IV.
    #[error("Invalid data format: {0}")]
    InvalidData(String),

    /// The plaintext is not a credentials document.
    #[error("JSON parse error: {0}")]
    Json(String),
}

/// Decrypts a two-line blob with a hex key and returns the plaintext bytes.
pub fn decrypt_secret(content: &str, hex_key: &str) -> Result<Vec<u8>, SecretError> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.len() < 2 {
        return Err(SecretError::InvalidData(format!(
            "expected at least 2 lines, found {}",
            lines.len()
        )));
    }

    let iv = general_purpose::STANDARD
        .decode(lines[0])
        .map_err(|e| SecretError::InvalidData(format!("Invalid Base64 IV: {}", e)))?;
    let mut buf = general_purpose::STANDARD
        .decode(lines[1])
        .map_err(|e| SecretError::InvalidData(format!("Invalid Base64 ciphertext: {}", e)))?;

    let key: [u8; 32] = hex::decode(hex_key.trim())
        .map_err(|e| SecretError::Decryption(format!("Invalid key hex: {}", e)))?
        .try_into()
        .map_err(|key: Vec<u8>| {
            SecretError::Decryption(format!("Key must be 32 bytes, found {}", key.len()))
        })?;
    let iv: [u8; 16] = iv
        .as_slice()
        .try_into()
        .map_err(|_| SecretError::InvalidData(format!("Invalid IV length: {}", iv.len())))?;

    if buf.is_empty() {
        return Err(SecretError::Decryption("Ciphertext is empty".to_string()));
    }

    let plaintext = Decryptor::<Aes256>::new(&key.into(), &iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| {
            SecretError::Decryption(format!("Decryption failed: {:?}. Verify the key.", e))
        })?;
    Ok(plaintext.to_vec())
}

/// Parses decrypted bytes as [`Credentials`].
pub fn parse_credentials(plaintext: &[u8]) -> Result<Credentials, SecretError> {
    serde_json::from_slice(plaintext).map_err(|e| SecretError::Json(e.to_string()))
}

/// Downloads the blob at `url` and decrypts it into credentials.
pub async fn fetch_credentials(url: &str, hex_key: &str) -> Result<Credentials, SecretError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| SecretError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(SecretError::Network(format!(
            "HTTP request failed with status: {}",
            response.status()
        )));
    }

    let content = response
        .text()
        .await
        .map_err(|e| SecretError::Network(e.to_string()))?;

    let credentials = parse_credentials(&decrypt_secret(&content, hex_key)?)?;
    log::info!("Loaded encrypted credentials for machine [{}]", credentials.machine_id);
    Ok(credentials)
}
