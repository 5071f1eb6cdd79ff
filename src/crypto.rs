//! Credential encryption module using AES-256-GCM
//!
//! Connection credentials are opaque JSON documents encrypted at rest with
//! AES-256-GCM, bound to the owning connection through additional
//! authenticated data (AAD) so a ciphertext cannot be replayed onto
//! another row.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("invalid credentials payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // Version byte and nonce travel with the ciphertext.
    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    // Legacy plaintext payloads carry no version marker.
    if ciphertext[0] != VERSION_ENCRYPTED {
        return Ok(ciphertext.to_vec());
    }

    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let payload = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(nonce, Payload { msg: payload, aad })
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.first() == Some(&VERSION_ENCRYPTED) && ciphertext.len() >= MIN_ENCRYPTED_LEN
}

/// AAD binding a credentials ciphertext to its connection row.
fn credentials_aad(connection_id: &Uuid, organization_id: &Uuid) -> Vec<u8> {
    format!("connection:{}:{}", organization_id, connection_id).into_bytes()
}

/// Encrypt a credentials JSON document for the given connection.
pub fn encrypt_credentials(
    key: &CryptoKey,
    connection_id: &Uuid,
    organization_id: &Uuid,
    credentials: &JsonValue,
) -> Result<Vec<u8>, CryptoError> {
    let plaintext = serde_json::to_vec(credentials)?;
    encrypt_bytes(
        key,
        &credentials_aad(connection_id, organization_id),
        &plaintext,
    )
}

/// Decrypt a credentials ciphertext back into its JSON document.
pub fn decrypt_credentials(
    key: &CryptoKey,
    connection_id: &Uuid,
    organization_id: &Uuid,
    ciphertext: &[u8],
) -> Result<JsonValue, CryptoError> {
    let plaintext = decrypt_bytes(
        key,
        &credentials_aad(connection_id, organization_id),
        ciphertext,
    )?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid key")
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(CryptoKey::new(vec![0u8; 16]).is_err());
        assert!(CryptoKey::new(vec![0u8; 32]).is_ok());
    }

    #[test]
    fn credentials_round_trip() {
        let key = test_key();
        let connection_id = Uuid::new_v4();
        let organization_id = Uuid::new_v4();
        let credentials = json!({
            "host": "db.internal",
            "port": 5432,
            "username": "svc",
            "password": "s3cr3t!"
        });

        let ciphertext =
            encrypt_credentials(&key, &connection_id, &organization_id, &credentials)
                .expect("encrypt");
        assert!(is_encrypted_payload(&ciphertext));

        let decrypted = decrypt_credentials(&key, &connection_id, &organization_id, &ciphertext)
            .expect("decrypt");
        assert_eq!(decrypted, credentials);
    }

    #[test]
    fn ciphertext_is_bound_to_connection() {
        let key = test_key();
        let organization_id = Uuid::new_v4();
        let credentials = json!({"password": "s3cr3t!"});

        let ciphertext =
            encrypt_credentials(&key, &Uuid::new_v4(), &organization_id, &credentials)
                .expect("encrypt");

        let result =
            decrypt_credentials(&key, &Uuid::new_v4(), &organization_id, &ciphertext);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = test_key();
        let connection_id = Uuid::new_v4();
        let organization_id = Uuid::new_v4();

        let mut ciphertext =
            encrypt_credentials(&key, &connection_id, &organization_id, &json!({"a": 1}))
                .expect("encrypt");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;

        let result = decrypt_credentials(&key, &connection_id, &organization_id, &ciphertext);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }
}
