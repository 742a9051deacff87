//! RSA PKCS#1 v1.5 block encryption for request bodies.
//!
//! Plaintext is split into blocks of `k - 11` bytes (k = modulus size in
//! bytes); each block encrypts to exactly `k` bytes and the ciphertext is the
//! concatenation of the blocks.

use metricsd_shared::{ErrorClass, ErrorCode, ErrorEnvelope, Result};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;

const PKCS1_V15_OVERHEAD: usize = 11;

/// Encrypts bodies with the server's public key.
#[derive(Debug, Clone)]
pub struct BodyEncryptor {
    key: RsaPublicKey,
}

impl BodyEncryptor {
    /// Wrap a public key.
    #[must_use]
    pub const fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Parse a PKCS#1 or SPKI PEM public key.
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPublicKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
            .map(Self::new)
            .map_err(|error| key_error(format!("invalid RSA public key: {error}")))
    }

    /// Read and parse a PEM public key file.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Self::from_pem(&read_key_file(path)?)
    }

    /// Encrypt `plaintext`; empty input yields empty output.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size().saturating_sub(PKCS1_V15_OVERHEAD);
        if block == 0 {
            return Err(key_error("RSA modulus too small".to_string()));
        }

        let mut rng = rand::thread_rng();
        let mut output = Vec::with_capacity(plaintext.len().div_ceil(block) * self.key.size());
        for chunk in plaintext.chunks(block) {
            let encrypted = self
                .key
                .encrypt(&mut rng, Pkcs1v15Encrypt, chunk)
                .map_err(|error| {
                    ErrorEnvelope::unexpected(
                        ErrorCode::internal(),
                        format!("RSA encryption failed: {error}"),
                        ErrorClass::NonRetriable,
                    )
                })?;
            output.extend_from_slice(&encrypted);
        }
        Ok(output)
    }
}

/// Decrypts bodies with the server's private key.
#[derive(Debug, Clone)]
pub struct BodyDecryptor {
    key: RsaPrivateKey,
}

impl BodyDecryptor {
    /// Wrap a private key.
    #[must_use]
    pub const fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parse a PKCS#1 or PKCS#8 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map(Self::new)
            .map_err(|error| key_error(format!("invalid RSA private key: {error}")))
    }

    /// Read and parse a PEM private key file.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Self::from_pem(&read_key_file(path)?)
    }

    /// Decrypt a concatenation of `k`-byte blocks.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        if ciphertext.len() % block != 0 {
            return Err(decryption_error("ciphertext is not a whole number of blocks")
                .with_metadata("blockBytes", block.to_string()));
        }

        let mut output = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks(block) {
            let plain = self
                .key
                .decrypt(Pkcs1v15Encrypt, chunk)
                .map_err(|_| decryption_error("RSA block decryption failed"))?;
            output.extend_from_slice(&plain);
        }
        Ok(output)
    }
}

fn read_key_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|error| {
        ErrorEnvelope::from(error).with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn key_error(message: String) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::new("protocol", "invalid_key"), message)
}

fn decryption_error(message: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::decryption_failure(), message)
}
