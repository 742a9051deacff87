//! HMAC-SHA256 body signatures carried as lowercase hex in `HashSHA256`.

use hmac::{Hmac, Mac};
use metricsd_shared::{ErrorCode, ErrorEnvelope, Result, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex digest.
pub const HASH_HEADER: &str = "HashSHA256";

/// Signs and verifies bodies with a shared key.
#[derive(Clone)]
pub struct BodySigner {
    keyed: HmacSha256,
}

impl std::fmt::Debug for BodySigner {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("BodySigner").finish_non_exhaustive()
    }
}

impl BodySigner {
    /// Signer over `key`.
    pub fn new(key: &SecretString) -> Result<Self> {
        let keyed = HmacSha256::new_from_slice(key.expose_bytes()).map_err(|_| {
            ErrorEnvelope::expected(ErrorCode::invalid_input(), "unusable HMAC key")
        })?;
        Ok(Self { keyed })
    }

    /// Hex digest of `body`.
    #[must_use]
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.keyed.clone();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison of `body`'s digest against `digest_hex`.
    pub fn verify(&self, body: &[u8], digest_hex: &str) -> Result<()> {
        let expected = hex::decode(digest_hex.trim()).map_err(|_| integrity_error())?;
        let mut mac = self.keyed.clone();
        mac.update(body);
        mac.verify_slice(&expected).map_err(|_| integrity_error())
    }
}

fn integrity_error() -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::integrity_failure(), "body signature mismatch")
}
