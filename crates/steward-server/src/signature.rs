//! `X-Hub-Signature-256` verification: `sha256=<hex HMAC-SHA256 of the raw body>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing X-Hub-Signature-256 header")]
    Missing,
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("signature does not match payload")]
    Mismatch,
}

fn mac(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac key length is unrestricted"),
    }
}

/// Header value for `body` signed with `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = mac(secret);
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn verify(secret: &[u8], body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let digest = header
        .strip_prefix("sha256=")
        .ok_or_else(|| SignatureError::Malformed("missing sha256= prefix".into()))?;
    let expected =
        hex::decode(digest).map_err(|e| SignatureError::Malformed(format!("invalid hex: {e}")))?;
    let mut mac = mac(secret);
    mac.update(body);
    // Constant-time comparison
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}
