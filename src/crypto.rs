//! Digest and signature primitives used by the tile packager and verifiers.
//!
//! Two functions carry all cryptography in the crate:
//! - [`digest`]: SHA-256 as lowercase hex
//! - [`hmac`]: HMAC-SHA256 as standard base64
//!
//! plus [`verify_hmac`], which compares in constant time.

use crate::error::TideError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of `bytes` as a 64-character lowercase hex string.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// HMAC-SHA256 of `bytes` under `secret`, base64-encoded.
pub fn hmac(secret: &[u8], bytes: &[u8]) -> crate::Result<String> {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return Err(TideError::InvalidInput("unusable HMAC secret".into()));
    };
    mac.update(bytes);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Check a base64 HMAC-SHA256 signature. Malformed signatures verify as false.
pub fn verify_hmac(secret: &[u8], bytes: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(bytes);
    mac.verify_slice(&expected).is_ok()
}

/// Standard base64 used for payload transport.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(text)
}
