//! HMAC-SHA256 request signing shared by the robot and webhook channels.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// `base64(HMAC-SHA256(key, message))`.
pub(super) fn hmac_sha256_base64(key: &[u8], message: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Other(format!("invalid HMAC key: {e}")))?;
    mac.update(message);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Current Unix time in milliseconds.
pub(super) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
