//! ==============================================================================
//! auth.rs - truncated hmac tags for radio frames
//! ==============================================================================
//!
//! purpose:
//!     computes and verifies the authentication tag appended to a frame body.
//!     HMAC-SHA256 keyed with the device's shared secret, truncated to the
//!     first 8 bytes and rendered as 16 lowercase hex characters.
//!
//! relationships:
//!     - used by: protocol/codec.rs (build signs the six-field body)
//!     - used by: orchestrator.rs (verify inbound frames that carry a tag)
//!
//! ==============================================================================

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::DELIMITER;

type HmacSha256 = Hmac<Sha256>;

/// truncated tag length in bytes
pub const TAG_BYTES: usize = 8;
/// truncated tag length on the wire
pub const TAG_HEX_LEN: usize = TAG_BYTES * 2;

fn keyed(secret: &str, body: &str) -> HmacSha256 {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac accepts keys of any length"),
    };
    mac.update(body.as_bytes());
    mac
}

/// tag over `body` using the secret's bytes as key
pub fn tag(body: &str, secret: &str) -> String {
    let digest = keyed(secret, body).finalize().into_bytes();
    hex::encode(&digest[..TAG_BYTES])
}

/// true when `frame` ends in a tag matching its body under `secret`.
/// comparison is case-insensitive and constant time; malformed input is false.
pub fn verify(frame: &str, secret: &str) -> bool {
    let Some(split) = frame.rfind(DELIMITER) else {
        return false;
    };
    let (body, received) = (&frame[..split], &frame[split + 1..]);
    if received.len() != TAG_HEX_LEN {
        return false;
    }
    let Ok(received) = hex::decode(received) else {
        return false;
    };
    keyed(secret, body).verify_truncated_left(&received).is_ok()
}

/// true when `field` has the shape of a tag (fixed length, hex only)
pub fn looks_like_tag(field: &str) -> bool {
    field.len() == TAG_HEX_LEN && field.bytes().all(|b| b.is_ascii_hexdigit())
}
