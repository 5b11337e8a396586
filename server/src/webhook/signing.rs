//! HMAC-SHA256 Payload Signatures
//!
//! Keyed-MAC signing shared by inbound webhook verification and deletion
//! certificates. Signatures travel as lowercase hex.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed_mac(secret: &str, payload: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    mac
}

/// Hex-encoded HMAC-SHA256 signature of a payload.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    hex::encode(keyed_mac(secret, payload).finalize().into_bytes())
}

/// Check a hex signature against a payload. Malformed hex is simply a bad
/// signature; the comparison itself is constant-time.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    keyed_mac(secret, payload).verify_slice(&provided).is_ok()
}
