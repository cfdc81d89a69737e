//! Content-addressed identifier construction (`sha512t24u` digests).

use base64::Engine as _;
use sha2::{Digest as _, Sha512};

/// Compute the GA4GH `sha512t24u` digest for a blob: SHA-512, truncated to
/// 24 bytes, base64url encoded without padding.
pub fn sha512t24u(blob: &[u8]) -> String {
    let hash = Sha512::digest(blob);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&hash[..24])
}

/// Compute the digest for a list of string keys.
///
/// The keys are serialized as a compact JSON array so the blob is unambiguous
/// with respect to key boundaries.  Callers that treat the key list as a set
/// (therapy groups, disease identity keys) must sort before calling.
pub fn digest_for_keys(keys: &[String]) -> Result<String, anyhow::Error> {
    let blob = serde_json::to_vec(keys)
        .map_err(|e| anyhow::anyhow!("could not serialize digest keys: {}", e))?;
    Ok(sha512t24u(&blob))
}

/// Digest for a set-semantics key list: sorts a copy of the keys first.
pub fn digest_for_key_set(keys: &[String]) -> Result<String, anyhow::Error> {
    let mut keys = keys.to_vec();
    keys.sort();
    digest_for_keys(&keys)
}
