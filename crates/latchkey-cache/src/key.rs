//! Cache key derivation

use latchkey_common::{CACHE_KEY_PREFIX, Result};
use md5::{Digest, Md5};
use serde::Serialize;

/// Keys whose readable form is longer than this are hashed
pub const MAX_PLAIN_KEY_LEN: usize = 200;

/// Build the cache key for a call of `namespace` with `args`
///
/// Arguments are JSON encoded, so the key is deterministic as long as `args`
/// serializes deterministically (prefer tuples and structs over hash maps).
/// The readable form is `cache:<namespace>:<json>`; when `<namespace>:<json>`
/// exceeds [`MAX_PLAIN_KEY_LEN`] it becomes `cache:<namespace>:<md5 hex>`.
pub fn cache_key<A: Serialize + ?Sized>(namespace: &str, args: &A) -> Result<String> {
    let encoded = serde_json::to_string(args)?;
    let plain = format!("{}:{}", namespace, encoded);

    if plain.len() > MAX_PLAIN_KEY_LEN {
        let digest = const_hex::encode(Md5::digest(plain.as_bytes()));
        return Ok(format!("{}{}:{}", CACHE_KEY_PREFIX, namespace, digest));
    }
    Ok(format!("{}{}", CACHE_KEY_PREFIX, plain))
}
