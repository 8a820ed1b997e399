// src/source/hash.rs

//! Content fingerprints used to tell real source changes from noise.

/// Hash an in-memory byte string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Short, filesystem-safe key for a repository URL.
pub fn cache_key(url: &str) -> String {
    let full = hash_bytes(url.as_bytes());
    full[..16].to_string()
}
