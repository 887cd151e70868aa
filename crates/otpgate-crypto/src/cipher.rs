//! Repeating-key XOR transform.
//!
//! `result[i] = data[i] ^ key[i % key.len()]`, restarting at key offset zero
//! for every message. The transform is its own inverse, so the same function
//! encrypts and decrypts.

use crate::key::OtpKey;

/// XOR `data` with `key`, returning a new buffer.
///
/// Pure and thread-safe: many tasks may transform with the same key at once.
pub fn transform(key: &OtpKey, data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    transform_in_place(key, &mut out);
    out
}

/// XOR `data` with `key` in place.
pub fn transform_in_place(key: &OtpKey, data: &mut [u8]) {
    let key = key.as_bytes();
    for chunk in data.chunks_mut(key.len()) {
        for (byte, k) in chunk.iter_mut().zip(key) {
            *byte ^= k;
        }
    }
}
