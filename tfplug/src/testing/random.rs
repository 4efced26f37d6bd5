//! Random names and key material for acceptance tests

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

/// Non-negative integer for unique resource names such as `foobar-<n>`.
/// Leaves headroom so `n + 1` never overflows.
pub fn rand_int() -> u32 {
    rand::thread_rng().gen_range(0..1_000_000_000)
}

/// Lowercase alphanumeric string of `len` characters
pub fn rand_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// A fresh `ssh-ed25519` public key in OpenSSH format.
///
/// The blob is the wire encoding of the key type followed by 32 random
/// bytes, so services that parse the key accept it.
pub fn rand_ssh_public_key() -> String {
    const KEY_TYPE: &str = "ssh-ed25519";

    let mut point = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut point);

    let mut blob = Vec::with_capacity(4 + KEY_TYPE.len() + 4 + point.len());
    blob.extend_from_slice(&(KEY_TYPE.len() as u32).to_be_bytes());
    blob.extend_from_slice(KEY_TYPE.as_bytes());
    blob.extend_from_slice(&(point.len() as u32).to_be_bytes());
    blob.extend_from_slice(&point);

    format!("{} {}", KEY_TYPE, STANDARD.encode(blob))
}
