use crate::error::Result;
use sha2::{Digest, Sha256};
use std::{fs::File, io, path::Path};

/// Hex-encoded SHA-256 of the file at `path`.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// `Ok(false)` on a digest mismatch; errors only when the file cannot be read.
pub fn verify_sha256(path: &Path, expected_hex: &str) -> Result<bool> {
    Ok(sha256_file(path)?.eq_ignore_ascii_case(expected_hex.trim()))
}
