//! Fast password digests
//!
//! A SHA-256 digest of a plaintext that already passed the slow hash check.
//! It is only ever compared against another fast digest to skip a repeat
//! bcrypt run; it never authenticates on its own.

use sha2::{Digest as Sha2Digest, Sha256};

/// Width of a fast digest in bytes
pub const FAST_DIGEST_LEN: usize = 32;

/// Fast digest of a verified plaintext
pub type FastDigest = [u8; FAST_DIGEST_LEN];

/// Compute the fast digest of data
///
/// # Example
///
/// ```
/// use tlssocks::auth::fast_digest;
///
/// let hash = fast_digest(b"secret");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn fast_digest(data: &[u8]) -> FastDigest {
    let d = Sha256::new().chain_update(data).finalize();
    let mut result = [0u8; FAST_DIGEST_LEN];
    result.copy_from_slice(&d);
    result
}

/// Constant-time comparison of two byte slices
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
