use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

// Fails closed on a missing or empty side and on length mismatch
pub fn verify_token(candidate: Option<&str>, expected: Option<&str>) -> bool {
    let (Some(candidate), Some(expected)) = (candidate, expected) else {
        return false;
    };
    let (candidate, expected) = (candidate.as_bytes(), expected.as_bytes());
    if candidate.is_empty() || expected.is_empty() || candidate.len() != expected.len() {
        return false;
    }

    candidate.ct_eq(expected).into()
}

// Short SHA-256 prefix so rejected tokens can be correlated in logs without
// writing them out.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}
