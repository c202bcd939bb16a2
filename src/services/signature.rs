//! HMAC-SHA256 delivery signatures

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::core::{IndexerError, IndexerResult};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";
const SECRET_BYTES: usize = 32;

/// Hex-encoded signature of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> IndexerResult<String> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check an `x-signature` header value against the raw body
///
/// The comparison runs in constant time. A `sha256=` prefix is accepted.
pub fn verify(secret: &str, body: &[u8], header: &str) -> IndexerResult<()> {
    let provided = header.trim();
    let provided = provided.strip_prefix(SIGNATURE_PREFIX).unwrap_or(provided);
    let provided = hex::decode(provided)
        .map_err(|_| IndexerError::Auth("signature is not valid hex".to_string()))?;

    let mut mac = mac_for(secret)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| IndexerError::Auth("signature mismatch".to_string()))
}

/// Check a shared-secret token, such as an `Authorization` header value
///
/// Both sides are reduced to HMAC tags under `expected` and compared in
/// constant time, so neither content nor length leaks through timing.
pub fn verify_token(expected: &str, provided: &str) -> IndexerResult<()> {
    let mut reference = mac_for(expected)?;
    reference.update(expected.as_bytes());
    let reference = reference.finalize().into_bytes();

    let mut mac = mac_for(expected)?;
    mac.update(provided.trim().as_bytes());
    mac.verify_slice(&reference)
        .map_err(|_| IndexerError::Auth("token mismatch".to_string()))
}

/// Fresh random secret for a new subscription
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn mac_for(secret: &str) -> IndexerResult<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| IndexerError::Internal(format!("failed to initialize hmac: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"webhookId":"sub-1","events":[]}"#;

    #[test]
    fn accepts_matching_signature_with_or_without_prefix() {
        let sig = sign("secret", BODY).unwrap();
        verify("secret", BODY, &sig).unwrap();
        verify("secret", BODY, &format!("sha256={}", sig)).unwrap();
    }

    #[test]
    fn any_tampered_byte_is_rejected() {
        let sig = sign("secret", BODY).unwrap();
        for i in 0..BODY.len() {
            let mut tampered = BODY.to_vec();
            tampered[i] ^= 0x01;
            assert!(
                matches!(verify("secret", &tampered, &sig), Err(IndexerError::Auth(_))),
                "byte {} flip accepted",
                i
            );
        }
    }

    #[test]
    fn other_secret_or_garbage_is_rejected() {
        let sig = sign("secret", BODY).unwrap();
        assert!(matches!(verify("other", BODY, &sig), Err(IndexerError::Auth(_))));
        assert!(matches!(verify("secret", BODY, "zz"), Err(IndexerError::Auth(_))));
        assert!(matches!(verify("secret", BODY, ""), Err(IndexerError::Auth(_))));
    }

    #[test]
    fn tokens_compare_exactly() {
        verify_token("s3cret", "s3cret").unwrap();
        verify_token("s3cret", " s3cret ").unwrap();
        for wrong in ["s3cre", "s3cret!", "S3cret", ""] {
            assert!(
                matches!(verify_token("s3cret", wrong), Err(IndexerError::Auth(_))),
                "{:?} accepted",
                wrong
            );
        }
    }

    #[test]
    fn secrets_are_unique_hex() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), SECRET_BYTES * 2);
        assert_ne!(a, b);
    }
}
