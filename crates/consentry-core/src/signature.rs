//! HMAC-SHA256 signing and verification shared by outbound deliveries and
//! inbound provider callbacks.
//!
//! Both directions operate on the exact bytes that travel over the wire. A
//! body must never be parsed and re-serialized before it is signed or
//! verified: re-encoding can reorder keys or change whitespace.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute `hex(HMAC-SHA256(secret, body))`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    hex::encode(mac(secret, body).finalize().into_bytes())
}

/// Verify a hex-encoded HMAC-SHA256 signature over `body`.
///
/// Comparison happens on the decoded MAC bytes in constant time; hex case is
/// not significant. Anything that is not valid hex fails verification.
pub fn verify(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    mac(secret, body).verify_slice(&expected).is_ok()
}

/// Constant-time byte comparison for shared tokens and client identifiers.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Hex-encoded SHA-256 digest, used where a provider signs a digest of the
/// body rather than the body itself.
pub fn sha256_hex(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn mac(secret: &[u8], body: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign(b"secret", br#"{"event":"bounty.created"}"#);
        let b = sign(b"secret", br#"{"event":"bounty.created"}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        let sig = sign(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_roundtrip() {
        let body = br#"{"event":"contributor.onboarded","data":{}}"#;
        let sig = sign(b"whsec", body);
        assert!(verify(b"whsec", body, &sig));
        assert!(verify(b"whsec", body, &sig.to_uppercase()));
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let body = br#"{"amount":100}"#.to_vec();
        let sig = sign(b"whsec", &body);

        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            assert!(!verify(b"whsec", &tampered, &sig), "byte {} flipped", i);
        }
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let sig = sign(b"secret-a", b"payload");
        assert!(!verify(b"secret-b", b"payload", &sig));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        assert!(!verify(b"secret", b"payload", ""));
        assert!(!verify(b"secret", b"payload", "not-hex"));
        assert!(!verify(b"secret", b"payload", "abcd"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"client", b"client"));
        assert!(!constant_time_eq(b"client", b"clien"));
        assert!(!constant_time_eq(b"client", b"CLIENT"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
