//! Inter-worker message signing (§4.5, opt-in by config). Messages are
//! signed over `(header, payload)` with a shared secret using HMAC-SHA256
//! — the same primitive `signing::sha256` uses for content hashing, wired
//! up as a MAC rather than a bare digest.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid signing key")]
    InvalidKey,
    #[error("signature verification failed")]
    VerificationFailed,
}

pub struct SigningEnvelope {
    key: Vec<u8>,
}

impl SigningEnvelope {
    pub fn new(shared_secret: impl Into<Vec<u8>>) -> Self {
        Self { key: shared_secret.into() }
    }

    /// Sign `header || 0x00 || payload`, returning a hex-encoded MAC.
    pub fn sign(&self, header: &[u8], payload: &[u8]) -> Result<String, EnvelopeError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| EnvelopeError::InvalidKey)?;
        mac.update(header);
        mac.update(&[0u8]);
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify(&self, header: &[u8], payload: &[u8], signature_hex: &str) -> Result<(), EnvelopeError> {
        let expected = self.sign(header, payload)?;
        if expected.eq_ignore_ascii_case(signature_hex) {
            Ok(())
        } else {
            Err(EnvelopeError::VerificationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let env = SigningEnvelope::new(b"shared-secret".to_vec());
        let sig = env.sign(b"header", b"payload").unwrap();
        assert!(env.verify(b"header", b"payload", &sig).is_ok());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let env = SigningEnvelope::new(b"shared-secret".to_vec());
        let sig = env.sign(b"header", b"payload").unwrap();
        assert!(env.verify(b"header", b"tampered", &sig).is_err());
    }
}
