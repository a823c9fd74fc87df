//! Signature verification contract used across the RoT.

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureVerificationError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("signature does not match digest")]
    SignatureMismatch,
    #[error("signature verification failed: {0}")]
    VerifyFailed(String),
}

/// Check a signature against an already-computed digest. The verifier owns
/// its key material; implementations are not required to be re-entrant.
pub trait SignatureVerification {
    fn verify_signature(
        &mut self,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureVerificationError>;
}

/// ECDSA P-256 verifier over a SEC1 public key.
pub struct EcdsaVerification {
    key: VerifyingKey,
}

impl EcdsaVerification {
    pub fn new(public_key_sec1: &[u8]) -> Result<Self, SignatureVerificationError> {
        let key = VerifyingKey::from_sec1_bytes(public_key_sec1)
            .map_err(|e| SignatureVerificationError::VerifyFailed(e.to_string()))?;
        Ok(Self { key })
    }
}

impl SignatureVerification for EcdsaVerification {
    fn verify_signature(
        &mut self,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureVerificationError> {
        if digest.is_empty() || signature.is_empty() {
            return Err(SignatureVerificationError::InvalidArgument);
        }
        // accept DER or fixed-width encodings
        let sig = Signature::from_der(signature)
            .or_else(|_| Signature::from_slice(signature))
            .map_err(|e| SignatureVerificationError::VerifyFailed(e.to_string()))?;
        self.key
            .verify_prehash(digest, &sig)
            .map_err(|_| SignatureVerificationError::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::hazmat::PrehashSigner;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use sha2::{Digest, Sha256};

    #[test]
    fn accepts_valid_signature() {
        let signing = SigningKey::random(&mut OsRng);
        let digest: [u8; 32] = Sha256::digest(b"manifest").into();
        let sig: Signature = signing.sign_prehash(&digest).unwrap();

        let public = signing.verifying_key().to_encoded_point(false);
        let mut verifier = EcdsaVerification::new(public.as_bytes()).unwrap();
        verifier.verify_signature(&digest, sig.to_der().as_bytes()).unwrap();
        verifier.verify_signature(&digest, sig.to_bytes().as_slice()).unwrap();
    }

    #[test]
    fn rejects_wrong_digest() {
        let signing = SigningKey::random(&mut OsRng);
        let digest: [u8; 32] = Sha256::digest(b"manifest").into();
        let sig: Signature = signing.sign_prehash(&digest).unwrap();

        let public = signing.verifying_key().to_encoded_point(false);
        let mut verifier = EcdsaVerification::new(public.as_bytes()).unwrap();
        let other: [u8; 32] = Sha256::digest(b"tampered").into();
        assert!(matches!(
            verifier.verify_signature(&other, sig.to_der().as_bytes()),
            Err(SignatureVerificationError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_empty_inputs() {
        let signing = SigningKey::random(&mut OsRng);
        let public = signing.verifying_key().to_encoded_point(false);
        let mut verifier = EcdsaVerification::new(public.as_bytes()).unwrap();
        assert!(matches!(
            verifier.verify_signature(&[], &[1, 2, 3]),
            Err(SignatureVerificationError::InvalidArgument)
        ));
    }
}
