//! Asymmetric engine capabilities: RSA for seed decapsulation and digest
//! signing, ECC for the ECDH unseal path. Key blobs cross these interfaces
//! as PKCS#8 DER; the engines hold no key material between calls.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// Hash used inside OAEP padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OaepHash {
    Sha1,
    Sha256,
}

/// Padding schemes accepted for RSA decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaPadding {
    Pkcs1v15,
    Oaep(OaepHash),
}

#[derive(Debug, Error)]
pub enum RsaError {
    #[error("key generation failed: {0}")]
    KeyGen(rsa::Error),
    #[error("invalid private key blob: {0}")]
    BadKeyBlob(rsa::pkcs8::Error),
    #[error("key encoding failed: {0}")]
    Encode(String),
    #[error("decryption failed: {0}")]
    Decrypt(rsa::Error),
    #[error("signing failed: {0}")]
    Sign(rsa::Error),
}

/// RSA operations over PKCS#8 private key blobs.
pub trait RsaEngine {
    /// Generate a fresh private key of `bits` modulus length, serialized to
    /// PKCS#8 DER.
    fn generate_key(&mut self, bits: usize) -> Result<Zeroizing<Vec<u8>>, RsaError>;

    /// SubjectPublicKeyInfo DER for the public half of a private key blob.
    fn public_key_der(&self, private_der: &[u8]) -> Result<Vec<u8>, RsaError>;

    /// Decrypt a ciphertext with the given padding. `label` applies to OAEP
    /// only and is ignored for PKCS#1 v1.5.
    fn decrypt(
        &self,
        private_der: &[u8],
        ciphertext: &[u8],
        padding: RsaPadding,
        label: Option<&str>,
    ) -> Result<Zeroizing<Vec<u8>>, RsaError>;

    /// PKCS#1 v1.5 signature over an already-computed SHA-256 digest.
    fn sign(&self, private_der: &[u8], digest: &[u8]) -> Result<Vec<u8>, RsaError>;
}

/// Software RSA engine over the `rsa` crate, keyed by the OS RNG.
#[derive(Default)]
pub struct SoftRsa;

impl SoftRsa {
    pub fn new() -> Self {
        Self
    }

    fn private_key(der: &[u8]) -> Result<RsaPrivateKey, RsaError> {
        RsaPrivateKey::from_pkcs8_der(der).map_err(RsaError::BadKeyBlob)
    }
}

impl RsaEngine for SoftRsa {
    fn generate_key(&mut self, bits: usize) -> Result<Zeroizing<Vec<u8>>, RsaError> {
        let key = RsaPrivateKey::new(&mut OsRng, bits).map_err(RsaError::KeyGen)?;
        let der = key
            .to_pkcs8_der()
            .map_err(|e| RsaError::Encode(e.to_string()))?;
        Ok(Zeroizing::new(der.as_bytes().to_vec()))
    }

    fn public_key_der(&self, private_der: &[u8]) -> Result<Vec<u8>, RsaError> {
        let key = Self::private_key(private_der)?;
        let der = key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| RsaError::Encode(e.to_string()))?;
        Ok(der.as_bytes().to_vec())
    }

    fn decrypt(
        &self,
        private_der: &[u8],
        ciphertext: &[u8],
        padding: RsaPadding,
        label: Option<&str>,
    ) -> Result<Zeroizing<Vec<u8>>, RsaError> {
        let key = Self::private_key(private_der)?;
        let plaintext = match padding {
            RsaPadding::Pkcs1v15 => key.decrypt(Pkcs1v15Encrypt, ciphertext),
            RsaPadding::Oaep(hash) => {
                let scheme = match (hash, label) {
                    (OaepHash::Sha1, None) => Oaep::new::<Sha1>(),
                    (OaepHash::Sha1, Some(l)) => Oaep::new_with_label::<Sha1, _>(l),
                    (OaepHash::Sha256, None) => Oaep::new::<Sha256>(),
                    (OaepHash::Sha256, Some(l)) => Oaep::new_with_label::<Sha256, _>(l),
                };
                key.decrypt(scheme, ciphertext)
            }
        }
        .map_err(RsaError::Decrypt)?;
        Ok(Zeroizing::new(plaintext))
    }

    fn sign(&self, private_der: &[u8], digest: &[u8]) -> Result<Vec<u8>, RsaError> {
        let key = Self::private_key(private_der)?;
        key.sign(Pkcs1v15Sign::new::<Sha256>(), digest)
            .map_err(RsaError::Sign)
    }
}

#[derive(Debug, Error)]
pub enum EccError {
    #[error("invalid private key blob: {0}")]
    BadKeyBlob(p256::pkcs8::Error),
    #[error("key encoding failed: {0}")]
    Encode(String),
    #[error("invalid peer public key")]
    BadPeerKey,
}

/// ECC operations for the attestation identity curve (P-256).
pub trait EccEngine {
    /// Generate a fresh P-256 private key, serialized to PKCS#8 DER.
    fn generate_key(&mut self) -> Result<Zeroizing<Vec<u8>>, EccError>;

    /// Uncompressed SEC1 point for the public half of a private key blob.
    fn public_key(&self, private_der: &[u8]) -> Result<Vec<u8>, EccError>;

    /// ECDH shared secret between a private key blob and an uncompressed
    /// SEC1 peer point. The raw x-coordinate is returned unhashed.
    fn shared_secret(
        &mut self,
        private_der: &[u8],
        peer_public: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EccError>;
}

/// Software ECC engine over the `p256` crate.
#[derive(Default)]
pub struct SoftEcc;

impl SoftEcc {
    pub fn new() -> Self {
        Self
    }

    fn private_key(der: &[u8]) -> Result<p256::SecretKey, EccError> {
        p256::SecretKey::from_pkcs8_der(der).map_err(EccError::BadKeyBlob)
    }
}

impl EccEngine for SoftEcc {
    fn generate_key(&mut self) -> Result<Zeroizing<Vec<u8>>, EccError> {
        let key = p256::SecretKey::random(&mut OsRng);
        let der = key
            .to_pkcs8_der()
            .map_err(|e| EccError::Encode(e.to_string()))?;
        Ok(Zeroizing::new(der.as_bytes().to_vec()))
    }

    fn public_key(&self, private_der: &[u8]) -> Result<Vec<u8>, EccError> {
        let key = Self::private_key(private_der)?;
        Ok(key.public_key().to_encoded_point(false).as_bytes().to_vec())
    }

    fn shared_secret(
        &mut self,
        private_der: &[u8],
        peer_public: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EccError> {
        let key = Self::private_key(private_der)?;
        let peer = p256::PublicKey::from_sec1_bytes(peer_public).map_err(|_| EccError::BadPeerKey)?;
        let shared = p256::ecdh::diffie_hellman(key.to_nonzero_scalar(), peer.as_affine());
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}
