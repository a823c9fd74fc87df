//! Lifecycle of the auxiliary attestation credential: generate, certify,
//! install, read, erase.

use rand_core::RngCore;
use thiserror::Error;
use tracing::info;

use crate::asym::{EccError, RsaEngine, RsaError};
use crate::hash::HashError;
use crate::identity::DeviceIdentity;
use crate::kdf::KdfError;
use crate::keystore::{Keystore, KeystoreError};
use crate::pcr::PcrError;
use crate::x509::{X509Engine, X509Error};

/// Keystore slot reserved for the auxiliary attestation private key.
pub const AUX_KEY_ID: u32 = 1;

/// Platform default modulus length for generated attestation keys.
pub const AUX_KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum AuxAttestationError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("a certificate has already been provisioned")]
    HasCertificate,
    #[error("sealing policy does not match the local measurements")]
    PcrMismatch,
    #[error("payload failed hmac verification")]
    HmacMismatch,
    #[error("asymmetric algorithm not supported on this platform")]
    UnsupportedCrypto,
    #[error("requested key length not supported")]
    UnsupportedKeyLength,
    #[error("hmac algorithm not supported")]
    UnsupportedHmac,
    #[error("unknown seed type")]
    UnknownSeed,
    #[error("seed padding invalid or unsupported")]
    BadSeedPadding,
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
    #[error(transparent)]
    Rsa(#[from] RsaError),
    #[error(transparent)]
    Ecc(#[from] EccError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Pcr(#[from] PcrError),
    #[error(transparent)]
    X509(#[from] X509Error),
}

impl From<KdfError> for AuxAttestationError {
    fn from(e: KdfError) -> Self {
        match e {
            KdfError::InvalidArgument => AuxAttestationError::InvalidArgument,
            KdfError::Hash(h) => AuxAttestationError::Hash(h),
        }
    }
}

/// The installed attestation certificate. Owned DER lives on the heap;
/// static DER borrows read-only memory and is never freed.
#[derive(Debug, Default)]
pub enum Cert {
    #[default]
    None,
    Owned(Vec<u8>),
    Static(&'static [u8]),
}

impl Cert {
    fn is_installed(&self) -> bool {
        !matches!(self, Cert::None)
    }

    fn der(&self) -> Option<&[u8]> {
        match self {
            Cert::None => None,
            Cert::Owned(der) => Some(der),
            Cert::Static(der) => Some(der),
        }
    }
}

/// Handler for the auxiliary attestation credential.
///
/// Mutating operations take `&mut self` and are thereby serialized;
/// [`AuxAttestation::certificate`] reads through `&self`. Engines and the
/// keystore are borrowed per call and never captured.
#[derive(Default)]
pub struct AuxAttestation {
    cert: Cert,
}

impl AuxAttestation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh attestation key and persist it under
    /// [`AUX_KEY_ID`]. Rejected once a certificate is installed; before
    /// that, regeneration overwrites the stored key.
    pub fn generate_key(
        &mut self,
        keystore: &mut dyn Keystore,
        rsa: &mut dyn RsaEngine,
    ) -> Result<(), AuxAttestationError> {
        if self.cert.is_installed() {
            return Err(AuxAttestationError::HasCertificate);
        }
        let key = rsa.generate_key(AUX_KEY_BITS)?;
        keystore.save_key(AUX_KEY_ID, &key)?;
        info!("auxiliary attestation key generated");
        Ok(())
    }

    /// Issue a certificate for the stored attestation key, signed by the
    /// supplied CA, and install it as owned. The subject carries the
    /// device identifier.
    pub fn create_certificate(
        &mut self,
        keystore: &dyn Keystore,
        x509: &dyn X509Engine,
        rng: &mut dyn RngCore,
        identity: &DeviceIdentity,
        ca_cert_der: &[u8],
        ca_key_der: &[u8],
    ) -> Result<(), AuxAttestationError> {
        if self.cert.is_installed() {
            return Err(AuxAttestationError::HasCertificate);
        }
        if ca_cert_der.is_empty() || ca_key_der.is_empty() {
            return Err(AuxAttestationError::InvalidArgument);
        }

        let private = keystore.load_key(AUX_KEY_ID)?;

        let mut serial = [0u8; 8];
        rng.fill_bytes(&mut serial);
        if serial.iter().all(|&b| b == 0) {
            serial[7] = 1;
        }

        let der = x509.create_ca_signed_leaf(
            &private,
            identity.device_id(),
            &serial,
            ca_cert_der,
            ca_key_der,
        )?;
        self.cert = Cert::Owned(der);
        info!(device_id = identity.device_id(), "auxiliary certificate issued");
        Ok(())
    }

    /// Install an externally produced certificate, taking ownership of the
    /// DER buffer.
    pub fn set_certificate(&mut self, cert: Vec<u8>) -> Result<(), AuxAttestationError> {
        if self.cert.is_installed() {
            return Err(AuxAttestationError::HasCertificate);
        }
        if cert.is_empty() {
            return Err(AuxAttestationError::InvalidArgument);
        }
        self.cert = Cert::Owned(cert);
        Ok(())
    }

    /// Install a certificate that lives in read-only static memory.
    pub fn set_static_certificate(
        &mut self,
        cert: &'static [u8],
    ) -> Result<(), AuxAttestationError> {
        if self.cert.is_installed() {
            return Err(AuxAttestationError::HasCertificate);
        }
        if cert.is_empty() {
            return Err(AuxAttestationError::InvalidArgument);
        }
        self.cert = Cert::Static(cert);
        Ok(())
    }

    /// Current certificate DER, valid until the next mutating operation.
    pub fn certificate(&self) -> Option<&[u8]> {
        self.cert.der()
    }

    /// Remove the stored key and any installed certificate. A no-op on an
    /// empty credential.
    pub fn erase_key(&mut self, keystore: &mut dyn Keystore) -> Result<(), AuxAttestationError> {
        self.cert = Cert::None;
        match keystore.erase_key(AUX_KEY_ID) {
            Ok(()) | Err(KeystoreError::NoKey(_)) => {
                info!("auxiliary attestation key erased");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
