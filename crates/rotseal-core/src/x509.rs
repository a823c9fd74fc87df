//! Leaf certificate issuance for the auxiliary attestation key.

use rcgen::{
    CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rustls_pki_types::CertificateDer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum X509Error {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("certificate build failed: {0}")]
    Build(#[from] rcgen::Error),
}

/// Build a signed end-entity certificate for an attestation key.
pub trait X509Engine {
    /// Issue a leaf certificate: subject CN is the device id, the subject
    /// key is the PKCS#8 private blob, and the issuer is the supplied CA
    /// certificate/key pair. Returns the certificate DER.
    fn create_ca_signed_leaf(
        &self,
        subject_key_der: &[u8],
        subject_cn: &str,
        serial: &[u8],
        ca_cert_der: &[u8],
        ca_key_der: &[u8],
    ) -> Result<Vec<u8>, X509Error>;
}

/// `rcgen`-backed X.509 engine.
#[derive(Default)]
pub struct RcgenX509;

impl RcgenX509 {
    pub fn new() -> Self {
        Self
    }
}

impl X509Engine for RcgenX509 {
    fn create_ca_signed_leaf(
        &self,
        subject_key_der: &[u8],
        subject_cn: &str,
        serial: &[u8],
        ca_cert_der: &[u8],
        ca_key_der: &[u8],
    ) -> Result<Vec<u8>, X509Error> {
        if subject_cn.is_empty() || serial.is_empty() {
            return Err(X509Error::InvalidArgument);
        }

        let subject_key = KeyPair::try_from(subject_key_der)?;
        let ca_key = KeyPair::try_from(ca_key_der)?;
        let ca_der = CertificateDer::from(ca_cert_der.to_vec());
        // rebuild the issuer from its DER so the leaf carries the CA's DN
        let issuer = CertificateParams::from_ca_cert_der(&ca_der)?.self_signed(&ca_key)?;

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, subject_cn);
        params.serial_number = Some(SerialNumber::from(serial.to_vec()));
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];

        let leaf = params.signed_by(&subject_key, &issuer, &ca_key)?;
        Ok(leaf.der().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asym::{EccEngine, SoftEcc};
    use x509_parser::prelude::*;

    fn test_ca() -> (Vec<u8>, Vec<u8>) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, "unit test root ca");
        params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Constrained(0));
        let cert = params.self_signed(&key).unwrap();
        (cert.der().to_vec(), key.serialize_der())
    }

    #[test]
    fn issues_leaf_with_subject_and_issuer() {
        let (ca_der, ca_key) = test_ca();
        let mut ecc = SoftEcc::new();
        let subject_key = ecc.generate_key().unwrap();

        let engine = RcgenX509::new();
        let leaf = engine
            .create_ca_signed_leaf(&subject_key, "device-0042", &[0x12, 0x34], &ca_der, &ca_key)
            .unwrap();

        let (_, cert) = X509Certificate::from_der(&leaf).unwrap();
        assert!(cert
            .subject()
            .iter_common_name()
            .any(|cn| cn.as_str() == Ok("device-0042")));
        assert!(cert
            .issuer()
            .iter_common_name()
            .any(|cn| cn.as_str() == Ok("unit test root ca")));
    }

    #[test]
    fn empty_subject_rejected() {
        let (ca_der, ca_key) = test_ca();
        let mut ecc = SoftEcc::new();
        let subject_key = ecc.generate_key().unwrap();
        let engine = RcgenX509::new();
        assert!(matches!(
            engine.create_ca_signed_leaf(&subject_key, "", &[1], &ca_der, &ca_key),
            Err(super::X509Error::InvalidArgument)
        ));
    }
}
