//! Persistent device identity backing the attestation credential.

use zeroize::Zeroizing;

use crate::asym::{EccEngine, EccError};

/// The device identity: the stable identifier placed in issued certificate
/// subjects, and the device's ECC attestation key used for ECDH unsealing.
pub struct DeviceIdentity {
    device_id: String,
    ecc_private_der: Zeroizing<Vec<u8>>,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, ecc_private_der: Vec<u8>) -> Self {
        Self {
            device_id: device_id.into(),
            ecc_private_der: Zeroizing::new(ecc_private_der),
        }
    }

    /// Provision a fresh identity with a newly generated attestation key.
    pub fn provision(
        device_id: impl Into<String>,
        ecc: &mut dyn EccEngine,
    ) -> Result<Self, EccError> {
        let key = ecc.generate_key()?;
        Ok(Self {
            device_id: device_id.into(),
            ecc_private_der: key,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// PKCS#8 blob of the ECC attestation key.
    pub fn ecc_key(&self) -> &[u8] {
        &self.ecc_private_der
    }

    /// Uncompressed SEC1 point of the ECC attestation public key, as a
    /// verifier needs it to run the ECDH sealing side.
    pub fn ecc_public_key(&self, ecc: &dyn EccEngine) -> Result<Vec<u8>, EccError> {
        ecc.public_key(&self.ecc_private_der)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asym::SoftEcc;

    #[test]
    fn provision_creates_usable_key() {
        let mut ecc = SoftEcc::new();
        let identity = DeviceIdentity::provision("device-7", &mut ecc).unwrap();
        assert_eq!(identity.device_id(), "device-7");
        let point = identity.ecc_public_key(&ecc).unwrap();
        assert_eq!(point.len(), 65);
        assert_eq!(point[0], 0x04);
    }
}
