//! Attestation unsealing: seed decapsulation, key derivation, key
//! confirmation, and policy-gated release of the payload key.

use tracing::debug;
use zeroize::Zeroizing;

use crate::asym::{EccEngine, OaepHash, RsaEngine, RsaError, RsaPadding};
use crate::credential::{AuxAttestation, AuxAttestationError, AUX_KEY_ID};
use crate::hash::{constant_time_eq, HashEngine, HashError, HmacAlgorithm, SHA256_HASH_LEN};
use crate::identity::DeviceIdentity;
use crate::kdf;
use crate::keystore::Keystore;
use crate::pcr::{MeasurementStore, SealingPolicy, PCR_CLAUSE_LEN};

/// Length of the released key. Only 256-bit signing and encryption keys are
/// generated.
pub const UNSEAL_KEY_LEN: usize = SHA256_HASH_LEN;

const SIGNING_KEY_LABEL: &[u8] = b"signing key";
const ENCRYPTION_KEY_LABEL: &[u8] = b"encryption key";

/// How the attestation seed was encapsulated, with the management protocol
/// wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SeedType {
    /// Seed is encrypted to the auxiliary RSA key.
    Rsa = 0x00,
    /// Seed is an ECC public key for ECDH against the attestation key.
    Ecdh = 0x01,
}

impl TryFrom<u8> for SeedType {
    type Error = AuxAttestationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SeedType::Rsa),
            0x01 => Ok(SeedType::Ecdh),
            _ => Err(AuxAttestationError::UnknownSeed),
        }
    }
}

/// Padding applied to an encrypted seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SeedPadding {
    Pkcs1v15 = 0x00,
    OaepSha1 = 0x01,
    OaepSha256 = 0x02,
    /// No padding scheme specified; the only valid choice for ECDH seeds.
    Unspecified = 0xff,
}

impl TryFrom<u8> for SeedPadding {
    type Error = AuxAttestationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SeedPadding::Pkcs1v15),
            0x01 => Ok(SeedPadding::OaepSha1),
            0x02 => Ok(SeedPadding::OaepSha256),
            0xff => Ok(SeedPadding::Unspecified),
            _ => Err(AuxAttestationError::BadSeedPadding),
        }
    }
}

/// One unseal request from a verifier. Borrowed buffers only; nothing here
/// outlives the call.
pub struct UnsealRequest<'a> {
    pub seed: &'a [u8],
    pub seed_type: SeedType,
    pub padding: SeedPadding,
    pub hmac_algorithm: HmacAlgorithm,
    pub hmac_tag: &'a [u8],
    pub ciphertext: &'a [u8],
    pub sealing: &'a [[u8; PCR_CLAUSE_LEN]],
    pub key_length: usize,
}

impl AuxAttestation {
    /// Run the unseal protocol and release the payload encryption key.
    ///
    /// The steps are ordered and every step must pass before the next one
    /// runs: argument validation, seed decapsulation, key derivation, HMAC
    /// verification over `sealing || ciphertext`, then policy evaluation.
    /// The HMAC check runs before any PCR is read, and a policy failure
    /// is reported without saying which clause missed.
    ///
    /// Engines absent on a platform are passed as `None`; requests needing
    /// them fail with `UnsupportedCrypto`. All intermediate secrets are
    /// wiped on every exit path.
    pub fn unseal(
        &self,
        keystore: &dyn Keystore,
        rsa: Option<&dyn RsaEngine>,
        ecc: Option<&mut dyn EccEngine>,
        hash: &mut dyn HashEngine,
        pcr: &dyn MeasurementStore,
        identity: &DeviceIdentity,
        request: &UnsealRequest<'_>,
    ) -> Result<Zeroizing<[u8; UNSEAL_KEY_LEN]>, AuxAttestationError> {
        if request.seed.is_empty()
            || request.hmac_tag.is_empty()
            || request.ciphertext.is_empty()
        {
            return Err(AuxAttestationError::InvalidArgument);
        }
        if request.key_length != UNSEAL_KEY_LEN {
            return Err(AuxAttestationError::UnsupportedKeyLength);
        }
        if request.hmac_algorithm != HmacAlgorithm::Sha256 {
            return Err(AuxAttestationError::UnsupportedHmac);
        }
        let policy = SealingPolicy::new(request.sealing)?;

        let kdk = match request.seed_type {
            SeedType::Rsa => {
                let rsa = rsa.ok_or(AuxAttestationError::UnsupportedCrypto)?;
                let padding = match request.padding {
                    SeedPadding::Pkcs1v15 => RsaPadding::Pkcs1v15,
                    SeedPadding::OaepSha1 => RsaPadding::Oaep(OaepHash::Sha1),
                    SeedPadding::OaepSha256 => RsaPadding::Oaep(OaepHash::Sha256),
                    SeedPadding::Unspecified => {
                        return Err(AuxAttestationError::BadSeedPadding)
                    }
                };
                let private = keystore.load_key(AUX_KEY_ID)?;
                rsa.decrypt(&private, request.seed, padding, None)
                    .map_err(|e| match e {
                        RsaError::Decrypt(_) => AuxAttestationError::BadSeedPadding,
                        other => other.into(),
                    })?
            }
            SeedType::Ecdh => {
                let ecc = ecc.ok_or(AuxAttestationError::UnsupportedCrypto)?;
                if request.padding != SeedPadding::Unspecified {
                    return Err(AuxAttestationError::BadSeedPadding);
                }
                // the seed is the peer's public point; Z is the KDK as-is
                ecc.shared_secret(identity.ecc_key(), request.seed)?
            }
        };

        let mut signing_key = Zeroizing::new([0u8; UNSEAL_KEY_LEN]);
        let mut encryption_key = Zeroizing::new([0u8; UNSEAL_KEY_LEN]);
        kdf::nist800_108_counter_mode(
            hash,
            HmacAlgorithm::Sha256,
            &kdk,
            SIGNING_KEY_LABEL,
            b"",
            &mut signing_key[..],
        )?;
        kdf::nist800_108_counter_mode(
            hash,
            HmacAlgorithm::Sha256,
            &kdk,
            ENCRYPTION_KEY_LABEL,
            b"",
            &mut encryption_key[..],
        )?;

        let mut tag = Zeroizing::new([0u8; SHA256_HASH_LEN]);
        hash.hmac_start(HmacAlgorithm::Sha256, &signing_key[..])?;
        let mut confirm = |hash: &mut dyn HashEngine| -> Result<(), HashError> {
            for clause in request.sealing {
                hash.update(clause)?;
            }
            hash.update(request.ciphertext)?;
            hash.finish(&mut tag[..]).map(|_| ())
        };
        if let Err(e) = confirm(hash) {
            hash.cancel();
            return Err(e.into());
        }
        if !constant_time_eq(&tag[..], request.hmac_tag) {
            debug!("unseal rejected: payload failed hmac verification");
            return Err(AuxAttestationError::HmacMismatch);
        }

        if !policy.satisfied_by(pcr)? {
            debug!("unseal rejected: sealing policy unsatisfied");
            return Err(AuxAttestationError::PcrMismatch);
        }

        debug!("unseal request satisfied");
        Ok(encryption_key)
    }

    /// Bare RSA-OAEP decryption with the auxiliary private key, for
    /// protocol layers outside the unseal flow.
    pub fn decrypt(
        &self,
        keystore: &dyn Keystore,
        rsa: &dyn RsaEngine,
        encrypted: &[u8],
        label: Option<&str>,
        pad_hash: OaepHash,
    ) -> Result<Zeroizing<Vec<u8>>, AuxAttestationError> {
        if encrypted.is_empty() {
            return Err(AuxAttestationError::InvalidArgument);
        }
        let private = keystore.load_key(AUX_KEY_ID)?;
        Ok(rsa.decrypt(&private, encrypted, RsaPadding::Oaep(pad_hash), label)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_type_wire_values() {
        assert_eq!(SeedType::try_from(0x00).unwrap(), SeedType::Rsa);
        assert_eq!(SeedType::try_from(0x01).unwrap(), SeedType::Ecdh);
        assert!(matches!(
            SeedType::try_from(0x02),
            Err(AuxAttestationError::UnknownSeed)
        ));
    }

    #[test]
    fn seed_padding_wire_values() {
        assert_eq!(SeedPadding::try_from(0x00).unwrap(), SeedPadding::Pkcs1v15);
        assert_eq!(SeedPadding::try_from(0x01).unwrap(), SeedPadding::OaepSha1);
        assert_eq!(SeedPadding::try_from(0x02).unwrap(), SeedPadding::OaepSha256);
        assert_eq!(SeedPadding::try_from(0xff).unwrap(), SeedPadding::Unspecified);
        assert!(matches!(
            SeedPadding::try_from(0x03),
            Err(AuxAttestationError::BadSeedPadding)
        ));
    }
}
