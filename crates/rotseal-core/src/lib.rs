pub mod asym;
pub mod credential;
pub mod hash;
pub mod identity;
pub mod kdf;
pub mod keystore;
pub mod pcr;
pub mod security;
pub mod unseal;
pub mod verify;
pub mod x509;

pub use asym::{EccEngine, OaepHash, RsaEngine, RsaPadding, SoftEcc, SoftRsa};
pub use credential::{AuxAttestation, AuxAttestationError, Cert, AUX_KEY_BITS, AUX_KEY_ID};
pub use hash::{constant_time_eq, HashEngine, HmacAlgorithm, SoftwareHash};
pub use identity::DeviceIdentity;
pub use keystore::{FileKeystore, Keystore, MemoryKeystore};
pub use pcr::{
    MeasurementStore, PcrStore, SealingPolicy, MAX_POLICY_CLAUSES, PCR_CLAUSE_LEN,
};
pub use unseal::{SeedPadding, SeedType, UnsealRequest, UNSEAL_KEY_LEN};
pub use verify::{EcdsaVerification, SignatureVerification};
pub use x509::{RcgenX509, X509Engine};
