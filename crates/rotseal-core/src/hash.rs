use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const SHA1_HASH_LEN: usize = 20;
pub const SHA256_HASH_LEN: usize = 32;

/// Largest digest any supported HMAC algorithm produces.
pub const MAX_HASH_LEN: usize = SHA256_HASH_LEN;

/// HMAC algorithms the core negotiates. SHA-256 is mandatory for unsealing;
/// SHA-1 exists for KDF interoperability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha1,
    Sha256,
}

impl HmacAlgorithm {
    pub const fn digest_len(self) -> usize {
        match self {
            HmacAlgorithm::Sha1 => SHA1_HASH_LEN,
            HmacAlgorithm::Sha256 => SHA256_HASH_LEN,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("no active hmac context")]
    NoActiveContext,
    #[error("an hmac context is already active")]
    ContextActive,
    #[error("output buffer too small for digest")]
    BufferTooSmall,
    #[error("hash engine failure: {0}")]
    Engine(&'static str),
}

/// Incremental HMAC capability.
///
/// One context at a time; `hmac_start` claims it, `finish` or `cancel`
/// releases it. Implementations are not required to be thread-safe.
pub trait HashEngine {
    fn hmac_start(&mut self, alg: HmacAlgorithm, key: &[u8]) -> Result<(), HashError>;

    /// Feed more message bytes into the active context.
    fn update(&mut self, data: &[u8]) -> Result<(), HashError>;

    /// Write the tag into `out` and release the context. Returns the digest
    /// length. A too-small `out` leaves the context active.
    fn finish(&mut self, out: &mut [u8]) -> Result<usize, HashError>;

    /// Drop the active context, if any.
    fn cancel(&mut self);

    /// One-shot HMAC over `data`. The context never survives this call.
    fn hmac(
        &mut self,
        alg: HmacAlgorithm,
        key: &[u8],
        data: &[u8],
        out: &mut [u8],
    ) -> Result<usize, HashError> {
        self.hmac_start(alg, key)?;
        if let Err(e) = self.update(data) {
            self.cancel();
            return Err(e);
        }
        match self.finish(out) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.cancel();
                Err(e)
            }
        }
    }
}

enum HmacState {
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
}

/// Software HMAC engine over the RustCrypto `hmac` implementations.
#[derive(Default)]
pub struct SoftwareHash {
    state: Option<HmacState>,
}

impl SoftwareHash {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashEngine for SoftwareHash {
    fn hmac_start(&mut self, alg: HmacAlgorithm, key: &[u8]) -> Result<(), HashError> {
        if self.state.is_some() {
            return Err(HashError::ContextActive);
        }
        let state = match alg {
            // new_from_slice accepts any key length
            HmacAlgorithm::Sha1 => HmacState::Sha1(
                Hmac::<Sha1>::new_from_slice(key).map_err(|_| HashError::Engine("hmac key"))?,
            ),
            HmacAlgorithm::Sha256 => HmacState::Sha256(
                Hmac::<Sha256>::new_from_slice(key).map_err(|_| HashError::Engine("hmac key"))?,
            ),
        };
        self.state = Some(state);
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<(), HashError> {
        match self.state.as_mut() {
            Some(HmacState::Sha1(mac)) => mac.update(data),
            Some(HmacState::Sha256(mac)) => mac.update(data),
            None => return Err(HashError::NoActiveContext),
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut [u8]) -> Result<usize, HashError> {
        let needed = match self.state.as_ref() {
            Some(HmacState::Sha1(_)) => SHA1_HASH_LEN,
            Some(HmacState::Sha256(_)) => SHA256_HASH_LEN,
            None => return Err(HashError::NoActiveContext),
        };
        if out.len() < needed {
            return Err(HashError::BufferTooSmall);
        }
        match self.state.take() {
            Some(HmacState::Sha1(mac)) => {
                out[..needed].copy_from_slice(&mac.finalize().into_bytes());
            }
            Some(HmacState::Sha256(mac)) => {
                out[..needed].copy_from_slice(&mac.finalize().into_bytes());
            }
            None => unreachable!(),
        }
        Ok(needed)
    }

    fn cancel(&mut self) {
        self.state = None;
    }
}

/// Constant-time byte comparison. Length mismatch is an immediate reject;
/// equal-length inputs are compared without data-dependent branching.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
