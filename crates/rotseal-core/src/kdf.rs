//! NIST SP 800-108 counter-mode key derivation over an HMAC capability.

use thiserror::Error;
use zeroize::Zeroize;

use crate::hash::{HashEngine, HashError, HmacAlgorithm, MAX_HASH_LEN};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KdfError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Fill `ko` with counter-mode KDF output:
///
/// `K(i) = HMAC(ki, BE32(i) || label || 0x00 || context || BE32(bits(ko)))`
///
/// for `i` starting at 1, concatenated and truncated to `ko.len()`. Engine
/// failures cancel the in-flight HMAC context and propagate unchanged.
pub fn nist800_108_counter_mode(
    hash: &mut dyn HashEngine,
    alg: HmacAlgorithm,
    ki: &[u8],
    label: &[u8],
    context: &[u8],
    ko: &mut [u8],
) -> Result<(), KdfError> {
    if ki.is_empty() || ko.is_empty() {
        return Err(KdfError::InvalidArgument);
    }
    let l_bits = u32::try_from(ko.len())
        .ok()
        .and_then(|n| n.checked_mul(8))
        .ok_or(KdfError::InvalidArgument)?;

    let h = alg.digest_len();
    let rounds = ko.len().div_ceil(h) as u32;
    let mut block = [0u8; MAX_HASH_LEN];

    for i in 1..=rounds {
        hash.hmac_start(alg, ki)?;

        let mut round = |hash: &mut dyn HashEngine| -> Result<(), HashError> {
            hash.update(&i.to_be_bytes())?;
            hash.update(label)?;
            hash.update(&[0u8])?;
            hash.update(context)?;
            hash.update(&l_bits.to_be_bytes())?;
            hash.finish(&mut block[..h]).map(|_| ())
        };
        if let Err(e) = round(hash) {
            hash.cancel();
            block.zeroize();
            return Err(e.into());
        }

        let offset = ((i - 1) as usize) * h;
        let take = h.min(ko.len() - offset);
        ko[offset..offset + take].copy_from_slice(&block[..take]);
    }

    block.zeroize();
    Ok(())
}
