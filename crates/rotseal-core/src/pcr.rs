//! Measurement registers and the sealing policies evaluated against them.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width of one sealing policy clause on the wire. Digests shorter than the
/// clause are right-padded with zeros.
pub const PCR_CLAUSE_LEN: usize = 64;

/// Most clauses a single sealing policy may carry.
pub const MAX_POLICY_CLAUSES: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PcrError {
    #[error("measurement bank {0} does not exist")]
    InvalidBank(usize),
    #[error("sealing policy has too many clauses ({0})")]
    TooManyClauses(usize),
    #[error("sealing policy length {0} is not a whole number of clauses")]
    MalformedPolicy(usize),
}

/// Read access to the current measurement state.
pub trait MeasurementStore {
    /// Current digest of a PCR bank. The returned length is the bank's
    /// active hash length.
    fn pcr_value(&self, bank: usize) -> Result<Vec<u8>, PcrError>;
}

/// Software PCR store with SHA-256 extend semantics.
pub struct PcrStore {
    banks: Vec<[u8; 32]>,
}

impl PcrStore {
    /// All banks start at the all-zero reset value.
    pub fn new(bank_count: usize) -> Self {
        Self {
            banks: vec![[0u8; 32]; bank_count],
        }
    }

    /// Fold a measurement into a bank: `new = SHA-256(old || measurement)`.
    pub fn extend(&mut self, bank: usize, measurement: &[u8]) -> Result<[u8; 32], PcrError> {
        let slot = self.banks.get_mut(bank).ok_or(PcrError::InvalidBank(bank))?;
        let mut hasher = Sha256::new();
        hasher.update(&*slot);
        hasher.update(measurement);
        *slot = hasher.finalize().into();
        Ok(*slot)
    }

    /// Overwrite a bank with a known digest.
    pub fn set(&mut self, bank: usize, digest: [u8; 32]) -> Result<(), PcrError> {
        let slot = self.banks.get_mut(bank).ok_or(PcrError::InvalidBank(bank))?;
        *slot = digest;
        Ok(())
    }
}

impl MeasurementStore for PcrStore {
    fn pcr_value(&self, bank: usize) -> Result<Vec<u8>, PcrError> {
        self.banks
            .get(bank)
            .map(|d| d.to_vec())
            .ok_or(PcrError::InvalidBank(bank))
    }
}

/// An ordered list of expected PCR digests gating an unseal request.
/// Clause index i speaks for measurement bank i; an all-zero clause is a
/// wildcard.
pub struct SealingPolicy<'a> {
    clauses: &'a [[u8; PCR_CLAUSE_LEN]],
}

impl<'a> SealingPolicy<'a> {
    pub fn new(clauses: &'a [[u8; PCR_CLAUSE_LEN]]) -> Result<Self, PcrError> {
        if clauses.len() > MAX_POLICY_CLAUSES {
            return Err(PcrError::TooManyClauses(clauses.len()));
        }
        Ok(Self { clauses })
    }

    /// Decode the wire layout: `pcr_count` contiguous 64-byte clauses.
    pub fn parse(raw: &[u8]) -> Result<Vec<[u8; PCR_CLAUSE_LEN]>, PcrError> {
        if raw.len() % PCR_CLAUSE_LEN != 0 {
            return Err(PcrError::MalformedPolicy(raw.len()));
        }
        let count = raw.len() / PCR_CLAUSE_LEN;
        if count > MAX_POLICY_CLAUSES {
            return Err(PcrError::TooManyClauses(count));
        }
        Ok(raw
            .chunks_exact(PCR_CLAUSE_LEN)
            .map(|c| {
                let mut clause = [0u8; PCR_CLAUSE_LEN];
                clause.copy_from_slice(c);
                clause
            })
            .collect())
    }

    pub fn clauses(&self) -> &[[u8; PCR_CLAUSE_LEN]] {
        self.clauses
    }

    pub fn is_wildcard(clause: &[u8; PCR_CLAUSE_LEN]) -> bool {
        clause.iter().all(|&b| b == 0)
    }

    /// Check every clause against the live measurements. An empty policy is
    /// trivially satisfied. The result carries no clause index; callers must
    /// keep policy failures opaque.
    pub fn satisfied_by(&self, store: &dyn MeasurementStore) -> Result<bool, PcrError> {
        for (bank, clause) in self.clauses.iter().enumerate() {
            if Self::is_wildcard(clause) {
                continue;
            }
            let value = store.pcr_value(bank)?;
            let len = value.len().min(PCR_CLAUSE_LEN);
            if clause[..len] != value[..len] {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
