//! Content-hash deduplication
//!
//! Identity of a screenshot is the SHA-256 of its bytes, never its name. A
//! renamed copy of an analyzed image is the same screenshot.
//!
//! [`DeduplicationIndex::classify`] is the pure decision. An index instance
//! is built once per batch from a single prefetch query and additionally
//! remembers the hashes already claimed in that batch, so identical bytes
//! under two names are analyzed once.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::models::{ScreenshotRecord, SkipReason, VerificationState};
use crate::validators::MAX_ANALYSIS_ATTEMPTS;

/// Lowercase hex SHA-256 of raw bytes
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// What to do with a hash given the stored record (if any)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// Never seen: extract and save
    New,
    /// Seen, state A
    SkipComplete,
    /// Seen, state C
    SkipConfirmedIncomplete,
    /// Seen, not terminal, but every attempt is used
    SkipAttemptsExhausted,
    /// Seen, state B, D or unverified, with attempts left
    Reanalyze,
}

impl DedupDecision {
    /// Skip reason for skipping decisions
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::SkipComplete => Some(SkipReason::Complete),
            Self::SkipConfirmedIncomplete => Some(SkipReason::ConfirmedIncomplete),
            Self::SkipAttemptsExhausted => Some(SkipReason::AttemptsExhausted),
            Self::New | Self::Reanalyze => None,
        }
    }
}

/// Admission of one file into a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Send to the oracle; `existing` is set for a re-analysis
    Process { existing: Option<ScreenshotRecord> },
    Skip(SkipReason),
}

/// Per-batch deduplication index
#[derive(Debug, Default)]
pub struct DeduplicationIndex {
    existing: HashMap<String, ScreenshotRecord>,
    claimed: HashSet<String>,
}

impl DeduplicationIndex {
    /// Build an index from the records prefetched for this batch
    pub fn new(existing: HashMap<String, ScreenshotRecord>) -> Self {
        Self {
            existing,
            claimed: HashSet::new(),
        }
    }

    /// Pure classification of a hash against its stored record
    pub fn classify(_hash: &str, existing: Option<&ScreenshotRecord>) -> DedupDecision {
        let Some(record) = existing else {
            return DedupDecision::New;
        };

        match record.verification_state {
            Some(VerificationState::Complete) => DedupDecision::SkipComplete,
            Some(VerificationState::VerifiedIncomplete) => DedupDecision::SkipConfirmedIncomplete,
            _ if record.analysis_count >= MAX_ANALYSIS_ATTEMPTS => DedupDecision::SkipAttemptsExhausted,
            _ => DedupDecision::Reanalyze,
        }
    }

    /// Decide one file of the batch, claiming its hash
    pub fn admit(&mut self, hash: &str) -> Admission {
        if !self.claimed.insert(hash.to_string()) {
            debug!(hash = %hash, "Duplicate content within batch");
            return Admission::Skip(SkipReason::DuplicateInBatch);
        }

        let existing = self.existing.get(hash);
        let decision = Self::classify(hash, existing);
        debug!(hash = %hash, decision = ?decision, "Classified content hash");

        match decision.skip_reason() {
            Some(reason) => Admission::Skip(reason),
            None => Admission::Process {
                existing: existing.cloned(),
            },
        }
    }

    /// Number of prefetched records
    pub fn known_len(&self) -> usize {
        self.existing.len()
    }
}
