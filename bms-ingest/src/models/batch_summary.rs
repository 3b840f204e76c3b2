//! Batch results and per-item reports
//!
//! A summary is always produced, even when most items failed: per-item errors
//! are recorded here, never raised.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::VerificationState;

/// Why an item was not sent to the vision oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// Existing record is complete (state A)
    Complete,
    /// Existing record is confirmed incomplete (state C)
    ConfirmedIncomplete,
    /// Existing record already used every allowed attempt
    AttemptsExhausted,
    /// Same bytes appeared earlier in this batch
    DuplicateInBatch,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::ConfirmedIncomplete => "confirmed incomplete",
            Self::AttemptsExhausted => "attempts exhausted",
            Self::DuplicateInBatch => "duplicate in batch",
        }
    }
}

/// Outcome of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// New record created
    Processed {
        record_id: Uuid,
        state: VerificationState,
    },
    /// Existing record re-analyzed
    Updated {
        record_id: Uuid,
        state: VerificationState,
        analysis_count: u32,
    },
    /// Not sent to the oracle
    Skipped { reason: SkipReason },
    /// Filename does not carry a valid timestamp
    Rejected { reason: String },
    /// Oracle or persistence failure
    Failed { error: String },
    /// Batch cancelled before the item was dequeued
    Cancelled,
}

impl ItemOutcome {
    /// Short label for progress events and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Updated { .. } => "updated",
            Self::Skipped { .. } => "skipped",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Report line for one input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub file_name: String,
    /// `None` only when the item could not be hashed
    pub content_hash: Option<String>,
    pub outcome: ItemOutcome,
}

/// Batch completion summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: usize,
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub rejected: usize,
    /// Failed plus cancelled items
    pub errored: usize,
    /// Items in input order
    pub items: Vec<ItemReport>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Concurrency at the end of the run
    pub final_concurrency: usize,
}

impl BatchSummary {
    /// Create an empty summary
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            total: 0,
            processed: 0,
            updated: 0,
            skipped: 0,
            rejected: 0,
            errored: 0,
            items: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
            final_concurrency: 0,
        }
    }

    /// Append an item and bump the matching counter
    pub fn record(&mut self, report: ItemReport) {
        self.total += 1;
        match report.outcome {
            ItemOutcome::Processed { .. } => self.processed += 1,
            ItemOutcome::Updated { .. } => self.updated += 1,
            ItemOutcome::Skipped { .. } => self.skipped += 1,
            ItemOutcome::Rejected { .. } => self.rejected += 1,
            ItemOutcome::Failed { .. } | ItemOutcome::Cancelled => self.errored += 1,
        }
        self.items.push(report);
    }

    /// Items whose outcome matches a predicate
    pub fn items_where<F>(&self, predicate: F) -> impl Iterator<Item = &ItemReport>
    where
        F: Fn(&ItemOutcome) -> bool,
    {
        self.items.iter().filter(move |item| predicate(&item.outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_each_outcome() {
        let mut summary = BatchSummary::new(Uuid::new_v4());
        let outcomes = vec![
            ItemOutcome::Processed {
                record_id: Uuid::new_v4(),
                state: VerificationState::Complete,
            },
            ItemOutcome::Skipped {
                reason: SkipReason::DuplicateInBatch,
            },
            ItemOutcome::Rejected {
                reason: "bad name".to_string(),
            },
            ItemOutcome::Failed {
                error: "boom".to_string(),
            },
            ItemOutcome::Cancelled,
        ];

        for (i, outcome) in outcomes.into_iter().enumerate() {
            summary.record(ItemReport {
                file_name: format!("file-{}", i),
                content_hash: None,
                outcome,
            });
        }

        assert_eq!(summary.total, 5);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.errored, 2);
        assert_eq!(summary.items_where(|o| matches!(o, ItemOutcome::Failed { .. })).count(), 1);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = ItemOutcome::Skipped {
            reason: SkipReason::ConfirmedIncomplete,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "CONFIRMED_INCOMPLETE");
    }
}
