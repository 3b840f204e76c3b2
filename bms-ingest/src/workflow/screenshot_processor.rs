//! Per-screenshot processing chain
//!
//! oracle → unit/decimal fixes → nulling of impossible values → physics
//! validation → verification state → weather (optional) → save or update.
//!
//! Physics errors never stop a save; they are stored with the record and
//! feed the verification state. Only oracle and persistence failures make an
//! item fail, and their messages are passed through untouched so the
//! executor can recognize throttling.

use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{PersistenceError, RecordRepository};
use crate::extractors::{detect_mime_type, SiteLocation, VisionError, VisionExtractor, WeatherLookup, WeatherSample};
use crate::models::{ItemOutcome, RecordUpdate, ScreenshotRecord};
use crate::validators::{should_reanalyze, PhysicsPolicy, PhysicsValidator, SanityFixer, VerificationStateMachine};

/// Per-item failure
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// One screenshot admitted for extraction
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub file_name: String,
    pub bytes: Arc<[u8]>,
    pub content_hash: String,
    pub timestamp: NaiveDateTime,
    /// Stored record when this is a re-analysis
    pub existing: Option<ScreenshotRecord>,
}

/// Optional weather enrichment
#[derive(Clone)]
pub struct WeatherEnrichment {
    pub lookup: Arc<dyn WeatherLookup>,
    pub site: SiteLocation,
}

/// Runs the chain for one [`WorkItem`]
pub struct ScreenshotProcessor {
    vision: Arc<dyn VisionExtractor>,
    repository: Arc<dyn RecordRepository>,
    weather: Option<WeatherEnrichment>,
    fixer: SanityFixer,
    validator: PhysicsValidator,
    state_machine: VerificationStateMachine,
}

impl ScreenshotProcessor {
    pub fn new(
        vision: Arc<dyn VisionExtractor>,
        repository: Arc<dyn RecordRepository>,
        policy: PhysicsPolicy,
    ) -> Self {
        Self {
            vision,
            repository,
            weather: None,
            fixer: SanityFixer::with_policy(policy.clone()),
            validator: PhysicsValidator::with_policy(policy.clone()),
            state_machine: VerificationStateMachine::with_policy(policy),
        }
    }

    /// Enable weather enrichment for a site
    pub fn with_weather(mut self, lookup: Arc<dyn WeatherLookup>, site: SiteLocation) -> Self {
        self.weather = Some(WeatherEnrichment { lookup, site });
        self
    }

    pub async fn process(&self, item: &WorkItem) -> Result<ItemOutcome, ProcessError> {
        let mime_type = detect_mime_type(&item.bytes, &item.file_name);
        let raw = self
            .vision
            .extract(&item.bytes, mime_type, item.timestamp)
            .await?;

        let rescaled = self.fixer.attempt_fix(&raw);
        let sanitized = self.fixer.apply_sanity_fixes(&rescaled.fixed);
        let fields = sanitized.fixed;
        let mut fixes_applied = rescaled.fixes;
        fixes_applied.extend(sanitized.fixes);

        let validation = self.validator.validate(&fields);

        let (previous, analysis_count) = match &item.existing {
            Some(record) => (record.verification_state, record.analysis_count + 1),
            None => (None, 1),
        };
        let decision = self.state_machine.determine_state(&fields, previous, analysis_count);

        debug!(
            file = %item.file_name,
            state = %decision.state,
            analysis_count,
            physics_valid = validation.valid,
            fixes = fixes_applied.len(),
            "Extraction classified"
        );

        let weather = self.lookup_weather(item).await;

        match &item.existing {
            None => {
                let mut record = ScreenshotRecord::new(
                    item.content_hash.clone(),
                    item.file_name.clone(),
                    item.timestamp,
                    fields,
                );
                record.verification_state = Some(decision.state);
                record.missing_fields = decision.missing_fields;
                record.validation = validation;
                record.fixes_applied = fixes_applied;
                record.weather = weather;
                record.needs_reanalysis = should_reanalyze(&record).should;

                let record_id = self.repository.save(&record).await?;
                Ok(ItemOutcome::Processed {
                    record_id,
                    state: decision.state,
                })
            }
            Some(existing) => {
                let mut update = RecordUpdate {
                    fields,
                    verification_state: decision.state,
                    analysis_count,
                    needs_reanalysis: false,
                    missing_fields: decision.missing_fields,
                    validation,
                    fixes_applied,
                    weather,
                };
                update.needs_reanalysis = projected_needs_reanalysis(existing, &update);

                let updated = self.repository.update(existing.id, &update).await?;
                Ok(ItemOutcome::Updated {
                    record_id: updated.id,
                    state: decision.state,
                    analysis_count: updated.analysis_count,
                })
            }
        }
    }

    async fn lookup_weather(&self, item: &WorkItem) -> Option<WeatherSample> {
        let enrichment = self.weather.as_ref()?;
        match enrichment
            .lookup
            .lookup(enrichment.site.latitude, enrichment.site.longitude, item.timestamp)
            .await
        {
            Ok(sample) => sample,
            Err(e) => {
                warn!(file = %item.file_name, error = %e, "Weather lookup failed, saving without it");
                None
            }
        }
    }
}

/// Re-analysis policy evaluated against the record as it will be stored
fn projected_needs_reanalysis(existing: &ScreenshotRecord, update: &RecordUpdate) -> bool {
    let mut projected = existing.clone();
    projected.apply_update(update);
    should_reanalyze(&projected).should
}
