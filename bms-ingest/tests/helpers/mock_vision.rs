//! Scripted vision oracle

use async_trait::async_trait;
use bms_ingest::extractors::{VisionError, VisionExtractor};
use bms_ingest::models::ExtractedFields;
use chrono::NaiveDateTime;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted oracle response
#[derive(Debug, Clone)]
pub enum Scripted {
    Fields(ExtractedFields),
    RateLimited,
    Fail(String),
}

/// Answers by image bytes; unscripted images get the default fields
pub struct ScriptedVision {
    default_fields: ExtractedFields,
    scripts: Mutex<HashMap<Vec<u8>, VecDeque<Scripted>>>,
    rate_limit_first: AtomicUsize,
    delay: Duration,
    calls: AtomicUsize,
    forced_timestamps: Mutex<Vec<NaiveDateTime>>,
}

impl ScriptedVision {
    pub fn new(default_fields: ExtractedFields) -> Self {
        Self {
            default_fields,
            scripts: Mutex::new(HashMap::new()),
            rate_limit_first: AtomicUsize::new(0),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            forced_timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Queue responses for one image; the last one repeats
    pub fn script(self, image: &[u8], responses: Vec<Scripted>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(image.to_vec(), responses.into());
        self
    }

    /// Throttle the first `count` calls regardless of image
    pub fn rate_limit_first(self, count: usize) -> Self {
        self.rate_limit_first.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Timestamps passed to the oracle, in call order
    pub fn forced_timestamps(&self) -> Vec<NaiveDateTime> {
        self.forced_timestamps.lock().unwrap().clone()
    }

    fn next_response(&self, image: &[u8]) -> Scripted {
        let throttled = self
            .rate_limit_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            return Scripted::RateLimited;
        }

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(image) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Scripted::Fields(self.default_fields.clone())),
            None => Scripted::Fields(self.default_fields.clone()),
        }
    }
}

#[async_trait]
impl VisionExtractor for ScriptedVision {
    async fn extract(
        &self,
        image: &[u8],
        _mime_type: &str,
        forced_timestamp: NaiveDateTime,
    ) -> Result<ExtractedFields, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.forced_timestamps.lock().unwrap().push(forced_timestamp);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_response(image) {
            Scripted::Fields(fields) => Ok(fields),
            Scripted::RateLimited => Err(VisionError::RateLimited("slow down".to_string())),
            Scripted::Fail(message) => Err(VisionError::InvalidResponse(message)),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
