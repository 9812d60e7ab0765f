use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// "Last event observed at" marker, updated on every decoded event.
#[derive(Debug, Clone, Default)]
pub struct LivenessMarker {
    /// Milliseconds since the epoch; zero means nothing observed yet.
    last_event_ms: Arc<AtomicI64>,
}

impl LivenessMarker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.last_event_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        match self.last_event_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}
