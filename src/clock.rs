//! Wall-clock source with test-time fast-forwarding.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Cloneable clock handle. Real time plus an adjustable offset; tests
/// advance the offset instead of sleeping.
#[derive(Clone, Default)]
pub struct Clock {
    offset_ms: Arc<AtomicI64>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wall-clock time in UTC.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::Relaxed))
    }

    /// Current wall-clock time in the given timezone.
    pub fn now_in(&self, tz: Tz) -> DateTime<Tz> {
        self.now().with_timezone(&tz)
    }

    /// Async sleep. Combined with tokio's paused test time this lets tests
    /// fast-forward through waits deterministically.
    pub async fn sleep(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Shift the clock forward. Test-only lever; production code never
    /// calls this.
    pub fn advance(&self, duration: chrono::Duration) {
        self.offset_ms
            .fetch_add(duration.num_milliseconds(), Ordering::Relaxed);
    }
}
