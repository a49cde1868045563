//! Operation timing.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PerformanceConfig;

/// Wall-clock timer for one named operation.
#[derive(Debug)]
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    #[must_use]
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Stop the timer, logging slow operations. Returns elapsed milliseconds.
    pub fn finish(self, perf: &PerformanceConfig) -> u64 {
        let elapsed = self.elapsed_ms();
        if perf.enabled {
            if elapsed >= perf.slow_operation_ms {
                warn!(operation = self.label, elapsed_ms = elapsed, "slow operation");
            } else {
                debug!(operation = self.label, elapsed_ms = elapsed, "operation timed");
            }
        }
        elapsed
    }
}

/// Timings attached to evidence records when performance metrics are on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_ms: Option<u64>,
}

impl TimingMetrics {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.duration_ms.is_none() && self.write_ms.is_none()
    }
}
