use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::lock;

/// Bytes moved so far and the total, when the backend has reported one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

impl ProgressSnapshot {
    pub fn new(bytes_transferred: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// Completion in percent (0-100).
    ///
    /// Returns `None` (indeterminate) while the total is unknown or zero.
    pub fn percent_complete(&self) -> Option<f64> {
        self.fraction().map(|f| f * 100.0)
    }

    /// Completion as a fraction in `0.0..=1.0`, for progress widgets.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.bytes_transferred as f64 / total as f64).min(1.0))
            }
            _ => None,
        }
    }

    /// Bytes left, if the total is known.
    pub fn remaining(&self) -> Option<u64> {
        self.total_bytes
            .map(|total| total.saturating_sub(self.bytes_transferred))
    }
}

// ---------------------------------------------------------------------------
// ThroughputMeter
// ---------------------------------------------------------------------------

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Transfer rate over a sliding window of cumulative byte counts.
pub struct ThroughputMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    samples: Vec<Sample>,
    max_samples: usize,
    window: Duration,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ThroughputMeter {
    /// - `window`: time span considered (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window: window.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records the cumulative byte count of a transfer at the current instant.
    pub fn record(&self, snapshot: &ProgressSnapshot) {
        self.record_at(snapshot.bytes_transferred, Instant::now());
    }

    fn record_at(&self, bytes: u64, at: Instant) {
        let mut m = lock(&self.inner);
        m.samples.push(Sample { bytes, at });

        let cutoff = at.checked_sub(m.window);
        if let Some(cutoff) = cutoff {
            m.samples.retain(|s| s.at >= cutoff);
        }

        if m.samples.len() > m.max_samples {
            let excess = m.samples.len() - m.max_samples;
            m.samples.drain(..excess);
        }
    }

    /// Average bytes/second within the window; 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let m = lock(&self.inner);
        let (Some(first), Some(last)) = (m.samples.first(), m.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        last.bytes.saturating_sub(first.bytes) as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to finish; `None` when the rate or total is unknown.
    pub fn eta(&self, snapshot: &ProgressSnapshot) -> Option<Duration> {
        let remaining = snapshot.remaining()?;
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    pub fn reset(&self) {
        lock(&self.inner).samples.clear();
    }
}
