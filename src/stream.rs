//! # Sample Stream Module
//!
//! Single-writer fan-out point for decoded samples. Every sample overwrites the
//! one-slot "latest" value used by the display path and is offered to the
//! recording sink. There is no queue and no backpressure: the radio link bounds
//! the sample rate and the display only ever wants the newest value.

use crate::sensor::{SensorSample, TimedSample};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receiver of published samples.
///
/// The stream can only append through this seam; it never reads back what the
/// sink has kept.
pub trait SampleSink: Send + Sync {
    /// Returns whether the sample was retained
    fn offer(&self, sample: &TimedSample) -> bool;
}

pub struct SampleStream {
    latest: Mutex<Option<TimedSample>>,
    sink: Arc<dyn SampleSink>,
    published: AtomicU64,
    retained: AtomicU64,
}

impl SampleStream {
    pub fn new(sink: Arc<dyn SampleSink>) -> Self {
        Self {
            latest: Mutex::new(None),
            sink,
            published: AtomicU64::new(0),
            retained: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, sample: TimedSample) {
        *self.latest.lock() = Some(sample);
        self.published.fetch_add(1, Ordering::Relaxed);

        if self.sink.offer(&sample) {
            self.retained.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Most recent sample, if any arrived since the last `clear`
    pub fn latest(&self) -> Option<SensorSample> {
        self.latest.lock().map(|timed| timed.sample)
    }

    /// Drop the displayed value, e.g. after a disconnect
    pub fn clear(&self) {
        *self.latest.lock() = None;
    }

    /// Samples published since creation
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Samples the sink kept since creation
    pub fn retained(&self) -> u64 {
        self.retained.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Vec3;
    use tokio::time::Instant;

    /// Keeps every other sample
    struct Alternating {
        offered: AtomicU64,
    }

    impl SampleSink for Alternating {
        fn offer(&self, _sample: &TimedSample) -> bool {
            self.offered.fetch_add(1, Ordering::Relaxed) % 2 == 0
        }
    }

    fn timed(temp: f64) -> TimedSample {
        TimedSample::new(
            SensorSample::new(Vec3::default(), Vec3::default(), temp),
            Instant::now(),
        )
    }

    #[test]
    fn test_latest_is_last_write() {
        let sink = Arc::new(Alternating {
            offered: AtomicU64::new(0),
        });
        let stream = SampleStream::new(sink.clone());
        assert!(stream.latest().is_none());

        stream.publish(timed(20.0));
        stream.publish(timed(21.0));
        stream.publish(timed(22.0));

        assert_eq!(stream.latest().map(|s| s.temp), Some(22.0));
        assert_eq!(stream.published(), 3);
        assert_eq!(sink.offered.load(Ordering::Relaxed), 3);
        assert_eq!(stream.retained(), 2);
    }

    #[test]
    fn test_clear_drops_latest() {
        let stream = SampleStream::new(Arc::new(Alternating {
            offered: AtomicU64::new(0),
        }));
        stream.publish(timed(20.0));
        stream.clear();
        assert!(stream.latest().is_none());
        assert_eq!(stream.published(), 1);
    }
}
