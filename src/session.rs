//! # Recording Session Module
//!
//! The bounded-duration capture state machine. This type is plain data driven
//! by explicit instants; [`crate::recorder::Recorder`] owns one behind a mutex
//! and feeds it from the sample stream and the elapsed-time ticker.
//!
//! ## States
//! ```text
//! Idle|Closed ──arm──▶ Armed ──start──▶ Active ──stop/elapsed──▶ Finalizing
//!                                         │                          │
//!                                       abort                    finalize
//!                                         ▼                          ▼
//!                                        Idle          Closed (or Idle if empty)
//! ```
//!
//! ## Window Accounting
//! A sample belongs to the recording when its receive instant lies in
//! `[started_at, cutoff]`. The cutoff is `started_at + duration_target`, or the
//! stop instant when stopped early. Samples received before the cutoff but
//! delivered during `Finalizing` are still admitted; nothing received after it
//! is. The recorded count is always the buffer length.

use crate::error::SessionError;
use crate::sensor::{SensorSample, TimedSample};
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Armed,
    Active,
    Finalizing,
    Closed,
}

/// A finished, labeled recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMotion {
    pub motion_name: String,
    /// ISO-8601 wall-clock time the recording started
    pub timestamp: String,
    pub data: Vec<SensorSample>,
}

/// Outcome of an elapsed-time tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    Progress(f64),
    /// The target duration elapsed and the session moved to `Finalizing`
    Elapsed,
    /// Nothing to do: the session is not `Active`
    Inactive,
}

pub struct RecordingSession {
    state: SessionState,
    label: String,
    duration_target: Duration,
    started_at: Option<Instant>,
    started_wall: Option<DateTime<Utc>>,
    cutoff: Option<Instant>,
    samples: Vec<SensorSample>,
    progress: f64,
    generation: u64,
}

impl RecordingSession {
    pub fn new(duration_target: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            label: String::new(),
            duration_target,
            started_at: None,
            started_wall: None,
            cutoff: None,
            samples: Vec::new(),
            progress: 0.0,
            generation: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn duration_target(&self) -> Duration {
        self.duration_target
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Bumped on every successful `arm`; timers compare it to detect staleness
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_busy(&self) -> bool {
        matches!(
            self.state,
            SessionState::Armed | SessionState::Active | SessionState::Finalizing
        )
    }

    /// Validate the label and calibration, then reset the buffer.
    ///
    /// On failure an idle or closed session is left `Idle`.
    pub fn arm(&mut self, label: &str, calibrated: bool) -> Result<u64, SessionError> {
        if self.is_busy() {
            return Err(SessionError::AlreadyRecording);
        }

        let label = label.trim();
        if label.is_empty() {
            self.state = SessionState::Idle;
            return Err(SessionError::InvalidLabel);
        }
        if !calibrated {
            self.state = SessionState::Idle;
            return Err(SessionError::NotCalibrated);
        }

        self.label = label.to_string();
        self.samples.clear();
        self.progress = 0.0;
        self.started_at = None;
        self.started_wall = None;
        self.cutoff = None;
        self.generation += 1;
        self.state = SessionState::Armed;
        Ok(self.generation)
    }

    /// Start the clock. Only valid from `Armed`.
    pub fn start(&mut self, now: Instant, wall: DateTime<Utc>) -> bool {
        if self.state != SessionState::Armed {
            return false;
        }
        self.started_at = Some(now);
        self.started_wall = Some(wall);
        self.state = SessionState::Active;
        true
    }

    /// Append `sample` if it was received inside the recording window
    pub fn accept(&mut self, sample: &TimedSample) -> bool {
        let Some(start) = self.started_at else {
            return false;
        };
        let window_end = match (self.state, self.cutoff) {
            (SessionState::Active, _) => self.deadline(start),
            (SessionState::Finalizing, Some(cutoff)) => Some(cutoff),
            _ => return false,
        };

        if sample.received_at < start || window_end.map_or(false, |end| sample.received_at > end) {
            return false;
        }
        self.samples.push(sample.sample);
        true
    }

    /// Advance progress from the elapsed time; moves to `Finalizing` once the
    /// target is reached
    pub fn tick(&mut self, now: Instant) -> Tick {
        let (SessionState::Active, Some(start)) = (self.state, self.started_at) else {
            return Tick::Inactive;
        };

        let elapsed = now.saturating_duration_since(start);
        self.progress =
            (elapsed.as_secs_f64() / self.duration_target.as_secs_f64()).min(1.0);

        if elapsed >= self.duration_target {
            self.request_stop(self.deadline(start).unwrap_or(now));
            Tick::Elapsed
        } else {
            Tick::Progress(self.progress)
        }
    }

    /// `Active → Finalizing` with the cutoff at `at` (clamped to the window).
    ///
    /// Returns false when the session is not `Active`, which makes repeated
    /// stops harmless.
    pub fn request_stop(&mut self, at: Instant) -> bool {
        let (SessionState::Active, Some(start)) = (self.state, self.started_at) else {
            return false;
        };
        let cutoff = match self.deadline(start) {
            Some(end) => at.clamp(start, end),
            None => at.max(start),
        };
        self.cutoff = Some(cutoff);
        self.state = SessionState::Finalizing;
        true
    }

    /// Freeze the buffer into a `RecordedMotion`.
    ///
    /// An `Active` session is stopped at `now` first. An empty buffer yields
    /// `EmptyRecording` and returns the session to `Idle`.
    pub fn finalize(&mut self, now: Instant) -> Result<RecordedMotion, SessionError> {
        if self.state == SessionState::Active {
            self.request_stop(now);
        }
        if self.state != SessionState::Finalizing {
            return Err(SessionError::NotRecording);
        }

        if self.samples.is_empty() {
            self.reset();
            return Err(SessionError::EmptyRecording);
        }

        let timestamp = self
            .started_wall
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        self.state = SessionState::Closed;
        Ok(RecordedMotion {
            motion_name: self.label.clone(),
            timestamp,
            data: std::mem::take(&mut self.samples),
        })
    }

    /// Discard a session whose window is still open. Returns false if there
    /// was none.
    ///
    /// A `Finalizing` session is left alone: its window already closed and
    /// the buffer only waits for in-flight samples, so the owner finalizes it
    /// instead.
    pub fn abort(&mut self) -> bool {
        if !matches!(self.state, SessionState::Armed | SessionState::Active) {
            return false;
        }
        self.reset();
        true
    }

    /// End of the recording window, or `None` when the target is too large to
    /// be represented as an instant
    fn deadline(&self, start: Instant) -> Option<Instant> {
        start.checked_add(self.duration_target)
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.cutoff = None;
        self.started_at = None;
        self.started_wall = None;
        self.progress = 0.0;
        self.state = SessionState::Idle;
    }
}
