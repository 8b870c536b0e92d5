//! # Recorder Module
//!
//! Drives a [`RecordingSession`] from three independent triggers:
//! 1. sample delivery from the [`SampleStream`](crate::stream::SampleStream) (via `SampleSink`)
//! 2. the one-second elapsed-time ticker
//! 3. the grace timer that admits in-flight samples before finalization
//!
//! All three, plus the caller's `arm`/`stop`/`abort`, go through one mutex
//! that guards session state, buffer and the recordings set together. Timers
//! carry the session generation they were started for, so a timer outliving
//! its session is a no-op and a session finalizes at most once.
//!
//! ## Observers
//! Progress and outcomes are pushed to a single observer callback as
//! `SessionEvent`s instead of being polled.

use crate::error::SessionError;
use crate::sensor::TimedSample;
use crate::session::{RecordedMotion, RecordingSession, SessionState, Tick};
use crate::stream::SampleSink;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Interval of the elapsed-time ticker
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { label: String, duration: Duration },
    Progress { label: String, progress: f64, samples: usize },
    Stopping { label: String },
    Recorded { motion_name: String, samples: usize, timestamp: String },
    Failed { label: String, error: SessionError },
    /// The link dropped mid-session; nothing was saved
    Aborted { label: String },
}

struct RecorderState {
    session: RecordingSession,
    recordings: Vec<RecordedMotion>,
}

type Observer = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Shared handle to the recording state machine. Clones share state.
#[derive(Clone)]
pub struct Recorder {
    state: Arc<Mutex<RecorderState>>,
    grace: Duration,
    runtime: Handle,
    observer: Observer,
}

impl Recorder {
    /// Create a recorder whose timers run on `runtime`
    pub fn new(
        duration: Duration,
        grace: Duration,
        runtime: Handle,
        observer: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState {
                session: RecordingSession::new(duration),
                recordings: Vec::new(),
            })),
            grace,
            runtime,
            observer: Arc::new(observer),
        }
    }

    /// Open a session labeled `label` and start its clock and ticker
    pub fn arm(&self, label: &str, calibrated: bool) -> Result<(), SessionError> {
        let (generation, started_at, label, duration) = {
            let mut state = self.state.lock();
            let generation = state.session.arm(label, calibrated)?;
            let started_at = Instant::now();
            state.session.start(started_at, Utc::now());
            (
                generation,
                started_at,
                state.session.label().to_string(),
                state.session.duration_target(),
            )
        };

        log::info!("Recording '{}' started ({:?})", label, duration);
        self.emit(SessionEvent::Started { label, duration });
        self.spawn_ticker(generation, started_at);
        Ok(())
    }

    /// Request the end of the active session.
    ///
    /// Returns true if this call moved the session to `Finalizing`; repeated
    /// calls and calls without an active session return false.
    pub fn stop(&self) -> bool {
        let (stopped, generation, label) = {
            let mut state = self.state.lock();
            let stopped = state.session.request_stop(Instant::now());
            (
                stopped,
                state.session.generation(),
                state.session.label().to_string(),
            )
        };

        if !stopped {
            log::debug!("Stop requested with no active recording");
            return false;
        }

        log::info!("Recording '{}' stopping", label);
        self.emit(SessionEvent::Stopping { label });

        let recorder = self.clone();
        self.runtime.spawn(async move {
            recorder.finish_after_grace(generation).await;
        });
        true
    }

    /// Finalize immediately, skipping the grace delay
    pub fn finalize_now(&self) -> Result<RecordedMotion, SessionError> {
        let (outcome, label) = {
            let mut state = self.state.lock();
            let label = state.session.label().to_string();
            (Self::finalize_locked(&mut state), label)
        };
        self.report(&label, &outcome);
        outcome
    }

    /// Discard an armed or active session after the link dropped.
    ///
    /// Returns true if a session was aborted; the recordings set is untouched.
    /// A session that is already `Finalizing` is not aborted; see
    /// [`Recorder::finalize_now`].
    pub fn abort(&self) -> bool {
        let (aborted, label) = {
            let mut state = self.state.lock();
            let label = state.session.label().to_string();
            (state.session.abort(), label)
        };

        if aborted {
            log::warn!("Recording '{}' aborted", label);
            self.emit(SessionEvent::Aborted { label });
        }
        aborted
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().session.state()
    }

    pub fn progress(&self) -> f64 {
        self.state.lock().session.progress()
    }

    /// Samples in the current session's buffer
    pub fn sample_count(&self) -> usize {
        self.state.lock().session.sample_count()
    }

    /// Snapshot of the recordings set, in recording order
    pub fn recordings(&self) -> Vec<RecordedMotion> {
        self.state.lock().recordings.clone()
    }

    pub fn recording_count(&self) -> usize {
        self.state.lock().recordings.len()
    }

    /// Discard every finished recording; returns how many were dropped
    pub fn clear_recordings(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.recordings.len();
        state.recordings.clear();
        log::info!("Discarded {} recordings", count);
        count
    }

    fn spawn_ticker(&self, generation: u64, started_at: Instant) {
        let recorder = self.clone();
        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(started_at + TICK_INTERVAL, TICK_INTERVAL);
            loop {
                interval.tick().await;
                match recorder.tick(generation) {
                    Tick::Progress(_) => {}
                    Tick::Elapsed => {
                        recorder.finish_after_grace(generation).await;
                        break;
                    }
                    Tick::Inactive => break,
                }
            }
        });
    }

    fn tick(&self, generation: u64) -> Tick {
        let (tick, label, samples) = {
            let mut state = self.state.lock();
            // Why: a ticker outlives its session when stop or abort ends it
            // between ticks, and must not drive the next one
            if state.session.generation() != generation {
                return Tick::Inactive;
            }
            let tick = state.session.tick(Instant::now());
            (
                tick,
                state.session.label().to_string(),
                state.session.sample_count(),
            )
        };

        match tick {
            Tick::Progress(progress) => {
                self.emit(SessionEvent::Progress {
                    label,
                    progress,
                    samples,
                });
            }
            Tick::Elapsed => {
                self.emit(SessionEvent::Progress {
                    label: label.clone(),
                    progress: 1.0,
                    samples,
                });
                log::info!("Recording '{}' reached its duration", label);
                self.emit(SessionEvent::Stopping { label });
            }
            Tick::Inactive => {}
        }
        tick
    }

    async fn finish_after_grace(&self, generation: u64) {
        // Why: notifications received before the cutoff may still be queued
        // in the pump; the grace delay lets them reach the buffer
        tokio::time::sleep(self.grace).await;

        let (outcome, label) = {
            let mut state = self.state.lock();
            if state.session.generation() != generation
                || state.session.state() != SessionState::Finalizing
            {
                return;
            }
            let label = state.session.label().to_string();
            (Self::finalize_locked(&mut state), label)
        };
        self.report(&label, &outcome);
    }

    fn finalize_locked(state: &mut RecorderState) -> Result<RecordedMotion, SessionError> {
        let motion = state.session.finalize(Instant::now())?;
        state.recordings.push(motion.clone());
        Ok(motion)
    }

    fn report(&self, label: &str, outcome: &Result<RecordedMotion, SessionError>) {
        match outcome {
            Ok(motion) => {
                log::info!(
                    "Recording '{}' saved with {} samples",
                    motion.motion_name,
                    motion.data.len()
                );
                self.emit(SessionEvent::Recorded {
                    motion_name: motion.motion_name.clone(),
                    samples: motion.data.len(),
                    timestamp: motion.timestamp.clone(),
                });
            }
            Err(SessionError::NotRecording) => {}
            Err(e) => {
                log::warn!("Recording '{}' failed: {}", label, e);
                self.emit(SessionEvent::Failed {
                    label: label.to_string(),
                    error: e.clone(),
                });
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        (self.observer)(event);
    }
}

impl SampleSink for Recorder {
    fn offer(&self, sample: &TimedSample) -> bool {
        self.state.lock().session.accept(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{SensorSample, Vec3};
    use crossbeam_channel::{unbounded, Receiver};
    use tokio::time::sleep;

    const TARGET: Duration = Duration::from_secs(5);
    const GRACE: Duration = Duration::from_millis(250);

    fn recorder() -> (Recorder, Receiver<SessionEvent>) {
        let (sender, receiver) = unbounded();
        let recorder = Recorder::new(TARGET, GRACE, Handle::current(), move |event| {
            let _ = sender.send(event);
        });
        (recorder, receiver)
    }

    fn sample(temp: f64) -> TimedSample {
        TimedSample::new(
            SensorSample::new(Vec3::new(1.0, 2.0, 3.0), Vec3::default(), temp),
            Instant::now(),
        )
    }

    fn failures(events: &Receiver<SessionEvent>) -> Vec<SessionError> {
        events
            .try_iter()
            .filter_map(|e| match e {
                SessionEvent::Failed { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_failures_leave_idle() {
        let (recorder, _events) = recorder();
        assert_eq!(recorder.arm("", true), Err(SessionError::InvalidLabel));
        assert_eq!(recorder.arm("squat", false), Err(SessionError::NotCalibrated));
        assert_eq!(recorder.state(), SessionState::Idle);
        assert!(!recorder.offer(&sample(20.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_recording_counts_delivered_samples() {
        let (recorder, events) = recorder();
        recorder.arm("walk", true).unwrap();

        for i in 0..5 {
            sleep(Duration::from_millis(500)).await;
            assert!(recorder.offer(&sample(20.0 + i as f64)));
            sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(recorder.sample_count(), 5);

        // The ticker fired at 5 s; we are inside the grace window now
        sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.state(), SessionState::Finalizing);
        let late = sample(99.0);
        assert!(!recorder.offer(&late));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.state(), SessionState::Closed);

        let recordings = recorder.recordings();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].motion_name, "walk");
        assert_eq!(recordings[0].data.len(), 5);
        assert_eq!(recordings[0].data[4].temp, 24.0);

        let events: Vec<_> = events.try_iter().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Progress { progress, samples: 2, .. } if (progress - 0.4).abs() < 0.01
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Recorded { samples: 5, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_sample_is_admitted() {
        let (recorder, _events) = recorder();
        recorder.arm("walk", true).unwrap();

        sleep(Duration::from_millis(1500)).await;
        let in_flight = sample(21.0);
        sleep(Duration::from_millis(100)).await;

        assert!(recorder.stop());
        // Received before the stop, delivered after it
        assert!(recorder.offer(&in_flight));
        sleep(Duration::from_millis(10)).await;
        assert!(!recorder.offer(&sample(22.0)));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.recordings()[0].data.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_finalizes_once() {
        let (recorder, _events) = recorder();
        recorder.arm("squat", true).unwrap();
        recorder.offer(&sample(20.0));

        assert!(recorder.stop());
        assert!(!recorder.stop());

        // Let both the grace timer and the session ticker run out
        sleep(TARGET * 2).await;
        assert_eq!(recorder.recording_count(), 1);
        assert!(!recorder.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_finalize_without_samples() {
        let (recorder, events) = recorder();
        recorder.arm("previous", true).unwrap();
        recorder.offer(&sample(20.0));
        recorder.finalize_now().unwrap();

        recorder.arm("x", true).unwrap();
        assert_eq!(recorder.finalize_now(), Err(SessionError::EmptyRecording));
        assert_eq!(recorder.state(), SessionState::Idle);
        assert_eq!(recorder.recording_count(), 1);
        assert_eq!(failures(&events), vec![SessionError::EmptyRecording]);

        // The old ticker must not touch anything afterwards
        sleep(TARGET * 2).await;
        assert_eq!(recorder.recording_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_session_without_samples_is_empty() {
        let (recorder, events) = recorder();
        recorder.arm("idle", true).unwrap();

        sleep(TARGET + Duration::from_secs(1)).await;
        assert_eq!(recorder.state(), SessionState::Idle);
        assert_eq!(recorder.recording_count(), 0);
        assert_eq!(failures(&events), vec![SessionError::EmptyRecording]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_grace_keeps_recording() {
        let (recorder, events) = recorder();
        recorder.arm("walk", true).unwrap();
        recorder.offer(&sample(20.0));
        sleep(Duration::from_secs(1)).await;

        assert!(recorder.stop());
        sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.state(), SessionState::Finalizing);
        assert!(!recorder.abort());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.recording_count(), 1);
        assert!(!events
            .try_iter()
            .any(|e| matches!(e, SessionEvent::Aborted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_duration_does_not_overflow() {
        let (sender, _events) = unbounded();
        let recorder = Recorder::new(Duration::from_secs(u64::MAX), GRACE, Handle::current(), move |event| {
            let _ = sender.send(event);
        });
        recorder.arm("walk", true).unwrap();
        assert!(recorder.offer(&sample(20.0)));

        sleep(Duration::from_secs(3)).await;
        assert_eq!(recorder.state(), SessionState::Active);
        assert!(recorder.stop());
        sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.recording_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_keeps_previous_recordings() {
        let (recorder, events) = recorder();
        recorder.arm("first", true).unwrap();
        recorder.offer(&sample(20.0));
        recorder.finalize_now().unwrap();
        let before = recorder.recordings();

        recorder.arm("second", true).unwrap();
        recorder.offer(&sample(21.0));
        assert!(recorder.abort());
        assert!(!recorder.abort());

        assert_eq!(recorder.state(), SessionState::Idle);
        assert_eq!(recorder.recordings(), before);
        let events: Vec<_> = events.try_iter().collect();
        assert!(events.contains(&SessionEvent::Aborted {
            label: "second".to_string()
        }));

        sleep(TARGET * 2).await;
        assert_eq!(recorder.recordings(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ticker_does_not_end_next_session() {
        let (recorder, _events) = recorder();
        recorder.arm("first", true).unwrap();
        recorder.offer(&sample(20.0));
        sleep(Duration::from_millis(1200)).await;
        assert!(recorder.stop());
        sleep(Duration::from_millis(600)).await;
        assert_eq!(recorder.recording_count(), 1);

        // Second session starts at 1.8 s; the first ticker wakes at 2 s
        recorder.arm("second", true).unwrap();
        recorder.offer(&sample(21.0));
        sleep(Duration::from_secs(4)).await;
        assert_eq!(recorder.state(), SessionState::Active);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.recording_count(), 2);
        assert_eq!(recorder.recordings()[1].motion_name, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_recordings() {
        let (recorder, _events) = recorder();
        recorder.arm("walk", true).unwrap();
        recorder.offer(&sample(20.0));
        recorder.finalize_now().unwrap();

        assert_eq!(recorder.clear_recordings(), 1);
        assert_eq!(recorder.recording_count(), 0);
    }
}
