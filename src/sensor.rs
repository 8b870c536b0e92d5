//! # Sensor Types Module
//!
//! Value types produced by the inertial peripheral and the update messages
//! sent from the connection thread to the console.
//!
//! ## Key Types
//! - `SensorSample`: one decoded telemetry frame (accelerometer, gyroscope, temperature)
//! - `TimedSample`: a sample plus the instant its notification was received
//! - `SensorUpdate`: messages from the connection thread to the front-end

use crate::link::{ConnectionState, DisconnectCause};
use crate::recorder::SessionEvent;
use crate::session::SessionState;
use crate::transport::PeripheralHandle;
use std::path::PathBuf;
use tokio::time::Instant;

/// Three-axis reading
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One decoded telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorSample {
    pub accel: Vec3,
    pub gyro: Vec3,
    pub temp: f64,
}

impl SensorSample {
    pub fn new(accel: Vec3, gyro: Vec3, temp: f64) -> Self {
        Self { accel, gyro, temp }
    }
}

/// A sample tagged with the instant the transport handed us its notification.
///
/// The receive instant, not the delivery instant, decides whether a sample
/// belongs to a recording window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedSample {
    pub sample: SensorSample,
    pub received_at: Instant,
}

impl TimedSample {
    pub fn new(sample: SensorSample, received_at: Instant) -> Self {
        Self { sample, received_at }
    }
}

/// Snapshot answered to a status request
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub connection: ConnectionState,
    pub peripheral: Option<PeripheralHandle>,
    pub calibrated: bool,
    pub latest: Option<SensorSample>,
    pub samples_received: u64,
    /// Samples the recorder kept, across all sessions
    pub samples_recorded: u64,
    pub decode_errors: u64,
    pub session: SessionState,
    pub progress: f64,
    pub session_samples: usize,
    pub recordings: usize,
}

// Messages from the connection thread to the front-end
#[derive(Debug)]
pub enum SensorUpdate {
    ConnectionState(ConnectionState),
    Connected(PeripheralHandle),
    Disconnected(DisconnectCause),
    /// Several devices matched the selector; the front-end must answer with a
    /// choice (or a cancellation) through its chooser reply channel.
    ChooseDevice(Vec<PeripheralHandle>),
    Calibrated,
    CommandSent(String),
    Session(SessionEvent),
    Exported { path: PathBuf, motions: usize, rows: usize },
    RecordingsCleared(usize),
    Status(StatusReport),
    Error(String),
}
