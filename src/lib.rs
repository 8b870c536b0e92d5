//! Client for a BLE inertial measurement peripheral: discovers and connects to
//! the sensor, decodes its telemetry stream, records labeled fixed-duration
//! motions and exports them as CSV.

pub mod app;
pub mod bluetooth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod link;
pub mod recorder;
pub mod sensor;
pub mod session;
pub mod stream;
pub mod transport;
