//! # Radio Transport Module
//!
//! The capability set the link manager needs from a Bluetooth stack:
//! discovery by filter, connect, service/characteristic resolution, writes,
//! value-change notifications and disconnect events.
//!
//! `RadioTransport` is the seam: [`crate::bluetooth::BleTransport`] implements it
//! on top of btleplug, and tests script it with an in-memory transport.

use crate::config::DeviceSelector;
use crate::error::LinkError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// The currently bonded radio peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    pub id: String,
    pub name: String,
}

impl PeripheralHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A resolved service + characteristic endpoint.
///
/// Carries the connection epoch it was resolved in; the link manager rejects
/// handles from an earlier connection with `LinkClosed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub peripheral_id: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub(crate) epoch: u64,
}

impl ChannelHandle {
    pub fn new(
        peripheral_id: impl Into<String>,
        service_uuid: impl Into<String>,
        characteristic_uuid: impl Into<String>,
    ) -> Self {
        Self {
            peripheral_id: peripheral_id.into(),
            service_uuid: service_uuid.into(),
            characteristic_uuid: characteristic_uuid.into(),
            epoch: 0,
        }
    }

    pub(crate) fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }
}

/// Raw events pushed by a subscribed transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Notification { value: Vec<u8>, received_at: Instant },
    /// The peer dropped the link on its own
    Disconnected,
}

#[async_trait]
pub trait RadioTransport: Send {
    /// Discover a device matching `selector` and connect to it
    async fn request_device(
        &mut self,
        selector: &DeviceSelector,
    ) -> Result<PeripheralHandle, LinkError>;

    async fn resolve_channel(
        &mut self,
        peer: &PeripheralHandle,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<ChannelHandle, LinkError>;

    /// Enable notifications on `channel`.
    ///
    /// The returned receiver yields every notification and, at most once, a
    /// `Disconnected` event when the peer goes away.
    async fn subscribe(
        &mut self,
        channel: &ChannelHandle,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, LinkError>;

    async fn write(&mut self, channel: &ChannelHandle, value: &[u8]) -> Result<(), LinkError>;

    async fn disconnect(&mut self, peer: &PeripheralHandle) -> Result<(), LinkError>;
}

/// Picks one of several discovered devices, or declines
#[async_trait]
pub trait DeviceChooser: Send + Sync {
    async fn choose(&self, candidates: &[PeripheralHandle]) -> Option<usize>;
}

/// Always takes the first matching device
pub struct FirstMatch;

#[async_trait]
impl DeviceChooser for FirstMatch {
    async fn choose(&self, candidates: &[PeripheralHandle]) -> Option<usize> {
        if candidates.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory transport for tests

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct MockState {
        devices: Vec<(PeripheralHandle, Vec<String>)>,
        discovery_error: Option<LinkError>,
        incompatible: bool,
        connected: Option<PeripheralHandle>,
        sender: Option<mpsc::UnboundedSender<TransportEvent>>,
        writes: Vec<Vec<u8>>,
        disconnects: usize,
    }

    /// Cloning shares the scripted device, so a test can keep a handle to
    /// push notifications while the link manager owns the transport.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub(crate) fn with_device(name: &str, services: &[&str]) -> Self {
            let transport = Self::default();
            transport.state.lock().devices.push((
                PeripheralHandle::new("AA:BB:CC:00:00:01", name),
                services.iter().map(|s| s.to_string()).collect(),
            ));
            transport
        }

        pub(crate) fn fail_discovery(&self, error: LinkError) {
            self.state.lock().discovery_error = Some(error);
        }

        pub(crate) fn make_incompatible(&self) {
            self.state.lock().incompatible = true;
        }

        /// Push a notification; false if nobody is subscribed
        pub(crate) fn notify(&self, frame: &str) -> bool {
            self.notify_at(frame, Instant::now())
        }

        pub(crate) fn notify_at(&self, frame: &str, received_at: Instant) -> bool {
            match &self.state.lock().sender {
                Some(sender) => sender
                    .send(TransportEvent::Notification {
                        value: frame.as_bytes().to_vec(),
                        received_at,
                    })
                    .is_ok(),
                None => false,
            }
        }

        /// Simulate the peer dropping the link
        pub(crate) fn drop_link(&self) {
            let mut state = self.state.lock();
            state.connected = None;
            if let Some(sender) = state.sender.take() {
                let _ = sender.send(TransportEvent::Disconnected);
            }
        }

        pub(crate) fn writes(&self) -> Vec<String> {
            self.state
                .lock()
                .writes
                .iter()
                .map(|w| String::from_utf8_lossy(w).into_owned())
                .collect()
        }

        pub(crate) fn disconnects(&self) -> usize {
            self.state.lock().disconnects
        }

        pub(crate) fn is_connected(&self) -> bool {
            self.state.lock().connected.is_some()
        }
    }

    #[async_trait]
    impl RadioTransport for MockTransport {
        async fn request_device(
            &mut self,
            selector: &DeviceSelector,
        ) -> Result<PeripheralHandle, LinkError> {
            let mut state = self.state.lock();
            if let Some(error) = state.discovery_error.clone() {
                return Err(error);
            }
            let found = state
                .devices
                .iter()
                .find(|(peer, services)| selector.matches(Some(&peer.name), services))
                .map(|(peer, _)| peer.clone())
                .ok_or(LinkError::NotFound)?;
            state.connected = Some(found.clone());
            Ok(found)
        }

        async fn resolve_channel(
            &mut self,
            peer: &PeripheralHandle,
            service_uuid: &str,
            characteristic_uuid: &str,
        ) -> Result<ChannelHandle, LinkError> {
            if self.state.lock().incompatible {
                return Err(LinkError::NotFound);
            }
            Ok(ChannelHandle::new(
                peer.id.clone(),
                service_uuid,
                characteristic_uuid,
            ))
        }

        async fn subscribe(
            &mut self,
            _channel: &ChannelHandle,
        ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, LinkError> {
            let mut state = self.state.lock();
            if state.connected.is_none() {
                return Err(LinkError::LinkClosed);
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            state.sender = Some(sender);
            Ok(receiver)
        }

        async fn write(&mut self, _channel: &ChannelHandle, value: &[u8]) -> Result<(), LinkError> {
            let mut state = self.state.lock();
            if state.connected.is_none() {
                return Err(LinkError::LinkClosed);
            }
            state.writes.push(value.to_vec());
            Ok(())
        }

        async fn disconnect(&mut self, _peer: &PeripheralHandle) -> Result<(), LinkError> {
            let mut state = self.state.lock();
            state.disconnects += 1;
            state.connected = None;
            state.sender = None;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_match_chooser() {
        let chooser = FirstMatch;
        assert_eq!(chooser.choose(&[]).await, None);

        let candidates = vec![
            PeripheralHandle::new("1", "IMU-A"),
            PeripheralHandle::new("2", "IMU-B"),
        ];
        assert_eq!(chooser.choose(&candidates).await, Some(0));
    }

    #[test]
    fn test_channel_epoch_distinguishes_handles() {
        let first = ChannelHandle::new("dev", "svc", "chr").with_epoch(1);
        let second = ChannelHandle::new("dev", "svc", "chr").with_epoch(2);
        assert_ne!(first, second);
    }
}
