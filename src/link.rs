//! # Link Manager Module
//!
//! Owns the discovery → connect → service/characteristic resolution →
//! subscribe lifecycle for a single peripheral.
//!
//! ## State Machine
//! ```text
//! Disconnected ──discover_and_connect──▶ Scanning ──resolved──▶ Connected
//!      ▲                                    │                        │
//!      └────────── failure / cancel ────────┘                        │
//!      └──────────── disconnect() or peer dropped the link ──────────┘
//! ```
//! There is no reconnecting state: reconnection is a fresh discovery cycle.
//!
//! ## Notifications
//! `subscribe` spawns a pump task that decodes every notification through the
//! wire codec. Decode failures are counted and handed to the error callback,
//! never fatal. When the peer drops the link the pump posts a `LinkNotice` to
//! the owner, who calls `handle_notice` to run the transition.

use crate::codec::{self, Command, ParseError};
use crate::config::{Config, DeviceSelector};
use crate::error::LinkError;
use crate::sensor::TimedSample;
use crate::transport::{ChannelHandle, PeripheralHandle, RadioTransport, TransportEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connected,
}

/// Who ended a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    Requested,
    Unexpected,
}

/// Events delivered to registered observers
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    Disconnected(DisconnectCause),
}

/// Posted by the notification pump for the owner of the link manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkNotice {
    PeerLost { epoch: u64 },
}

type Observer = Box<dyn Fn(&LinkEvent) + Send>;

pub struct LinkManager<T: RadioTransport> {
    transport: T,
    selector: DeviceSelector,
    service_uuid: String,
    characteristic_uuid: String,
    state: ConnectionState,
    peer: Option<PeripheralHandle>,
    channel: Option<ChannelHandle>,
    /// Peer connected by an in-flight discovery that has not resolved yet
    pending: Option<PeripheralHandle>,
    calibrated: bool,
    epoch: u64,
    decode_errors: Arc<AtomicU64>,
    pump: Option<JoinHandle<()>>,
    notices: mpsc::UnboundedSender<LinkNotice>,
    observers: Vec<Observer>,
}

impl<T: RadioTransport> LinkManager<T> {
    /// Creates a link manager in `Disconnected`.
    ///
    /// Returns the manager and the receiver its notification pumps post to.
    pub fn new(transport: T, config: &Config) -> (Self, mpsc::UnboundedReceiver<LinkNotice>) {
        let (notices, notice_receiver) = mpsc::unbounded_channel();

        let manager = LinkManager {
            transport,
            selector: config.selector.clone(),
            service_uuid: config.service_uuid.clone(),
            characteristic_uuid: config.characteristic_uuid.clone(),
            state: ConnectionState::Disconnected,
            peer: None,
            channel: None,
            pending: None,
            calibrated: false,
            epoch: 0,
            decode_errors: Arc::new(AtomicU64::new(0)),
            pump: None,
            notices,
            observers: Vec::new(),
        };

        (manager, notice_receiver)
    }

    pub fn on_event(&mut self, observer: impl Fn(&LinkEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.peer.as_ref()
    }

    pub fn channel(&self) -> Option<ChannelHandle> {
        self.channel.clone()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Frames dropped by the decoder since the manager was created
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Discover, connect and resolve the telemetry channel.
    ///
    /// Any failure leaves the manager in `Disconnected`; a peer that connected
    /// but lacks the channel is disconnected again and reported as
    /// `IncompatibleDevice`.
    pub async fn discover_and_connect(&mut self) -> Result<PeripheralHandle, LinkError> {
        if self.state != ConnectionState::Disconnected {
            return Err(LinkError::Busy);
        }

        self.set_state(ConnectionState::Scanning);
        log::info!("Link manager: discovering device ({:?})", self.selector);

        match self.establish().await {
            Ok((peer, channel)) => {
                self.epoch += 1;
                log::info!(
                    "Link manager: connected to {} ({}), epoch {}",
                    peer.name,
                    peer.id,
                    self.epoch
                );
                self.pending = None;
                self.channel = Some(channel.with_epoch(self.epoch));
                self.peer = Some(peer.clone());
                self.calibrated = false;
                self.set_state(ConnectionState::Connected);
                Ok(peer)
            }
            Err(e) => {
                log::error!("Link manager: connection failed: {}", e);
                self.pending = None;
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<(PeripheralHandle, ChannelHandle), LinkError> {
        let peer = self.transport.request_device(&self.selector).await?;
        self.pending = Some(peer.clone());

        let resolved = self
            .transport
            .resolve_channel(&peer, &self.service_uuid, &self.characteristic_uuid)
            .await;

        match resolved {
            Ok(channel) => Ok((peer, channel)),
            Err(e) => {
                log::warn!(
                    "Link manager: {} has no {}/{}: {}",
                    peer.name,
                    self.service_uuid,
                    self.characteristic_uuid,
                    e
                );
                if let Err(e) = self.transport.disconnect(&peer).await {
                    log::debug!("Link manager: disconnect after failed resolution: {}", e);
                }
                Err(LinkError::IncompatibleDevice)
            }
        }
    }

    /// Clean up after a `discover_and_connect` future was dropped mid-flight
    pub async fn cancel_connect(&mut self) {
        if self.state != ConnectionState::Scanning {
            return;
        }
        log::info!("Link manager: connection attempt cancelled");
        if let Some(peer) = self.pending.take() {
            if let Err(e) = self.transport.disconnect(&peer).await {
                log::debug!("Link manager: disconnect of pending peer: {}", e);
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Register notification callbacks on `channel`.
    ///
    /// Every notification is decoded before it is forwarded. Empty frames are
    /// skipped silently; malformed ones go to `on_decode_error`.
    pub async fn subscribe<F, E>(
        &mut self,
        channel: &ChannelHandle,
        on_sample: F,
        on_decode_error: E,
    ) -> Result<(), LinkError>
    where
        F: Fn(TimedSample) + Send + 'static,
        E: Fn(ParseError) + Send + 'static,
    {
        self.check_channel(channel)?;
        let mut events = self.transport.subscribe(channel).await?;

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let epoch = self.epoch;
        let notices = self.notices.clone();
        let decode_errors = self.decode_errors.clone();

        self.pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Notification { value, received_at } => {
                        match codec::decode(&value) {
                            Ok(Some(sample)) => on_sample(TimedSample::new(sample, received_at)),
                            Ok(None) => {}
                            Err(e) => {
                                decode_errors.fetch_add(1, Ordering::Relaxed);
                                on_decode_error(e);
                            }
                        }
                    }
                    TransportEvent::Disconnected => break,
                }
            }
            // Either the peer dropped or the transport closed the stream
            let _ = notices.send(LinkNotice::PeerLost { epoch });
        }));

        log::debug!("Link manager: subscribed to {}", channel.characteristic_uuid);
        Ok(())
    }

    pub async fn write(&mut self, channel: &ChannelHandle, value: &[u8]) -> Result<(), LinkError> {
        self.check_channel(channel)?;
        self.transport.write(channel, value).await
    }

    /// Encode and write a command on the current channel
    pub async fn send(&mut self, command: &Command) -> Result<(), LinkError> {
        let channel = self.channel.clone().ok_or(LinkError::LinkClosed)?;
        self.write(&channel, &codec::encode_command(command)).await?;
        log::debug!("Link manager: sent {:?}", command.as_text());
        Ok(())
    }

    /// Write the calibration trigger and mark this connection calibrated
    pub async fn calibrate(&mut self) -> Result<(), LinkError> {
        self.send(&Command::Calibrate).await?;
        self.calibrated = true;
        log::info!("Link manager: calibration command sent");
        Ok(())
    }

    /// Caller-initiated teardown. No-op when already disconnected.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if self.state == ConnectionState::Scanning {
            self.cancel_connect().await;
            return;
        }

        log::info!("Link manager: disconnect requested");
        if let Some(peer) = self.teardown() {
            if let Err(e) = self.transport.disconnect(&peer).await {
                log::warn!("Link manager: transport disconnect failed: {}", e);
            }
        }
        self.set_state(ConnectionState::Disconnected);
        self.emit(LinkEvent::Disconnected(DisconnectCause::Requested));
    }

    /// Run the transition for a notice posted by the pump.
    ///
    /// Returns the disconnect cause when the notice ended the current
    /// connection; notices from earlier connections are ignored. The
    /// transport is told to release the lost peer as well.
    pub async fn handle_notice(&mut self, notice: LinkNotice) -> Option<DisconnectCause> {
        match notice {
            LinkNotice::PeerLost { epoch } => {
                // Why: a pump from an earlier connection can post after a
                // disconnect and reconnect; only the current epoch counts
                if epoch != self.epoch || self.state != ConnectionState::Connected {
                    log::debug!("Link manager: ignoring stale notice for epoch {}", epoch);
                    return None;
                }
                log::warn!("Link manager: device disconnected unexpectedly");
                if let Some(peer) = self.teardown() {
                    if let Err(e) = self.transport.disconnect(&peer).await {
                        log::debug!("Link manager: releasing lost peer: {}", e);
                    }
                }
                self.set_state(ConnectionState::Disconnected);
                self.emit(LinkEvent::Disconnected(DisconnectCause::Unexpected));
                Some(DisconnectCause::Unexpected)
            }
        }
    }

    fn teardown(&mut self) -> Option<PeripheralHandle> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.channel = None;
        self.calibrated = false;
        self.peer.take()
    }

    fn check_channel(&self, channel: &ChannelHandle) -> Result<(), LinkError> {
        match &self.channel {
            Some(current) if self.state == ConnectionState::Connected && current == channel => Ok(()),
            _ => Err(LinkError::LinkClosed),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.emit(LinkEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: LinkEvent) {
        for observer in &self.observers {
            observer(&event);
        }
    }
}
