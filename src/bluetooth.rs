//! # Bluetooth Transport Module
//!
//! [`RadioTransport`] on top of btleplug. Discovery scans for a fixed window,
//! keeps the peripherals the selector accepts and lets a [`DeviceChooser`]
//! pick one. Notifications and adapter disconnect events are forwarded into
//! the channel returned by `subscribe`.

use crate::config::DeviceSelector;
use crate::error::LinkError;
use crate::transport::{ChannelHandle, DeviceChooser, PeripheralHandle, RadioTransport, TransportEvent};
use async_trait::async_trait;
use btleplug::api::{
    CentralEvent, CharPropFlags, Characteristic, Central, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub struct BleTransport {
    scan_window: Duration,
    chooser: Arc<dyn DeviceChooser>,
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    characteristic: Option<Characteristic>,
    forwarders: Vec<JoinHandle<()>>,
}

impl BleTransport {
    pub fn new(scan_window: Duration, chooser: Arc<dyn DeviceChooser>) -> Self {
        Self {
            scan_window,
            chooser,
            adapter: None,
            peripheral: None,
            characteristic: None,
            forwarders: Vec::new(),
        }
    }

    /// First adapter of the platform manager, created on first use
    async fn adapter(&mut self) -> Result<Adapter, LinkError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let manager = Manager::new().await.map_err(transport_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|_| LinkError::NoAdapter)?
            .into_iter()
            .next()
            .ok_or(LinkError::NoAdapter)?;

        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    /// Scan for `scan_window` and keep the peripherals `selector` accepts
    async fn scan(
        &mut self,
        selector: &DeviceSelector,
    ) -> Result<Vec<(Peripheral, PeripheralHandle)>, LinkError> {
        let central = self.adapter().await?;

        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(transport_error)?;
        tokio::time::sleep(self.scan_window).await;
        central.stop_scan().await.map_err(transport_error)?;

        let peripherals = central.peripherals().await.map_err(transport_error)?;

        let mut matches = Vec::new();
        for peripheral in peripherals {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let services: Vec<String> = props.services.iter().map(|u| u.to_string()).collect();
            if !selector.matches(props.local_name.as_deref(), &services) {
                continue;
            }

            let handle = PeripheralHandle::new(
                peripheral.address().to_string(),
                props.local_name.unwrap_or_else(|| "Unknown".to_string()),
            );
            log::debug!("Found matching device {} ({})", handle.name, handle.id);
            matches.push((peripheral, handle));
        }

        Ok(matches)
    }

    fn stop_forwarders(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
    }

    fn connected(&self) -> Result<(&Peripheral, &Characteristic), LinkError> {
        match (&self.peripheral, &self.characteristic) {
            (Some(peripheral), Some(characteristic)) => Ok((peripheral, characteristic)),
            _ => Err(LinkError::LinkClosed),
        }
    }
}

#[async_trait]
impl RadioTransport for BleTransport {
    async fn request_device(
        &mut self,
        selector: &DeviceSelector,
    ) -> Result<PeripheralHandle, LinkError> {
        let mut candidates = self.scan(selector).await?;
        if candidates.is_empty() {
            return Err(LinkError::NotFound);
        }

        let handles: Vec<PeripheralHandle> = candidates.iter().map(|(_, h)| h.clone()).collect();
        let index = self
            .chooser
            .choose(&handles)
            .await
            .filter(|&i| i < candidates.len())
            .ok_or(LinkError::UserCancelled)?;
        let (peripheral, handle) = candidates.swap_remove(index);

        log::info!("Connecting to {} ({})", handle.name, handle.id);
        peripheral.connect().await.map_err(transport_error)?;
        self.peripheral = Some(peripheral);
        Ok(handle)
    }

    async fn resolve_channel(
        &mut self,
        _peer: &PeripheralHandle,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<ChannelHandle, LinkError> {
        let peripheral = self.peripheral.as_ref().ok_or(LinkError::LinkClosed)?;
        peripheral.discover_services().await.map_err(transport_error)?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                uuid_eq(&c.service_uuid.to_string(), service_uuid)
                    && uuid_eq(&c.uuid.to_string(), characteristic_uuid)
            })
            .ok_or(LinkError::NotFound)?;

        let channel = ChannelHandle::new(
            peripheral.address().to_string(),
            service_uuid,
            characteristic_uuid,
        );
        self.characteristic = Some(characteristic);
        Ok(channel)
    }

    async fn subscribe(
        &mut self,
        _channel: &ChannelHandle,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, LinkError> {
        let (peripheral, characteristic) = self.connected()?;
        let (peripheral, characteristic) = (peripheral.clone(), characteristic.clone());
        let central = self.adapter().await?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(transport_error)?;
        let mut notifications = peripheral.notifications().await.map_err(transport_error)?;
        let mut events = central.events().await.map_err(transport_error)?;

        self.stop_forwarders();
        let (sender, receiver) = mpsc::unbounded_channel();

        let values = sender.clone();
        let uuid = characteristic.uuid;
        self.forwarders.push(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                let event = TransportEvent::Notification {
                    value: notification.value,
                    received_at: Instant::now(),
                };
                if values.send(event).is_err() {
                    break;
                }
            }
        }));

        let id = peripheral.id();
        self.forwarders.push(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(lost) = event {
                    if lost == id {
                        log::debug!("Adapter reported disconnect of {:?}", lost);
                        let _ = sender.send(TransportEvent::Disconnected);
                        break;
                    }
                }
            }
        }));

        Ok(receiver)
    }

    async fn write(&mut self, _channel: &ChannelHandle, value: &[u8]) -> Result<(), LinkError> {
        let (peripheral, characteristic) = self.connected()?;
        peripheral
            .write(characteristic, value, write_type(characteristic.properties))
            .await
            .map_err(transport_error)
    }

    async fn disconnect(&mut self, _peer: &PeripheralHandle) -> Result<(), LinkError> {
        self.stop_forwarders();
        self.characteristic = None;
        match self.peripheral.take() {
            Some(peripheral) => peripheral.disconnect().await.map_err(transport_error),
            None => Ok(()),
        }
    }
}

fn transport_error(e: btleplug::Error) -> LinkError {
    LinkError::Transport(e.to_string())
}

fn uuid_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Acknowledged writes when the characteristic supports them
fn write_type(properties: CharPropFlags) -> WriteType {
    if properties.contains(CharPropFlags::WRITE) {
        WriteType::WithResponse
    } else {
        WriteType::WithoutResponse
    }
}
