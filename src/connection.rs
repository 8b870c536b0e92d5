//! # Connection Management Module
//!
//! Runs the device side of the client on a dedicated thread with its own
//! Tokio runtime: the link manager, the sample stream and the recorder live
//! there, and the console drives them through `ConnectionCommand`s.
//!
//! ## Key Components
//! - `ConnectionManager`: owns the command loop
//! - `ConnectionCommand`: commands sent from the console to the connection thread
//!
//! Results and state changes flow back as [`SensorUpdate`]s over a
//! crossbeam channel, so the console never blocks on the radio.

use crate::codec::Command;
use crate::config::Config;
use crate::error::{LinkError, SessionError};
use crate::export;
use crate::link::{DisconnectCause, LinkEvent, LinkManager};
use crate::recorder::Recorder;
use crate::sensor::{SensorUpdate, StatusReport};
use crate::session::SessionState;
use crate::stream::SampleStream;
use crate::transport::RadioTransport;
use chrono::Utc;
use crossbeam_channel::Sender;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionCommand {
    Connect,
    Disconnect,
    Calibrate,
    Send(Command),
    StartRecording(String),
    StopRecording,
    Export,
    ClearRecordings,
    Status,
}

/// Manages the device lifecycle for one peripheral at a time.
///
/// Commands are processed in order; a connection attempt in progress only
/// yields to `Disconnect`, which cancels it.
pub struct ConnectionManager<T: RadioTransport + 'static> {
    transport: T,
    config: Config,
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    updates: Sender<SensorUpdate>,
}

/// Everything the command loop touches, built inside the runtime
struct Device<T: RadioTransport + 'static> {
    link: LinkManager<T>,
    stream: Arc<SampleStream>,
    recorder: Recorder,
    config: Config,
    updates: Sender<SensorUpdate>,
}

impl<T: RadioTransport + 'static> ConnectionManager<T> {
    /// Creates a new ConnectionManager.
    ///
    /// Returns the manager and a sender for issuing commands from the console.
    pub fn new(
        transport: T,
        config: Config,
        updates: Sender<SensorUpdate>,
    ) -> (Self, mpsc::UnboundedSender<ConnectionCommand>) {
        let (command_sender, commands) = mpsc::unbounded_channel();

        let manager = ConnectionManager {
            transport,
            config,
            commands,
            updates,
        };

        (manager, command_sender)
    }

    /// Runs the command loop on a fresh runtime.
    ///
    /// This should be called in a spawned thread. It blocks until the command
    /// channel is closed.
    pub fn run(self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Connection manager: failed to create runtime: {}", e);
                let _ = self
                    .updates
                    .send(SensorUpdate::Error(format!("Failed to start Bluetooth runtime: {}", e)));
                return;
            }
        };

        rt.block_on(self.serve());
    }

    /// The command loop itself; must be polled inside a Tokio runtime
    pub async fn serve(self) {
        let ConnectionManager {
            transport,
            config,
            mut commands,
            updates,
        } = self;

        let session_updates = updates.clone();
        let recorder = Recorder::new(
            config.recording_duration(),
            config.grace_period(),
            Handle::current(),
            move |event| {
                let _ = session_updates.send(SensorUpdate::Session(event));
            },
        );
        let stream = Arc::new(SampleStream::new(Arc::new(recorder.clone())));

        let (mut link, mut notices) = LinkManager::new(transport, &config);
        let link_updates = updates.clone();
        link.on_event(move |event| {
            let update = match event {
                LinkEvent::StateChanged(state) => SensorUpdate::ConnectionState(*state),
                LinkEvent::Disconnected(cause) => SensorUpdate::Disconnected(*cause),
            };
            let _ = link_updates.send(update);
        });

        let mut device = Device {
            link,
            stream,
            recorder,
            config,
            updates,
        };

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ConnectionCommand::Connect) => {
                        if !device.connect(&mut commands).await {
                            break;
                        }
                    }
                    Some(command) => device.handle(command).await,
                    None => break,
                },
                Some(notice) = notices.recv() => {
                    if device.link.handle_notice(notice).await == Some(DisconnectCause::Unexpected) {
                        device.drop_session();
                    }
                }
            }
        }

        log::info!("Connection manager: Command channel closed, shutting down");
        if device.recorder.state() == SessionState::Finalizing {
            let _ = device.recorder.finalize_now();
        }
        device.link.disconnect().await;
    }
}

impl<T: RadioTransport + 'static> Device<T> {
    /// Run one connection attempt while still answering commands.
    ///
    /// Returns false if the command channel closed meanwhile.
    async fn connect(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> bool {
        log::info!("Connection manager: Connecting");
        let mut open = true;

        let outcome = {
            let attempt = self.link.discover_and_connect();
            tokio::pin!(attempt);

            loop {
                tokio::select! {
                    result = &mut attempt => break Some(result),
                    command = commands.recv() => match command {
                        Some(ConnectionCommand::Disconnect) => break None,
                        Some(_) => {
                            let _ = self.updates.send(SensorUpdate::Error(LinkError::Busy.to_string()));
                        }
                        None => {
                            open = false;
                            break None;
                        }
                    },
                }
            }
        };

        match outcome {
            Some(Ok(peer)) => {
                let Some(channel) = self.link.channel() else {
                    return open;
                };
                let stream = self.stream.clone();
                let subscribed = self
                    .link
                    .subscribe(
                        &channel,
                        move |sample| stream.publish(sample),
                        |e| log::warn!("Dropping frame: {}", e),
                    )
                    .await;

                match subscribed {
                    Ok(()) => {
                        let _ = self.updates.send(SensorUpdate::Connected(peer));
                    }
                    Err(e) => {
                        log::error!("Connection manager: subscribe failed: {}", e);
                        self.send_error(e);
                        self.link.disconnect().await;
                    }
                }
            }
            Some(Err(e)) => self.send_error(e),
            None => self.link.cancel_connect().await,
        }
        open
    }

    async fn handle(&mut self, command: ConnectionCommand) {
        match command {
            // Handled by the caller since it needs the command channel
            ConnectionCommand::Connect => {}
            ConnectionCommand::Disconnect => {
                log::info!("Connection manager: Disconnect requested");
                self.link.disconnect().await;
                self.drop_session();
            }
            ConnectionCommand::Calibrate => match self.link.calibrate().await {
                Ok(()) => {
                    let _ = self.updates.send(SensorUpdate::Calibrated);
                }
                Err(e) => self.send_error(e),
            },
            ConnectionCommand::Send(command) => match self.link.send(&command).await {
                Ok(()) => {
                    let _ = self
                        .updates
                        .send(SensorUpdate::CommandSent(command.as_text().to_string()));
                }
                Err(e) => self.send_error(e),
            },
            ConnectionCommand::StartRecording(label) => {
                if let Err(e) = self.recorder.arm(&label, self.link.is_calibrated()) {
                    self.send_error(e);
                }
            }
            ConnectionCommand::StopRecording => {
                if !self.recorder.stop() {
                    self.send_error(SessionError::NotRecording);
                }
            }
            ConnectionCommand::Export => {
                let recordings = self.recorder.recordings();
                match export::write_export(&self.config.export_dir, &recordings, Utc::now()) {
                    Ok(path) => {
                        let rows = recordings.iter().map(|m| m.data.len()).sum();
                        let _ = self.updates.send(SensorUpdate::Exported {
                            path,
                            motions: recordings.len(),
                            rows,
                        });
                    }
                    Err(e) => {
                        log::error!("Connection manager: export failed: {}", e);
                        self.send_error(e);
                    }
                }
            }
            ConnectionCommand::ClearRecordings => {
                let cleared = self.recorder.clear_recordings();
                let _ = self.updates.send(SensorUpdate::RecordingsCleared(cleared));
            }
            ConnectionCommand::Status => {
                let _ = self.updates.send(SensorUpdate::Status(self.status()));
            }
        }
    }

    /// The link is gone: the live value is stale and an open session is void.
    ///
    /// A session already stopped keeps what it captured.
    fn drop_session(&mut self) {
        self.stream.clear();
        if self.recorder.state() == SessionState::Finalizing {
            let _ = self.recorder.finalize_now();
        } else {
            self.recorder.abort();
        }
    }

    fn status(&self) -> StatusReport {
        StatusReport {
            connection: self.link.state(),
            peripheral: self.link.peripheral().cloned(),
            calibrated: self.link.is_calibrated(),
            latest: self.stream.latest(),
            samples_received: self.stream.published(),
            samples_recorded: self.stream.retained(),
            decode_errors: self.link.decode_errors(),
            session: self.recorder.state(),
            progress: self.recorder.progress(),
            session_samples: self.recorder.sample_count(),
            recordings: self.recorder.recording_count(),
        }
    }

    fn send_error(&self, error: impl std::fmt::Display) {
        let _ = self.updates.send(SensorUpdate::Error(error.to_string()));
    }
}
