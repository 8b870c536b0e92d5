//! # Console Module
//!
//! Line-oriented operator front-end. Reads commands from stdin, forwards them
//! to the connection thread and prints every `SensorUpdate` it gets back.
//!
//! Device selection: when discovery finds candidates and automatic selection
//! is off, [`PromptChooser`] posts a `ChooseDevice` update and waits until the
//! operator answers with a number or `cancel`.

use crate::codec::Command;
use crate::connection::ConnectionCommand;
use crate::error::SessionError;
use crate::link::{ConnectionState, DisconnectCause};
use crate::recorder::SessionEvent;
use crate::sensor::{SensorSample, SensorUpdate, StatusReport};
use crate::transport::{DeviceChooser, PeripheralHandle};
use async_trait::async_trait;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::io::BufRead;
use tokio::sync::{mpsc, Mutex};

pub const HELP: &str = "\
Commands:
  connect            scan for the sensor and connect
  disconnect         drop the connection (or cancel a scan)
  calibrate          send the calibration trigger
  send [text]        write text to the sensor (default: test message)
  record <motion>    record a labeled motion
  stop               end the current recording early
  status             show connection and recording state
  export             write all recordings to CSV
  clear              discard all recordings
  help               show this help
  quit               exit";

/// One parsed line of operator input
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(ConnectionCommand),
    /// Answer to a device prompt; `None` declines
    Choice(Option<usize>),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    if let Ok(number) = word.parse::<usize>() {
        return Input::Choice(number.checked_sub(1));
    }

    match word.to_ascii_lowercase().as_str() {
        "" => Input::Empty,
        "connect" => Input::Command(ConnectionCommand::Connect),
        "disconnect" => Input::Command(ConnectionCommand::Disconnect),
        "calibrate" => Input::Command(ConnectionCommand::Calibrate),
        "send" if rest.is_empty() => Input::Command(ConnectionCommand::Send(Command::TestMessage)),
        "send" => Input::Command(ConnectionCommand::Send(Command::Text(rest.to_string()))),
        "record" => Input::Command(ConnectionCommand::StartRecording(rest.to_string())),
        "stop" => Input::Command(ConnectionCommand::StopRecording),
        "status" => Input::Command(ConnectionCommand::Status),
        "export" => Input::Command(ConnectionCommand::Export),
        "clear" => Input::Command(ConnectionCommand::ClearRecordings),
        "cancel" => Input::Choice(None),
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(word.to_string()),
    }
}

/// Asks the operator to pick a device through the console
pub struct PromptChooser {
    updates: Sender<SensorUpdate>,
    replies: Mutex<mpsc::UnboundedReceiver<Option<usize>>>,
}

impl PromptChooser {
    /// Returns the chooser and the sender the console answers prompts on
    pub fn new(updates: Sender<SensorUpdate>) -> (Self, mpsc::UnboundedSender<Option<usize>>) {
        let (reply_sender, replies) = mpsc::unbounded_channel();
        let chooser = PromptChooser {
            updates,
            replies: Mutex::new(replies),
        };
        (chooser, reply_sender)
    }
}

#[async_trait]
impl DeviceChooser for PromptChooser {
    async fn choose(&self, candidates: &[PeripheralHandle]) -> Option<usize> {
        let mut replies = self.replies.lock().await;
        // Answers typed after an earlier prompt went away
        while replies.try_recv().is_ok() {}

        if self
            .updates
            .send(SensorUpdate::ChooseDevice(candidates.to_vec()))
            .is_err()
        {
            return None;
        }
        replies.recv().await.flatten()
    }
}

pub struct Console {
    commands: mpsc::UnboundedSender<ConnectionCommand>,
    updates: Receiver<SensorUpdate>,
    choices: Option<mpsc::UnboundedSender<Option<usize>>>,
    prompt_open: bool,
}

impl Console {
    pub fn new(
        commands: mpsc::UnboundedSender<ConnectionCommand>,
        updates: Receiver<SensorUpdate>,
        choices: Option<mpsc::UnboundedSender<Option<usize>>>,
    ) -> Self {
        Self {
            commands,
            updates,
            choices,
            prompt_open: false,
        }
    }

    /// Run until `quit`, end of input, or the connection thread going away
    pub fn run(mut self) {
        let lines = spawn_stdin_reader();
        let updates = self.updates.clone();
        println!("{}", HELP);

        loop {
            select! {
                recv(lines) -> line => match line {
                    Ok(line) => {
                        if !self.handle_line(&line) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(updates) -> update => match update {
                    Ok(update) => self.show(update),
                    Err(_) => {
                        log::error!("Connection thread stopped");
                        break;
                    }
                },
            }
        }
    }

    /// Returns false when the console should exit
    fn handle_line(&mut self, line: &str) -> bool {
        match parse_input(line) {
            Input::Command(command) => {
                if self.commands.send(command).is_err() {
                    println!("Connection thread is not running");
                    return false;
                }
            }
            Input::Choice(choice) => self.answer_prompt(choice),
            Input::Help => println!("{}", HELP),
            Input::Quit => return false,
            Input::Empty => {}
            Input::Unknown(word) => println!("Unknown command '{}'. Type 'help'.", word),
        }
        true
    }

    fn answer_prompt(&mut self, choice: Option<usize>) {
        match (&self.choices, self.prompt_open) {
            (Some(choices), true) => {
                self.prompt_open = false;
                let _ = choices.send(choice);
            }
            _ => println!("No device selection pending"),
        }
    }

    fn show(&mut self, update: SensorUpdate) {
        if let SensorUpdate::ChooseDevice(_) = &update {
            self.prompt_open = true;
        }
        if let SensorUpdate::ConnectionState(ConnectionState::Disconnected) = &update {
            self.prompt_open = false;
        }
        println!("{}", describe(&update));
    }
}

/// Human-readable rendering of an update
pub fn describe(update: &SensorUpdate) -> String {
    match update {
        SensorUpdate::ConnectionState(state) => format!("Connection: {}", state_name(*state)),
        SensorUpdate::Connected(peer) => format!("Connected to {} ({})", peer.name, peer.id),
        SensorUpdate::Disconnected(DisconnectCause::Requested) => "Disconnected".to_string(),
        SensorUpdate::Disconnected(DisconnectCause::Unexpected) => {
            "Device disconnected unexpectedly".to_string()
        }
        SensorUpdate::ChooseDevice(candidates) => {
            let mut text = String::from("Select a device (number, or 'cancel'):");
            for (i, peer) in candidates.iter().enumerate() {
                text.push_str(&format!("\n  {}. {} ({})", i + 1, peer.name, peer.id));
            }
            text
        }
        SensorUpdate::Calibrated => "Calibration command sent".to_string(),
        SensorUpdate::CommandSent(text) => format!("Sent '{}'", text),
        SensorUpdate::Session(event) => describe_session(event),
        SensorUpdate::Exported { path, motions, rows } => format!(
            "Exported {} motions ({} samples) to {}",
            motions,
            rows,
            path.display()
        ),
        SensorUpdate::RecordingsCleared(count) => format!("Discarded {} recordings", count),
        SensorUpdate::Status(report) => describe_status(report),
        SensorUpdate::Error(message) => format!("Error: {}", message),
    }
}

fn describe_session(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Started { label, duration } => {
            format!("Recording '{}' for {}s...", label, duration.as_secs())
        }
        SessionEvent::Progress {
            label,
            progress,
            samples,
        } => format!(
            "  '{}' {:>3.0}% ({} samples)",
            label,
            progress * 100.0,
            samples
        ),
        SessionEvent::Stopping { label } => format!("Finishing '{}'...", label),
        SessionEvent::Recorded {
            motion_name,
            samples,
            ..
        } => format!("Recorded '{}' with {} samples", motion_name, samples),
        SessionEvent::Failed { label, error } => format!("Recording '{}' failed: {}", label, error),
        SessionEvent::Aborted { label } => {
            format!("Recording '{}': {}", label, SessionError::SessionAborted)
        }
    }
}

fn describe_status(report: &StatusReport) -> String {
    let device = report
        .peripheral
        .as_ref()
        .map(|p| format!("{} ({})", p.name, p.id))
        .unwrap_or_else(|| "none".to_string());
    let latest = report
        .latest
        .as_ref()
        .map(describe_sample)
        .unwrap_or_else(|| "no data".to_string());

    format!(
        "Connection: {}\nDevice:     {}\nCalibrated: {}\nLatest:     {}\nSamples:    {} received, {} recorded, {} dropped\nSession:    {:?} {:.0}% ({} samples)\nRecordings: {}",
        state_name(report.connection),
        device,
        if report.calibrated { "yes" } else { "no" },
        latest,
        report.samples_received,
        report.samples_recorded,
        report.decode_errors,
        report.session,
        report.progress * 100.0,
        report.session_samples,
        report.recordings,
    )
}

fn describe_sample(sample: &SensorSample) -> String {
    format!(
        "accel ({:.2}, {:.2}, {:.2}) gyro ({:.2}, {:.2}, {:.2}) temp {:.1}",
        sample.accel.x,
        sample.accel.y,
        sample.accel.z,
        sample.gyro.x,
        sample.gyro.y,
        sample.gyro.z,
        sample.temp
    )
}

fn state_name(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Scanning => "scanning",
        ConnectionState::Connected => "connected",
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (sender, receiver) = unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    receiver
}
