use crossbeam_channel::unbounded;
use motion_capture::app::{Console, PromptChooser};
use motion_capture::bluetooth::BleTransport;
use motion_capture::config::Config;
use motion_capture::connection::ConnectionManager;
use motion_capture::sensor::SensorUpdate;
use motion_capture::transport::{DeviceChooser, FirstMatch};
use std::sync::Arc;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; using default settings", e);
            Config::default()
        }
    };

    // Channel for updates from the connection thread to the console
    let (sender, receiver) = unbounded::<SensorUpdate>();

    let mut choices = None;
    let chooser: Arc<dyn DeviceChooser> = if config.auto_select_first {
        Arc::new(FirstMatch)
    } else {
        let (prompt, replies) = PromptChooser::new(sender.clone());
        choices = Some(replies);
        Arc::new(prompt)
    };

    let transport = BleTransport::new(config.scan_window(), chooser);
    let (manager, commands) = ConnectionManager::new(transport, config, sender);

    // The radio runs on its own thread and runtime so the console never blocks on it
    let connection = std::thread::spawn(move || {
        manager.run();
    });

    Console::new(commands, receiver, choices).run();

    // Console dropped its command sender; wait for the disconnect to finish
    if connection.join().is_err() {
        log::error!("Connection thread panicked");
    }
}
