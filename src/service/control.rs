use crate::common::{GreeterError, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use crossterm::tty::IsTty;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Requests delivered to the runner between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Shutdown,
    ReloadIdentities,
    ToggleVoice,
    LogStats,
}

pub fn key_to_event(key: char) -> Option<ControlEvent> {
    match key.to_ascii_lowercase() {
        'q' => Some(ControlEvent::Shutdown),
        'r' => Some(ControlEvent::ReloadIdentities),
        'v' => Some(ControlEvent::ToggleVoice),
        's' => Some(ControlEvent::LogStats),
        _ => None,
    }
}

/// Ctrl+C arrives as a key while the terminal is in raw mode.
pub fn key_event_to_event(key: &KeyEvent) -> Option<ControlEvent> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(ControlEvent::Shutdown),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => key_to_event(c),
        KeyCode::Esc => Some(ControlEvent::Shutdown),
        _ => None,
    }
}

/// SIGINT and SIGTERM become `Shutdown`.
pub fn install_signal_handler(tx: Sender<ControlEvent>) -> Result<()> {
    ctrlc::set_handler(move || {
        let _ = tx.send(ControlEvent::Shutdown);
    })
    .map_err(|e| GreeterError::Other(anyhow::anyhow!("Failed to set signal handler: {}", e)))
}

pub struct KeyboardListener {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl KeyboardListener {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for KeyboardListener {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!("Failed to restore terminal: {}", e);
        }
    }
}

/// Reads single-key commands from the terminal in raw mode until stopped.
/// Returns `None` when stdin is not a terminal (running under systemd, for
/// instance).
pub fn spawn_keyboard_listener(tx: Sender<ControlEvent>) -> Result<Option<KeyboardListener>> {
    if !io::stdin().is_tty() {
        tracing::debug!("stdin is not a terminal, keyboard commands disabled");
        return Ok(None);
    }

    terminal::enable_raw_mode()
        .map_err(|e| GreeterError::Other(anyhow::anyhow!("Failed to enable raw mode: {}", e)))?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = stop.clone();
    let join = thread::Builder::new()
        .name("keyboard".into())
        .spawn(move || {
            while !stop_thread.load(Ordering::SeqCst) {
                match read_key() {
                    Ok(Some(key)) => {
                        if let Some(event) = key_event_to_event(&key) {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("Keyboard input failed, disabling key commands: {}", e);
                        break;
                    }
                }
            }
        });
    let join = match join {
        Ok(join) => join,
        Err(e) => {
            let _ = terminal::disable_raw_mode();
            return Err(e.into());
        }
    };

    tracing::info!("Keys: q or Esc quit, r reload faces, v toggle voice, s stats");
    Ok(Some(KeyboardListener { stop, join: Some(join) }))
}

fn read_key() -> io::Result<Option<KeyEvent>> {
    if event::poll(KEY_POLL_INTERVAL)? {
        if let Event::Key(key) = event::read()? {
            return Ok(Some(key));
        }
    }
    Ok(None)
}

/// Asks a running loop, possibly in another process, to reload.
pub fn request_reload(marker: &Path) -> Result<()> {
    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(marker, chrono::Utc::now().to_rfc3339())?;
    Ok(())
}

/// Consumes a pending reload request. True if one was pending.
pub fn take_reload_request(marker: &Path) -> bool {
    match fs::remove_file(marker) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Cannot consume reload request {}: {}", marker.display(), e);
            false
        }
    }
}
