pub mod engine;

use crate::common::Result;
use crate::core::recognition_loop::Notifier;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub use engine::{CommandSpeechEngine, SilentEngine, SpeechEngine};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the speech thread. Greetings reach it through `SpeechNotifier`s.
pub struct SpeechWorker {
    sender: SyncSender<String>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    done: Receiver<()>,
    join: Option<JoinHandle<()>>,
}

impl SpeechWorker {
    pub fn spawn(engine: Box<dyn SpeechEngine>, capacity: usize) -> Result<Self> {
        let (sender, queue) = mpsc::sync_channel(capacity);
        let (done_tx, done) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_thread = stop.clone();
        let join = thread::Builder::new()
            .name("speech".into())
            .spawn(move || {
                run_worker(engine, queue, stop_thread);
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            sender,
            stop,
            dropped: Arc::new(AtomicU64::new(0)),
            done,
            join: Some(join),
        })
    }

    pub fn notifier(&self) -> SpeechNotifier {
        SpeechNotifier {
            sender: self.sender.clone(),
            dropped: self.dropped.clone(),
        }
    }

    /// Greetings dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops the worker. The utterance in progress may finish, queued ones
    /// are discarded. Waits at most `timeout`; returns false if the worker
    /// had to be abandoned.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(join) = self.join.take() {
                    if join.join().is_err() {
                        tracing::warn!("Speech thread panicked");
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Speech did not finish within {:?}, abandoning it", timeout);
                false
            }
        }
    }
}

fn run_worker(mut engine: Box<dyn SpeechEngine>, queue: Receiver<String>, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match queue.recv_timeout(POLL_INTERVAL) {
            Ok(text) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = engine.speak(&text) {
                    tracing::warn!("Failed to speak {:?}: {}", text, e);
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }

    let discarded = queue.try_iter().count();
    if discarded > 0 {
        tracing::debug!("Discarded {} queued greetings on shutdown", discarded);
    }
}

/// Cheap handle that enqueues greetings without blocking.
#[derive(Clone)]
pub struct SpeechNotifier {
    sender: SyncSender<String>,
    dropped: Arc<AtomicU64>,
}

impl SpeechNotifier {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Notifier for SpeechNotifier {
    fn greet(&self, text: &str) {
        match self.sender.try_send(text.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Speech queue full, dropping greeting {:?}", text);
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("Speech worker gone, dropping greeting {:?}", text);
            }
        }
    }
}
