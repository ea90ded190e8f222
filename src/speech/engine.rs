use crate::common::{GreeterError, Result};
use crate::common::config::GreetingConfig;
use std::process::{Command, Stdio};

/// Blocking text-to-speech backend driven by the speech worker thread.
pub trait SpeechEngine: Send {
    fn speak(&mut self, text: &str) -> Result<()>;
}

/// Runs an espeak-ng compatible program once per utterance.
pub struct CommandSpeechEngine {
    program: String,
    voice: String,
    rate: u32,
    volume: f32,
}

impl CommandSpeechEngine {
    pub fn from_config(config: &GreetingConfig) -> Self {
        Self {
            program: config.speech_command.clone(),
            voice: config.voice.clone(),
            rate: config.rate,
            volume: config.volume,
        }
    }

    /// espeak-ng amplitude runs 0..=200.
    fn amplitude(&self) -> u32 {
        (self.volume.clamp(0.0, 1.0) * 200.0).round() as u32
    }

    pub fn args(&self, text: &str) -> Vec<String> {
        vec![
            "-v".to_string(),
            self.voice.clone(),
            "-s".to_string(),
            self.rate.to_string(),
            "-a".to_string(),
            self.amplitude().to_string(),
            "--".to_string(),
            text.to_string(),
        ]
    }
}

impl SpeechEngine for CommandSpeechEngine {
    fn speak(&mut self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(self.args(text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| GreeterError::Speech(format!("Failed to run {}: {}", self.program, e)))?;

        if !status.success() {
            return Err(GreeterError::Speech(format!("{} exited with {}", self.program, status)));
        }
        Ok(())
    }
}

/// Logs utterances instead of speaking them.
#[derive(Debug, Default)]
pub struct SilentEngine;

impl SpeechEngine for SilentEngine {
    fn speak(&mut self, text: &str) -> Result<()> {
        tracing::info!("(silent) {}", text);
        Ok(())
    }
}
