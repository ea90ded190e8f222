use crate::common::Result;
use crate::core::recognition_loop::LoopState;
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Deserialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of the running loop, published for `facegreeter status`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoopStatus {
    pub state: LoopState,
    pub camera_available: bool,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub frames_processed: u64,
    pub acquisition_failures: u64,
    pub recognition_failures: u64,
    pub unknown_faces_saved: u64,
    pub known_identities: usize,
    pub fps: f32,
    pub updated_at: DateTime<Utc>,
}

pub struct StatusWriter {
    path: PathBuf,
    min_interval: Duration,
    last_written: Option<(DateTime<Utc>, LoopState)>,
}

impl StatusWriter {
    pub fn new(path: &Path, min_interval: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            min_interval,
            last_written: None,
        }
    }

    /// Writes unless the last write was less than `min_interval` ago with the
    /// same state. `force` always writes. Returns whether it wrote.
    pub fn write(&mut self, status: &LoopStatus, force: bool) -> Result<bool> {
        let due = match self.last_written {
            None => true,
            Some((at, state)) => {
                state != status.state
                    || status.updated_at.signed_duration_since(at) >= self.min_interval
            }
        };
        if !force && !due {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(status)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        self.last_written = Some((status.updated_at, status.state));
        Ok(true)
    }
}

pub fn read_status(path: &Path) -> Result<LoopStatus> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn status(state: LoopState, secs: i64, frames: u64) -> LoopStatus {
        LoopStatus {
            state,
            camera_available: true,
            last_frame_at: None,
            consecutive_failures: 0,
            frames_processed: frames,
            acquisition_failures: 0,
            recognition_failures: 0,
            unknown_faces_saved: 0,
            known_identities: 2,
            fps: 0.0,
            updated_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn writes_are_throttled_unless_state_changes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        let mut writer = StatusWriter::new(&path, Duration::seconds(1));

        assert!(writer.write(&status(LoopState::Running, 0, 1), false).unwrap());
        assert!(!writer.write(&status(LoopState::Running, 0, 2), false).unwrap());
        assert!(writer.write(&status(LoopState::Running, 1, 3), false).unwrap());
        assert!(writer.write(&status(LoopState::Stopped, 1, 3), false).unwrap());
        assert!(writer.write(&status(LoopState::Stopped, 1, 4), true).unwrap());

        let read = read_status(&path).unwrap();
        assert_eq!(read.state, LoopState::Stopped);
        assert_eq!(read.frames_processed, 4);
    }

    #[test]
    fn state_is_serialized_lowercase() {
        let json = serde_json::to_string(&status(LoopState::Running, 0, 0)).unwrap();
        assert!(json.contains("\"state\":\"running\""));
    }
}
