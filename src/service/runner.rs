use crate::camera::FrameSource;
use crate::common::{Config, GreeterError, Result};
use crate::core::matching::IdentitySet;
use crate::core::recognition_loop::{FaceOutcome, LoopPolicy, LoopState, RecognitionLoop};
use crate::service::control::{take_reload_request, ControlEvent};
use crate::storage::known_faces::IdentityRepository;
use crate::storage::status::{LoopStatus, StatusWriter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Duration;

const FPS_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Acquisition failures in a row tolerated before the camera is declared gone.
    pub max_consecutive_failures: u32,
    pub retry_delay: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_consecutive_failures: config.camera.max_consecutive_failures,
            retry_delay: Duration::from_millis(config.camera.retry_delay_ms),
        }
    }
}

#[derive(Debug)]
pub enum StepOutcome {
    Processed(Vec<FaceOutcome>),
    Skipped,
    Stopped,
}

/// Drives the recognition loop: control events, frame acquisition, reloads
/// and status publication.
pub struct LoopRunner {
    source: Box<dyn FrameSource>,
    recognition: RecognitionLoop,
    repository: Box<dyn IdentityRepository>,
    control: Receiver<ControlEvent>,
    config_path: Option<PathBuf>,
    /// Config the process started with; sections outside the loop policy stay on it.
    config: Option<Config>,
    /// Set by the voice toggle; survives reloads.
    voice_override: Option<bool>,
    reload_marker: Option<PathBuf>,
    status: Option<StatusWriter>,
    settings: RunnerSettings,
    state: LoopState,
    consecutive_failures: u32,
    acquisition_failures: u64,
    last_frame_at: Option<DateTime<Utc>>,
    frame_times: VecDeque<DateTime<Utc>>,
}

impl LoopRunner {
    pub fn new(
        source: Box<dyn FrameSource>,
        recognition: RecognitionLoop,
        repository: Box<dyn IdentityRepository>,
        control: Receiver<ControlEvent>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            source,
            recognition,
            repository,
            control,
            config_path: None,
            config: None,
            voice_override: None,
            reload_marker: None,
            status: None,
            settings,
            state: LoopState::Running,
            consecutive_failures: 0,
            acquisition_failures: 0,
            last_frame_at: None,
            frame_times: VecDeque::with_capacity(FPS_WINDOW),
        }
    }

    /// Reloads re-read `path` for the policy; without it only identities reload.
    /// `config` is what the process started with.
    pub fn with_config(mut self, path: PathBuf, config: Config) -> Self {
        self.config_path = Some(path);
        self.config = Some(config);
        self
    }

    pub fn with_reload_marker(mut self, path: PathBuf) -> Self {
        self.reload_marker = Some(path);
        self
    }

    pub fn with_status_writer(mut self, writer: StatusWriter) -> Self {
        self.status = Some(writer);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn recognition(&self) -> &RecognitionLoop {
        &self.recognition
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn acquisition_failures(&self) -> u64 {
        self.acquisition_failures
    }

    /// Runs until shutdown or until the source runs out. Fails with
    /// `CameraUnavailable` once the acquisition failure budget is spent.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(
            "Recognition loop running with {} known faces",
            self.recognition.identities().len()
        );
        self.publish(true);

        loop {
            if let StepOutcome::Stopped = self.step()? {
                break;
            }
        }

        tracing::info!("Recognition loop stopped");
        Ok(())
    }

    /// One iteration: pending control events, a pending reload request,
    /// then one frame.
    pub fn step(&mut self) -> Result<StepOutcome> {
        if self.state == LoopState::Stopped {
            return Ok(StepOutcome::Stopped);
        }

        self.handle_control_events();
        if self.state == LoopState::Stopped {
            self.publish(true);
            return Ok(StepOutcome::Stopped);
        }

        let requested = self.reload_marker.as_deref().map(take_reload_request).unwrap_or(false);
        if requested {
            tracing::info!("Reload requested");
            self.reload_logged();
        }

        match self.source.next_frame() {
            Ok(frame) => {
                let now = Utc::now();
                self.consecutive_failures = 0;
                self.record_frame(now);

                let outcomes = self.recognition.tick(&frame, now);
                self.publish(false);
                Ok(StepOutcome::Processed(outcomes))
            }
            Err(GreeterError::SourceExhausted) => {
                tracing::info!("Frame source exhausted");
                self.state = LoopState::Stopped;
                self.publish(true);
                Ok(StepOutcome::Stopped)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.acquisition_failures += 1;
                tracing::warn!(
                    "Frame acquisition failed ({}/{}): {}",
                    self.consecutive_failures, self.settings.max_consecutive_failures, e
                );

                if self.consecutive_failures > self.settings.max_consecutive_failures {
                    self.state = LoopState::Stopped;
                    self.publish(true);
                    return Err(GreeterError::CameraUnavailable(format!(
                        "{} consecutive frame failures, last: {}",
                        self.consecutive_failures, e
                    )));
                }

                self.publish(false);
                if !self.settings.retry_delay.is_zero() {
                    std::thread::sleep(self.settings.retry_delay);
                }
                Ok(StepOutcome::Skipped)
            }
        }
    }

    fn handle_control_events(&mut self) {
        while let Ok(event) = self.control.try_recv() {
            match event {
                ControlEvent::Shutdown => {
                    tracing::info!("Shutdown requested");
                    self.state = LoopState::Stopped;
                }
                ControlEvent::ReloadIdentities => self.reload_logged(),
                ControlEvent::ToggleVoice => {
                    let enabled = !self.recognition.voice_enabled();
                    self.recognition.set_voice_enabled(enabled);
                    self.voice_override = Some(enabled);
                    tracing::info!("Voice {}", if enabled { "enabled" } else { "disabled" });
                }
                ControlEvent::LogStats => self.log_stats(),
            }
        }
    }

    fn reload_logged(&mut self) {
        if let Err(e) = self.reload() {
            tracing::warn!("Reload rejected, keeping current configuration: {}", e);
        }
    }

    /// Builds the new policy and identity set, then swaps both in at once.
    /// On any error nothing changes.
    pub fn reload(&mut self) -> Result<()> {
        let mut policy = match &self.config_path {
            Some(path) => {
                let config = Config::load_from_path(path)?;
                if let Some(current) = &self.config {
                    let pending = restart_required(current, &config);
                    if !pending.is_empty() {
                        tracing::warn!("Changes to {} take effect after a restart", pending.join(", "));
                    }
                }
                LoopPolicy::from_config(&config)
            }
            None => self.recognition.policy().clone(),
        };
        if let Some(enabled) = self.voice_override {
            if policy.voice_enabled != enabled {
                tracing::info!("Keeping voice {} as toggled", if enabled { "on" } else { "off" });
            }
            policy.voice_enabled = enabled;
        }
        let identities = IdentitySet::new(self.repository.load_all()?);

        self.recognition.apply_reload(identities, policy);
        Ok(())
    }

    fn record_frame(&mut self, now: DateTime<Utc>) {
        self.last_frame_at = Some(now);
        if self.frame_times.len() == FPS_WINDOW {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(now);
    }

    fn fps(&self) -> f32 {
        match (self.frame_times.front(), self.frame_times.back()) {
            (Some(first), Some(last)) if self.frame_times.len() > 1 => {
                let span = last.signed_duration_since(*first).num_milliseconds();
                if span > 0 {
                    (self.frame_times.len() - 1) as f32 * 1000.0 / span as f32
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn status(&self) -> LoopStatus {
        let stats = self.recognition.stats();
        LoopStatus {
            state: self.state,
            camera_available: self.last_frame_at.is_some() && self.consecutive_failures == 0,
            last_frame_at: self.last_frame_at,
            consecutive_failures: self.consecutive_failures,
            frames_processed: stats.frames_processed,
            acquisition_failures: self.acquisition_failures,
            recognition_failures: stats.recognition_failures,
            unknown_faces_saved: stats.unknown_faces_saved,
            known_identities: self.recognition.identities().len(),
            fps: self.fps(),
            updated_at: Utc::now(),
        }
    }

    fn publish(&mut self, force: bool) {
        let status = self.status();
        if let Some(writer) = self.status.as_mut() {
            if let Err(e) = writer.write(&status, force) {
                tracing::warn!("Failed to write status: {}", e);
            }
        }
    }

    fn log_stats(&self) {
        let stats = self.recognition.stats();
        tracing::info!(
            "Stats: {} frames ({:.1} fps), {} faces, {} greetings, {} unknown saved, {} recognition failures, {} acquisition failures, {} known, voice {}",
            stats.frames_processed,
            self.fps(),
            stats.faces_seen,
            stats.greetings_issued,
            stats.unknown_faces_saved,
            stats.recognition_failures,
            self.acquisition_failures,
            self.recognition.identities().len(),
            if self.recognition.voice_enabled() { "on" } else { "off" }
        );
    }
}

/// Config sections that differ between `current` and `new` but are only
/// read at startup.
pub fn restart_required(current: &Config, new: &Config) -> Vec<&'static str> {
    fn differs<T: Serialize>(a: &T, b: &T) -> bool {
        serde_json::to_value(a).ok() != serde_json::to_value(b).ok()
    }
    fn speech(config: &Config) -> (&str, &str, u32, f32, usize, u64) {
        let g = &config.greeting;
        (&g.speech_command, &g.voice, g.rate, g.volume, g.queue_capacity, g.drain_timeout_ms)
    }

    let mut sections = Vec::new();
    if differs(&current.camera, &new.camera) {
        sections.push("camera");
    }
    if differs(&current.models, &new.models) {
        sections.push("models");
    }
    if differs(&current.detector, &new.detector) {
        sections.push("detector");
    }
    if differs(&current.recognizer, &new.recognizer) {
        sections.push("recognizer");
    }
    if current.recognition.metric != new.recognition.metric {
        sections.push("recognition.metric");
    }
    if differs(&speech(current), &speech(new)) {
        sections.push("greeting speech settings");
    }
    if differs(&current.storage, &new.storage) {
        sections.push("storage");
    }
    if differs(&current.performance, &new.performance) {
        sections.push("performance");
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recognition_loop::tests::{face, MemorySink, RecordingNotifier, ScriptedRecognizer};
    use crate::camera::ImageDirSource;
    use crate::core::types::{BoundingBox, EnrolledIdentity};
    use crate::service::control::request_reload;
    use crate::storage::status::read_status;
    use image::DynamicImage;
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;
    use std::sync::mpsc::{self, Sender};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct ScriptedSource {
        frames: VecDeque<Result<DynamicImage>>,
    }

    impl ScriptedSource {
        fn new(pattern: &[bool]) -> Self {
            let frames = pattern
                .iter()
                .map(|ok| {
                    if *ok {
                        Ok(DynamicImage::new_rgb8(100, 100))
                    } else {
                        Err(GreeterError::Camera("no frame".into()))
                    }
                })
                .collect();
            Self { frames }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<DynamicImage> {
            self.frames
                .pop_front()
                .unwrap_or_else(|| Err(GreeterError::Camera("script exhausted".into())))
        }
    }

    struct StaticRepository {
        identities: Vec<EnrolledIdentity>,
        loads: Rc<Cell<u32>>,
    }

    impl IdentityRepository for StaticRepository {
        fn load_all(&mut self) -> Result<Vec<EnrolledIdentity>> {
            self.loads.set(self.loads.get() + 1);
            Ok(self.identities.clone())
        }
    }

    struct Fixture {
        runner: LoopRunner,
        tx: Sender<ControlEvent>,
        loads: Rc<Cell<u32>>,
    }

    fn fixture(pattern: &[bool], max_failures: u32) -> Fixture {
        fixture_with_source(Box::new(ScriptedSource::new(pattern)), max_failures)
    }

    fn fixture_with_source(source: Box<dyn FrameSource>, max_failures: u32) -> Fixture {
        let alice = EnrolledIdentity { name: "Alice".into(), embedding: vec![0.0, 0.0] };
        let recognition = RecognitionLoop::new(
            Arc::new(ScriptedRecognizer::always(vec![face(BoundingBox::new(0, 40, 40, 0), &[0.0, 0.0])])),
            Box::new(RecordingNotifier::default()),
            Box::new(MemorySink::default()),
            IdentitySet::default(),
            LoopPolicy::default(),
        );
        let loads = Rc::new(Cell::new(0));
        let repository = StaticRepository { identities: vec![alice], loads: loads.clone() };
        let (tx, rx) = mpsc::channel();
        let settings = RunnerSettings { max_consecutive_failures: max_failures, retry_delay: Duration::ZERO };

        let runner = LoopRunner::new(
            source,
            recognition,
            Box::new(repository),
            rx,
            settings,
        );
        Fixture { runner, tx, loads }
    }

    const VALID_CONFIG: &str = r#"
        [models]
        detector_path = "d.onnx"
        recognizer_path = "r.onnx"
        [storage]
        base_dir = "data"
        known_faces_dir = "data/known"
        unknown_faces_dir = "data/unknown"
        [greeting]
        cooldown_seconds = 5
    "#;

    #[test]
    fn camera_is_declared_unavailable_after_the_failure_budget() {
        let mut f = fixture(&[false, false, false, false], 3);

        for _ in 0..3 {
            assert!(matches!(f.runner.step(), Ok(StepOutcome::Skipped)));
        }
        assert!(matches!(f.runner.step(), Err(GreeterError::CameraUnavailable(_))));
        assert_eq!(f.runner.state(), LoopState::Stopped);
        assert!(matches!(f.runner.step(), Ok(StepOutcome::Stopped)));
    }

    #[test]
    fn a_good_frame_resets_the_failure_count() {
        let mut f = fixture(&[false, false, true, false, false, false, true], 3);

        for _ in 0..7 {
            assert!(f.runner.step().is_ok());
        }
        assert_eq!(f.runner.consecutive_failures(), 0);
        assert_eq!(f.runner.acquisition_failures(), 5);
        assert_eq!(f.runner.recognition().stats().frames_processed, 2);
    }

    #[test]
    fn run_returns_camera_unavailable() {
        let mut f = fixture(&[true, false, false], 1);
        assert!(matches!(f.runner.run(), Err(GreeterError::CameraUnavailable(_))));
        assert_eq!(f.runner.recognition().stats().frames_processed, 1);
    }

    #[test]
    fn shutdown_is_honored_before_the_next_frame() {
        let mut f = fixture(&[true, true, true], 3);

        assert!(matches!(f.runner.step(), Ok(StepOutcome::Processed(_))));
        f.tx.send(ControlEvent::Shutdown).unwrap();
        assert!(matches!(f.runner.step(), Ok(StepOutcome::Stopped)));
        assert_eq!(f.runner.recognition().stats().frames_processed, 1);
        assert!(f.runner.run().is_ok());
    }

    #[test]
    fn reload_event_swaps_in_identities() {
        let mut f = fixture(&[true, true], 3);

        match f.runner.step().unwrap() {
            StepOutcome::Processed(outcomes) => assert_eq!(outcomes[0].label.to_string(), "unknown"),
            other => panic!("unexpected {:?}", other),
        }

        f.tx.send(ControlEvent::ReloadIdentities).unwrap();
        match f.runner.step().unwrap() {
            StepOutcome::Processed(outcomes) => {
                assert_eq!(outcomes[0].label.to_string(), "Alice");
                assert_eq!(outcomes[0].greeting.as_deref(), Some("Hello Alice!"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.loads.get(), 1);
    }

    #[test]
    fn invalid_config_reload_is_rejected_whole() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("facegreeter.toml");
        fs::write(&path, format!("{}\n[recognition]\ntolerance = -1.0\n", VALID_CONFIG)).unwrap();

        let f = fixture(&[true], 3);
        let mut runner = f.runner.with_config(path, Config::from_toml_str(VALID_CONFIG).unwrap());
        f.tx.send(ControlEvent::ReloadIdentities).unwrap();

        assert!(matches!(runner.step(), Ok(StepOutcome::Processed(_))));
        assert_eq!(runner.recognition().policy(), &LoopPolicy::default());
        assert!(runner.recognition().identities().is_empty());
        assert_eq!(f.loads.get(), 0);
    }

    #[test]
    fn valid_config_reload_updates_policy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("facegreeter.toml");
        fs::write(&path, VALID_CONFIG).unwrap();

        let f = fixture(&[true], 3);
        let mut runner = f.runner.with_config(path, Config::from_toml_str(VALID_CONFIG).unwrap());
        runner.reload().unwrap();

        assert_eq!(runner.recognition().policy().cooldown, chrono::Duration::seconds(5));
        assert_eq!(runner.recognition().identities().len(), 1);
    }

    #[test]
    fn voice_toggle_survives_a_config_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("facegreeter.toml");
        fs::write(&path, VALID_CONFIG).unwrap();

        let f = fixture(&[true], 3);
        let mut runner = f.runner.with_config(path, Config::from_toml_str(VALID_CONFIG).unwrap());
        f.tx.send(ControlEvent::ToggleVoice).unwrap();
        runner.step().unwrap();
        assert!(!runner.recognition().voice_enabled());

        runner.reload().unwrap();
        assert!(!runner.recognition().voice_enabled());
        assert_eq!(runner.recognition().policy().cooldown, chrono::Duration::seconds(5));
    }

    #[test]
    fn startup_only_sections_are_reported() {
        let current = Config::from_toml_str(VALID_CONFIG).unwrap();
        assert!(restart_required(&current, &current.clone()).is_empty());

        let changed = Config::from_toml_str(&format!(
            "{}\n[camera]\nwidth = 1280\n[recognizer]\nchannels = 1\n",
            VALID_CONFIG
        ))
        .unwrap();
        assert_eq!(restart_required(&current, &changed), vec!["camera", "recognizer"]);

        let policy_only = Config::from_toml_str(&VALID_CONFIG.replace("cooldown_seconds = 5", "cooldown_seconds = 9")).unwrap();
        assert!(restart_required(&current, &policy_only).is_empty());
    }

    #[test]
    fn replay_skips_an_unreadable_image_and_finishes_cleanly() {
        let tmp = TempDir::new().unwrap();
        DynamicImage::new_rgb8(100, 100).save(tmp.path().join("a.png")).unwrap();
        fs::write(tmp.path().join("b.png"), b"garbage").unwrap();
        DynamicImage::new_rgb8(100, 100).save(tmp.path().join("c.png")).unwrap();

        let source = ImageDirSource::new(tmp.path(), false).unwrap();
        let mut f = fixture_with_source(Box::new(source), 3);

        assert!(matches!(f.runner.step(), Ok(StepOutcome::Processed(_))));
        assert!(matches!(f.runner.step(), Ok(StepOutcome::Skipped)));
        assert!(matches!(f.runner.step(), Ok(StepOutcome::Processed(_))));
        assert!(matches!(f.runner.step(), Ok(StepOutcome::Stopped)));
        assert_eq!(f.runner.state(), LoopState::Stopped);
        assert_eq!(f.runner.recognition().stats().frames_processed, 2);
        assert_eq!(f.runner.acquisition_failures(), 1);
    }

    #[test]
    fn run_returns_ok_when_the_replay_ends() {
        let tmp = TempDir::new().unwrap();
        DynamicImage::new_rgb8(100, 100).save(tmp.path().join("a.png")).unwrap();

        let source = ImageDirSource::new(tmp.path(), false).unwrap();
        let mut f = fixture_with_source(Box::new(source), 0);

        assert!(f.runner.run().is_ok());
        assert_eq!(f.runner.recognition().stats().frames_processed, 1);
    }

    #[test]
    fn reload_marker_is_picked_up_once() {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("reload.request");

        let f = fixture(&[true, true], 3);
        let mut runner = f.runner.with_reload_marker(marker.clone());
        request_reload(&marker).unwrap();

        runner.step().unwrap();
        runner.step().unwrap();
        assert!(!marker.exists());
        assert_eq!(f.loads.get(), 1);
    }

    #[test]
    fn toggle_voice_flips_the_policy() {
        let mut f = fixture(&[true], 3);
        f.tx.send(ControlEvent::ToggleVoice).unwrap();
        f.tx.send(ControlEvent::LogStats).unwrap();
        f.runner.step().unwrap();
        assert!(!f.runner.recognition().voice_enabled());
    }

    #[test]
    fn status_file_tracks_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");

        let f = fixture(&[true, true], 3);
        let mut runner = f.runner.with_status_writer(StatusWriter::new(&path, chrono::Duration::seconds(1)));

        runner.step().unwrap();
        let status = read_status(&path).unwrap();
        assert_eq!(status.state, LoopState::Running);
        assert_eq!(status.frames_processed, 1);
        assert!(status.camera_available);

        f.tx.send(ControlEvent::Shutdown).unwrap();
        runner.step().unwrap();
        assert_eq!(read_status(&path).unwrap().state, LoopState::Stopped);
    }
}
