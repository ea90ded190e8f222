use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use crate::common::error::{GreeterError, Result};
use crate::core::matching::DistanceMetric;

/// Placeholder substituted with the person's name in greeting templates.
pub const NAME_PLACEHOLDER: &str = "{name}";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub greeting: GreetingConfig,
    #[serde(default)]
    pub unknown_faces: UnknownFacesConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// 999 means auto-detect.
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 5 }
fn default_warmup_delay() -> u64 { 50 }
fn default_max_failures() -> u32 { 30 }
fn default_retry_delay() -> u64 { 100 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_width(),
            height: default_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
            max_consecutive_failures: default_max_failures(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_size")]
    pub input_width: u32,
    #[serde(default = "default_detector_size")]
    pub input_height: u32,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou_threshold: f32,
    #[serde(default = "default_max_faces")]
    pub max_faces: usize,
}

fn default_detector_size() -> u32 { 640 }
fn default_confidence() -> f32 { 0.5 }
fn default_nms_iou() -> f32 { 0.45 }
fn default_max_faces() -> usize { 10 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_size(),
            input_height: default_detector_size(),
            confidence_threshold: default_confidence(),
            nms_iou_threshold: default_nms_iou(),
            max_faces: default_max_faces(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_normalization")]
    pub normalization_value: f32,
    /// 1 for grayscale embedding models, 3 for RGB.
    #[serde(default = "default_channels")]
    pub channels: u32,
}

fn default_input_size() -> u32 { 112 }
fn default_normalization() -> f32 { 127.5 }
fn default_channels() -> u32 { 3 }

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: default_input_size(),
            normalization_value: default_normalization(),
            channels: default_channels(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognitionConfig {
    /// Maximum distance for a match; lower is stricter.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default = "default_debounce_capacity")]
    pub debounce_capacity: usize,
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f64,
}

fn default_tolerance() -> f32 { 0.6 }
fn default_debounce_capacity() -> usize { 256 }
fn default_blur_threshold() -> f64 { 100.0 }

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            metric: DistanceMetric::default(),
            debounce_capacity: default_debounce_capacity(),
            blur_threshold: default_blur_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GreetingConfig {
    #[serde(default = "default_true")]
    pub voice_enabled: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_template")]
    pub default_template: String,
    #[serde(default)]
    pub custom_greetings: HashMap<String, String>,
    #[serde(default = "default_speech_command")]
    pub speech_command: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_rate")]
    pub rate: u32,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

fn default_true() -> bool { true }
fn default_cooldown() -> u64 { 30 }
fn default_template() -> String { "Hello {name}!".to_string() }
fn default_speech_command() -> String { "espeak-ng".to_string() }
fn default_voice() -> String { "en".to_string() }
fn default_rate() -> u32 { 150 }
fn default_volume() -> f32 { 1.0 }
fn default_queue_capacity() -> usize { 8 }
fn default_drain_timeout() -> u64 { 3000 }

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            voice_enabled: true,
            cooldown_seconds: default_cooldown(),
            default_template: default_template(),
            custom_greetings: HashMap::new(),
            speech_command: default_speech_command(),
            voice: default_voice(),
            rate: default_rate(),
            volume: default_volume(),
            queue_capacity: default_queue_capacity(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UnknownFacesConfig {
    #[serde(default = "default_true")]
    pub auto_save_unknown: bool,
    #[serde(default = "default_unknown_threshold")]
    pub unknown_face_threshold: u32,
    #[serde(default)]
    pub crop_padding: u32,
    #[serde(default)]
    pub announce_unknown: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_unknown_threshold() -> u32 { 10 }
fn default_retention_days() -> u32 { 30 }

impl Default for UnknownFacesConfig {
    fn default() -> Self {
        Self {
            auto_save_unknown: true,
            unknown_face_threshold: default_unknown_threshold(),
            crop_padding: 0,
            announce_unknown: false,
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    pub known_faces_dir: PathBuf,
    pub unknown_faces_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

// A year; keeps chrono duration arithmetic far from overflow.
const MAX_COOLDOWN_SECONDS: u64 = 365 * 24 * 60 * 60;

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GreeterError::Config(format!(
                "Config file not found: {}. Please create it from configs/facegreeter.example.toml.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| GreeterError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Camera
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(GreeterError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(GreeterError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }
        if self.camera.max_consecutive_failures == 0 {
            return Err(GreeterError::Config(
                "camera.max_consecutive_failures must be at least 1".into()
            ));
        }

        // Models
        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(GreeterError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(GreeterError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(GreeterError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.nms_iou_threshold) {
            return Err(GreeterError::Config(format!(
                "NMS IoU threshold must be between 0.0 and 1.0, got {}",
                self.detector.nms_iou_threshold
            )));
        }
        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(GreeterError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }
        if self.recognizer.channels != 1 && self.recognizer.channels != 3 {
            return Err(GreeterError::Config(format!(
                "Recognizer channels must be 1 or 3, got {}", self.recognizer.channels
            )));
        }
        if !(self.recognizer.normalization_value > 0.0) {
            return Err(GreeterError::Config(format!(
                "Recognizer normalization value must be positive, got {}",
                self.recognizer.normalization_value
            )));
        }

        // Recognition policy
        let tolerance = self.recognition.tolerance;
        if !tolerance.is_finite() || tolerance <= 0.0 || tolerance > 2.0 {
            return Err(GreeterError::Config(format!(
                "Tolerance must be in (0.0, 2.0], got {}", tolerance
            )));
        }
        if self.recognition.debounce_capacity == 0 {
            return Err(GreeterError::Config(
                "recognition.debounce_capacity must be at least 1".into()
            ));
        }
        if !self.recognition.blur_threshold.is_finite() || self.recognition.blur_threshold < 0.0 {
            return Err(GreeterError::Config(format!(
                "Blur threshold must be a non-negative number, got {}",
                self.recognition.blur_threshold
            )));
        }

        // Greeting
        if self.greeting.cooldown_seconds > MAX_COOLDOWN_SECONDS {
            return Err(GreeterError::Config(format!(
                "Cooldown must be at most {} seconds, got {}",
                MAX_COOLDOWN_SECONDS, self.greeting.cooldown_seconds
            )));
        }
        if !self.greeting.default_template.contains(NAME_PLACEHOLDER) {
            return Err(GreeterError::Config(format!(
                "Default greeting template must contain {}, got {:?}",
                NAME_PLACEHOLDER, self.greeting.default_template
            )));
        }
        for (name, template) in &self.greeting.custom_greetings {
            if !template.contains(NAME_PLACEHOLDER) {
                return Err(GreeterError::Config(format!(
                    "Custom greeting for {} must contain {}, got {:?}",
                    name, NAME_PLACEHOLDER, template
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.greeting.volume) {
            return Err(GreeterError::Config(format!(
                "Volume must be between 0.0 and 1.0, got {}", self.greeting.volume
            )));
        }
        if self.greeting.queue_capacity == 0 {
            return Err(GreeterError::Config(
                "greeting.queue_capacity must be at least 1".into()
            ));
        }
        if self.greeting.speech_command.trim().is_empty() {
            return Err(GreeterError::Config("greeting.speech_command must not be empty".into()));
        }

        // Unknown faces
        if self.unknown_faces.unknown_face_threshold == 0 {
            return Err(GreeterError::Config(
                "unknown_faces.unknown_face_threshold must be at least 1".into()
            ));
        }

        Ok(())
    }
}
