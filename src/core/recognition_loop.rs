use crate::common::{Config, Result};
use crate::common::config::NAME_PLACEHOLDER;
use crate::core::cooldown::GreetingCooldowns;
use crate::core::debounce::UnknownDebounce;
use crate::core::matching::{IdentityMatch, IdentitySet};
use crate::core::recognizer::Recognizer;
use crate::core::types::{BoundingBox, DetectedFace};
use chrono::{DateTime, Duration, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const UNKNOWN_ANNOUNCEMENT: &str = "New face detected and saved";

const ERROR_LOG_INTERVAL_SECS: i64 = 30;

/// Fire-and-forget greeting output. Must not block the loop.
pub trait Notifier {
    fn greet(&self, text: &str);
}

/// Persists an unknown face crop and returns its record id.
pub trait UnknownFaceSink {
    fn save_unknown(
        &mut self,
        crop: &DynamicImage,
        bbox: BoundingBox,
        timestamp: DateTime<Utc>,
    ) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Running,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Running => write!(f, "running"),
            LoopState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceLabel {
    Known(String),
    Unknown,
}

impl fmt::Display for FaceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceLabel::Known(name) => write!(f, "{}", name),
            FaceLabel::Unknown => write!(f, "unknown"),
        }
    }
}

/// What happened to one face during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOutcome {
    pub bbox: BoundingBox,
    pub label: FaceLabel,
    /// Distance to the matched identity; `None` for unknown faces.
    pub distance: Option<f32>,
    /// Greeting text emitted this tick, if any.
    pub greeting: Option<String>,
    /// Record id of an unknown face saved this tick.
    pub saved_unknown: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GreetingTemplates {
    default_template: String,
    custom: HashMap<String, String>,
}

impl GreetingTemplates {
    pub fn new(default_template: impl Into<String>, custom: HashMap<String, String>) -> Self {
        Self {
            default_template: default_template.into(),
            custom,
        }
    }

    pub fn render(&self, name: &str) -> String {
        let template = self.custom.get(name).unwrap_or(&self.default_template);
        template.replace(NAME_PLACEHOLDER, name)
    }
}

impl Default for GreetingTemplates {
    fn default() -> Self {
        Self::new("Hello {name}!", HashMap::new())
    }
}

/// Tunables the loop reads every tick. Replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopPolicy {
    pub tolerance: f32,
    pub cooldown: Duration,
    pub unknown_face_threshold: u32,
    pub auto_save_unknown: bool,
    pub voice_enabled: bool,
    pub announce_unknown: bool,
    pub crop_padding: u32,
    pub debounce_capacity: usize,
    pub greetings: GreetingTemplates,
}

impl LoopPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tolerance: config.recognition.tolerance,
            cooldown: Duration::seconds(config.greeting.cooldown_seconds as i64),
            unknown_face_threshold: config.unknown_faces.unknown_face_threshold,
            auto_save_unknown: config.unknown_faces.auto_save_unknown,
            voice_enabled: config.greeting.voice_enabled,
            announce_unknown: config.unknown_faces.announce_unknown,
            crop_padding: config.unknown_faces.crop_padding,
            debounce_capacity: config.recognition.debounce_capacity,
            greetings: GreetingTemplates::new(
                config.greeting.default_template.clone(),
                config.greeting.custom_greetings.clone(),
            ),
        }
    }
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            cooldown: Duration::seconds(30),
            unknown_face_threshold: 10,
            auto_save_unknown: true,
            voice_enabled: true,
            announce_unknown: false,
            crop_padding: 0,
            debounce_capacity: 256,
            greetings: GreetingTemplates::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub frames_processed: u64,
    pub faces_seen: u64,
    pub greetings_issued: u64,
    pub recognition_failures: u64,
    pub unknown_faces_saved: u64,
    pub unknown_save_failures: u64,
    pub debounce_clears: u64,
}

/// Logs the first error, then at most one summary per interval.
#[derive(Debug)]
struct LogLimiter {
    interval: Duration,
    last_logged: Option<DateTime<Utc>>,
    suppressed: u64,
}

impl LogLimiter {
    fn new(interval: Duration) -> Self {
        Self { interval, last_logged: None, suppressed: 0 }
    }

    /// Returns the number of suppressed events to report, or `None` to stay quiet.
    fn check(&mut self, now: DateTime<Utc>) -> Option<u64> {
        let due = match self.last_logged {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.interval,
        };
        if due {
            self.last_logged = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}

/// Per-tick greeting and unknown-face state machine.
///
/// Owns the enrolled identities, the per-name cooldown map and the per-box
/// debounce counters. Everything with side effects goes through the
/// `Recognizer`, `Notifier` and `UnknownFaceSink` seams.
pub struct RecognitionLoop {
    recognizer: Arc<dyn Recognizer>,
    notifier: Box<dyn Notifier>,
    store: Box<dyn UnknownFaceSink>,
    identities: IdentitySet,
    policy: LoopPolicy,
    cooldowns: GreetingCooldowns,
    debounce: UnknownDebounce,
    error_log: LogLimiter,
    stats: LoopStats,
}

impl RecognitionLoop {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        notifier: Box<dyn Notifier>,
        store: Box<dyn UnknownFaceSink>,
        identities: IdentitySet,
        policy: LoopPolicy,
    ) -> Self {
        Self {
            recognizer,
            notifier,
            store,
            identities,
            policy,
            cooldowns: GreetingCooldowns::new(),
            debounce: UnknownDebounce::new(),
            error_log: LogLimiter::new(Duration::seconds(ERROR_LOG_INTERVAL_SECS)),
            stats: LoopStats::default(),
        }
    }

    /// Processes one frame. Never fails: recognizer errors count as a frame
    /// without faces and store errors are logged.
    pub fn tick(&mut self, frame: &DynamicImage, now: DateTime<Utc>) -> Vec<FaceOutcome> {
        self.stats.frames_processed += 1;

        let faces = match self.recognizer.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                self.stats.recognition_failures += 1;
                if let Some(suppressed) = self.error_log.check(now) {
                    if suppressed > 0 {
                        tracing::warn!("Recognition failed: {} ({} similar errors suppressed)", e, suppressed);
                    } else {
                        tracing::warn!("Recognition failed: {}", e);
                    }
                }
                Vec::new()
            }
        };

        self.stats.faces_seen += faces.len() as u64;
        let mut outcomes = Vec::with_capacity(faces.len());
        for face in faces {
            let outcome = match self.identify(&face.embedding) {
                Some(m) => self.handle_known(&face, m, now),
                None => self.handle_unknown(&face, frame, now),
            };
            outcomes.push(outcome);
        }

        if self.debounce.clear_if_over(self.policy.debounce_capacity) {
            self.stats.debounce_clears += 1;
            tracing::debug!("Cleared unknown-face counters (over {} boxes)", self.policy.debounce_capacity);
        }

        outcomes
    }

    /// Best identity within tolerance for an embedding.
    pub fn identify(&self, embedding: &[f32]) -> Option<IdentityMatch> {
        let recognizer = &self.recognizer;
        self.identities
            .best_match(embedding, self.policy.tolerance, |a, b| recognizer.distance(a, b))
    }

    fn handle_known(&mut self, face: &DetectedFace, m: IdentityMatch, now: DateTime<Utc>) -> FaceOutcome {
        let mut greeting = None;

        if self.cooldowns.should_greet(&m.name, now, self.policy.cooldown) {
            self.cooldowns.record(&m.name, now);
            let text = self.policy.greetings.render(&m.name);
            tracing::info!("Recognized {} (distance {:.3}): {}", m.name, m.distance, text);
            if self.policy.voice_enabled {
                self.notifier.greet(&text);
            }
            self.stats.greetings_issued += 1;
            greeting = Some(text);
        } else {
            tracing::trace!("{} still in cooldown", m.name);
        }

        FaceOutcome {
            bbox: face.bbox,
            label: FaceLabel::Known(m.name),
            distance: Some(m.distance),
            greeting,
            saved_unknown: None,
        }
    }

    fn handle_unknown(&mut self, face: &DetectedFace, frame: &DynamicImage, now: DateTime<Utc>) -> FaceOutcome {
        let count = self.debounce.observe(face.bbox);
        let mut saved_unknown = None;

        if self.policy.auto_save_unknown
            && UnknownDebounce::reached(count, self.policy.unknown_face_threshold)
        {
            let region = face.bbox.padded(self.policy.crop_padding, frame.width(), frame.height());
            let crop = frame.crop_imm(region.left, region.top, region.width(), region.height());

            match self.store.save_unknown(&crop, face.bbox, now) {
                Ok(id) => {
                    tracing::info!("Saved unknown face {} at {}", id, face.bbox);
                    self.stats.unknown_faces_saved += 1;
                    if self.policy.announce_unknown && self.policy.voice_enabled {
                        self.notifier.greet(UNKNOWN_ANNOUNCEMENT);
                    }
                    saved_unknown = Some(id);
                }
                Err(e) => {
                    self.stats.unknown_save_failures += 1;
                    tracing::error!("Failed to save unknown face at {}: {}", face.bbox, e);
                }
            }

            // Suppressed whether or not the save went through.
            self.debounce.suppress(face.bbox);
        }

        FaceOutcome {
            bbox: face.bbox,
            label: FaceLabel::Unknown,
            distance: None,
            greeting: None,
            saved_unknown,
        }
    }

    /// Swaps in a freshly built identity set and policy in one step.
    /// Cooldown and debounce state survive.
    pub fn apply_reload(&mut self, identities: IdentitySet, policy: LoopPolicy) {
        tracing::info!("Reloaded {} known faces", identities.len());
        self.identities = identities;
        self.policy = policy;
    }

    pub fn replace_identities(&mut self, identities: IdentitySet) {
        self.identities = identities;
    }

    pub fn set_voice_enabled(&mut self, enabled: bool) {
        self.policy.voice_enabled = enabled;
    }

    pub fn voice_enabled(&self) -> bool {
        self.policy.voice_enabled
    }

    pub fn policy(&self) -> &LoopPolicy {
        &self.policy
    }

    pub fn identities(&self) -> &IdentitySet {
        &self.identities
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn cooldowns(&self) -> &GreetingCooldowns {
        &self.cooldowns
    }

    pub fn debounce(&self) -> &UnknownDebounce {
        &self.debounce
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::GreeterError;
    use crate::core::debounce::SAVED_SENTINEL;
    use crate::core::matching::euclidean_distance;
    use crate::core::types::EnrolledIdentity;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Mutex;

    /// Replays scripted detection results, one entry per `detect` call.
    /// When the script runs out the last entry repeats.
    pub(crate) struct ScriptedRecognizer {
        script: Mutex<VecDeque<Result<Vec<DetectedFace>>>>,
        last: Mutex<Vec<DetectedFace>>,
    }

    impl ScriptedRecognizer {
        pub(crate) fn new(script: Vec<Result<Vec<DetectedFace>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn always(faces: Vec<DetectedFace>) -> Self {
            Self::new(vec![Ok(faces)])
        }
    }

    impl Recognizer for ScriptedRecognizer {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<DetectedFace>> {
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(Ok(faces)) => {
                    *self.last.lock().unwrap() = faces.clone();
                    Ok(faces)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }

        fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
            euclidean_distance(a, b)
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) spoken: Rc<RefCell<Vec<String>>>,
    }

    impl Notifier for RecordingNotifier {
        fn greet(&self, text: &str) {
            self.spoken.borrow_mut().push(text.to_string());
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct MemorySink {
        pub(crate) saved: Rc<RefCell<Vec<(BoundingBox, u32, u32)>>>,
        pub(crate) attempts: Rc<RefCell<u32>>,
        pub(crate) fail: bool,
    }

    impl UnknownFaceSink for MemorySink {
        fn save_unknown(&mut self, crop: &DynamicImage, bbox: BoundingBox, _timestamp: DateTime<Utc>) -> Result<String> {
            *self.attempts.borrow_mut() += 1;
            if self.fail {
                return Err(GreeterError::Storage("disk full".into()));
            }
            let mut saved = self.saved.borrow_mut();
            saved.push((bbox, crop.width(), crop.height()));
            Ok(format!("id{}", saved.len()))
        }
    }

    pub(crate) fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub(crate) fn face(bbox: BoundingBox, embedding: &[f32]) -> DetectedFace {
        DetectedFace { bbox, embedding: embedding.to_vec() }
    }

    fn alice_set() -> IdentitySet {
        IdentitySet::new(vec![EnrolledIdentity { name: "Alice".into(), embedding: vec![0.0, 0.0] }])
    }

    fn frame() -> DynamicImage {
        DynamicImage::new_rgb8(200, 200)
    }

    fn stranger_box() -> BoundingBox {
        BoundingBox::new(10, 60, 60, 10)
    }

    struct Harness {
        recognition: RecognitionLoop,
        spoken: Rc<RefCell<Vec<String>>>,
        sink: MemorySink,
    }

    fn harness(recognizer: ScriptedRecognizer, identities: IdentitySet, policy: LoopPolicy, fail_saves: bool) -> Harness {
        let notifier = RecordingNotifier::default();
        let spoken = notifier.spoken.clone();
        let sink = MemorySink { fail: fail_saves, ..Default::default() };
        let recognition = RecognitionLoop::new(
            Arc::new(recognizer),
            Box::new(notifier),
            Box::new(sink.clone()),
            identities,
            policy,
        );
        Harness { recognition, spoken, sink }
    }

    #[test]
    fn alice_is_greeted_again_only_after_cooldown() {
        let alice = face(BoundingBox::new(10, 60, 60, 10), &[0.3, 0.0]);
        let mut h = harness(ScriptedRecognizer::always(vec![alice]), alice_set(), LoopPolicy::default(), false);

        let first = h.recognition.tick(&frame(), at(0));
        assert_eq!(first[0].label, FaceLabel::Known("Alice".into()));
        assert_eq!(first[0].greeting.as_deref(), Some("Hello Alice!"));

        let second = h.recognition.tick(&frame(), at(10));
        assert_eq!(second[0].greeting, None);

        let third = h.recognition.tick(&frame(), at(31));
        assert_eq!(third[0].greeting.as_deref(), Some("Hello Alice!"));

        assert_eq!(*h.spoken.borrow(), vec!["Hello Alice!", "Hello Alice!"]);
        assert_eq!(h.recognition.stats().greetings_issued, 2);
    }

    #[test]
    fn unknown_face_is_saved_on_the_threshold_tick() {
        let stranger = face(stranger_box(), &[5.0, 5.0]);
        let mut h = harness(ScriptedRecognizer::always(vec![stranger]), alice_set(), LoopPolicy::default(), false);

        for t in 0..9 {
            let outcomes = h.recognition.tick(&frame(), at(t));
            assert_eq!(outcomes[0].label, FaceLabel::Unknown);
            assert_eq!(outcomes[0].saved_unknown, None);
        }
        assert!(h.sink.saved.borrow().is_empty());

        let tenth = h.recognition.tick(&frame(), at(9));
        assert_eq!(tenth[0].saved_unknown.as_deref(), Some("id1"));
        assert_eq!(h.sink.saved.borrow().len(), 1);
        assert_eq!(h.recognition.debounce().count(&stranger_box()), Some(SAVED_SENTINEL));
    }

    #[test]
    fn lingering_stranger_is_saved_exactly_once() {
        let stranger = face(stranger_box(), &[5.0, 5.0]);
        let mut h = harness(ScriptedRecognizer::always(vec![stranger]), alice_set(), LoopPolicy::default(), false);

        for t in 0..20 {
            h.recognition.tick(&frame(), at(t));
        }
        assert_eq!(h.sink.saved.borrow().len(), 1);
        assert!(h.spoken.borrow().is_empty());
    }

    #[test]
    fn closer_identity_wins_over_enrollment_order() {
        // Bob comes first and passes tolerance; a first-match resolver would pick him.
        let identities = IdentitySet::new(vec![
            EnrolledIdentity { name: "Bob".into(), embedding: vec![0.5, 0.0] },
            EnrolledIdentity { name: "Carol".into(), embedding: vec![0.1, 0.0] },
        ]);
        let visitor = face(BoundingBox::new(0, 50, 50, 0), &[0.0, 0.0]);
        let mut h = harness(ScriptedRecognizer::always(vec![visitor]), identities, LoopPolicy::default(), false);

        let outcomes = h.recognition.tick(&frame(), at(0));
        assert_eq!(outcomes[0].label, FaceLabel::Known("Carol".into()));
        assert_eq!(*h.spoken.borrow(), vec!["Hello Carol!"]);
    }

    #[test]
    fn reloading_the_same_identities_keeps_cooldowns() {
        let alice = face(BoundingBox::new(10, 60, 60, 10), &[0.1, 0.0]);
        let mut h = harness(ScriptedRecognizer::always(vec![alice]), alice_set(), LoopPolicy::default(), false);

        h.recognition.tick(&frame(), at(0));
        h.recognition.apply_reload(alice_set(), LoopPolicy::default());
        let after = h.recognition.tick(&frame(), at(10));

        assert_eq!(after[0].label, FaceLabel::Known("Alice".into()));
        assert_eq!(after[0].greeting, None);
        assert_eq!(h.spoken.borrow().len(), 1);
        assert_eq!(h.recognition.identities().len(), 1);
    }

    #[test]
    fn recognizer_error_counts_as_a_frame_without_faces() {
        let stranger = face(stranger_box(), &[5.0, 5.0]);
        let recognizer = ScriptedRecognizer::new(vec![
            Ok(vec![stranger.clone()]),
            Err(GreeterError::Model("inference failed".into())),
            Ok(vec![stranger]),
        ]);
        let mut h = harness(recognizer, alice_set(), LoopPolicy::default(), false);

        h.recognition.tick(&frame(), at(0));
        assert!(h.recognition.tick(&frame(), at(1)).is_empty());
        h.recognition.tick(&frame(), at(2));

        assert_eq!(h.recognition.stats().recognition_failures, 1);
        assert_eq!(h.recognition.stats().frames_processed, 3);
        // Counters are untouched by the failed frame.
        assert_eq!(h.recognition.debounce().count(&stranger_box()), Some(2));
    }

    #[test]
    fn failed_save_still_suppresses_the_counter() {
        let stranger = face(stranger_box(), &[5.0, 5.0]);
        let mut h = harness(ScriptedRecognizer::always(vec![stranger]), alice_set(), LoopPolicy::default(), true);

        for t in 0..15 {
            h.recognition.tick(&frame(), at(t));
        }
        assert_eq!(*h.sink.attempts.borrow(), 1);
        assert_eq!(h.recognition.stats().unknown_save_failures, 1);
        assert_eq!(h.recognition.debounce().count(&stranger_box()), Some(SAVED_SENTINEL + 5));
    }

    #[test]
    fn custom_template_is_used_for_its_name_only() {
        let identities = IdentitySet::new(vec![
            EnrolledIdentity { name: "Alice".into(), embedding: vec![0.0, 0.0] },
            EnrolledIdentity { name: "Bob".into(), embedding: vec![3.0, 3.0] },
        ]);
        let mut custom = HashMap::new();
        custom.insert("Alice".to_string(), "Welcome back, {name}".to_string());
        let policy = LoopPolicy {
            greetings: GreetingTemplates::new("Hello {name}!", custom),
            ..LoopPolicy::default()
        };
        let faces = vec![
            face(BoundingBox::new(0, 50, 50, 0), &[0.0, 0.0]),
            face(BoundingBox::new(0, 150, 50, 100), &[3.0, 3.0]),
        ];
        let mut h = harness(ScriptedRecognizer::always(faces), identities, policy, false);

        h.recognition.tick(&frame(), at(0));
        assert_eq!(*h.spoken.borrow(), vec!["Welcome back, Alice", "Hello Bob!"]);
    }

    #[test]
    fn muted_voice_still_records_greeting() {
        let alice = face(BoundingBox::new(10, 60, 60, 10), &[0.0, 0.0]);
        let policy = LoopPolicy { voice_enabled: false, ..LoopPolicy::default() };
        let mut h = harness(ScriptedRecognizer::always(vec![alice]), alice_set(), policy, false);

        let outcomes = h.recognition.tick(&frame(), at(0));
        assert_eq!(outcomes[0].greeting.as_deref(), Some("Hello Alice!"));
        assert!(h.spoken.borrow().is_empty());
        assert!(h.recognition.cooldowns().last_greeted("Alice").is_some());
    }

    #[test]
    fn announce_unknown_speaks_after_save() {
        let stranger = face(stranger_box(), &[5.0, 5.0]);
        let policy = LoopPolicy {
            unknown_face_threshold: 1,
            announce_unknown: true,
            ..LoopPolicy::default()
        };
        let mut h = harness(ScriptedRecognizer::always(vec![stranger]), alice_set(), policy, false);

        h.recognition.tick(&frame(), at(0));
        assert_eq!(*h.spoken.borrow(), vec![UNKNOWN_ANNOUNCEMENT]);
    }

    #[test]
    fn auto_save_off_never_touches_the_store() {
        let stranger = face(stranger_box(), &[5.0, 5.0]);
        let policy = LoopPolicy { auto_save_unknown: false, ..LoopPolicy::default() };
        let mut h = harness(ScriptedRecognizer::always(vec![stranger]), alice_set(), policy, false);

        for t in 0..30 {
            h.recognition.tick(&frame(), at(t));
        }
        assert_eq!(*h.sink.attempts.borrow(), 0);
    }

    #[test]
    fn crop_is_padded_and_clamped() {
        let stranger = face(BoundingBox::new(10, 60, 60, 10), &[5.0, 5.0]);
        let policy = LoopPolicy {
            unknown_face_threshold: 1,
            crop_padding: 20,
            ..LoopPolicy::default()
        };
        let mut h = harness(ScriptedRecognizer::always(vec![stranger]), alice_set(), policy, false);

        h.recognition.tick(&frame(), at(0));
        assert_eq!(h.sink.saved.borrow()[0], (BoundingBox::new(10, 60, 60, 10), 80, 80));
    }

    #[test]
    fn debounce_map_is_cleared_past_capacity() {
        let faces: Vec<DetectedFace> = (0..3)
            .map(|n| face(BoundingBox::new(n, n + 20, n + 20, n), &[5.0, 5.0]))
            .collect();
        let policy = LoopPolicy { debounce_capacity: 2, ..LoopPolicy::default() };
        let mut h = harness(ScriptedRecognizer::always(faces), alice_set(), policy, false);

        h.recognition.tick(&frame(), at(0));
        assert!(h.recognition.debounce().is_empty());
        assert_eq!(h.recognition.stats().debounce_clears, 1);
    }

    #[test]
    fn label_display() {
        assert_eq!(FaceLabel::Known("Alice".into()).to_string(), "Alice");
        assert_eq!(FaceLabel::Unknown.to_string(), "unknown");
    }

    #[test]
    fn policy_from_config_copies_greeting_settings() {
        let config = Config::from_toml_str(
            r#"
            [models]
            detector_path = "d.onnx"
            recognizer_path = "r.onnx"
            [storage]
            base_dir = "data"
            known_faces_dir = "data/known"
            unknown_faces_dir = "data/unknown"
            [greeting]
            cooldown_seconds = 5
            voice_enabled = false
            "#,
        )
        .unwrap();
        let policy = LoopPolicy::from_config(&config);
        assert_eq!(policy.cooldown, Duration::seconds(5));
        assert!(!policy.voice_enabled);
        assert_eq!(policy.greetings.render("Dana"), "Hello Dana!");
    }

    #[test]
    fn error_limiter_reports_suppressed_count() {
        let mut limiter = LogLimiter::new(Duration::seconds(30));
        assert_eq!(limiter.check(at(0)), Some(0));
        assert_eq!(limiter.check(at(1)), None);
        assert_eq!(limiter.check(at(2)), None);
        assert_eq!(limiter.check(at(31)), Some(2));
    }
}
