pub mod annotate;
pub mod cooldown;
pub mod debounce;
pub mod detector;
pub mod matching;
pub mod recognition_loop;
pub mod recognizer;
pub mod types;

pub use cooldown::GreetingCooldowns;
pub use debounce::UnknownDebounce;
pub use detector::{FaceDetector, FaceBox};
pub use matching::{DistanceMetric, IdentityMatch, IdentitySet};
pub use recognition_loop::{
    FaceLabel, FaceOutcome, LoopPolicy, LoopState, LoopStats, Notifier, RecognitionLoop,
    UnknownFaceSink,
};
pub use recognizer::{OnnxRecognizer, Recognizer};
pub use types::{BoundingBox, DetectedFace, Embedding, EnrolledIdentity};
