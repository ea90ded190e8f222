// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod speech;
pub mod service;
pub mod common;

// Re-export commonly used types
pub use common::{Config, GreeterError, Result};
pub use crate::core::{
    BoundingBox, DetectedFace, Embedding, EnrolledIdentity, FaceLabel, FaceOutcome, IdentitySet,
    LoopPolicy, LoopState, Notifier, OnnxRecognizer, RecognitionLoop, Recognizer, UnknownFaceSink,
};
pub use camera::{FrameSource, ImageDirSource, V4lCamera};
pub use storage::{IdentityRepository, KnownFaceRepository, KnownFaces, UnknownFaceStore};
pub use speech::{SpeechNotifier, SpeechWorker};
pub use service::{ControlEvent, LoopRunner};
