use thiserror::Error;

#[derive(Error, Debug)]
pub enum GreeterError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    /// A finite frame source has nothing left to play.
    #[error("Frame source exhausted")]
    SourceExhausted,

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Known face not found: {0}")]
    IdentityNotFound(String),

    #[error("Unknown face not found: {0}")]
    UnknownFaceNotFound(String),

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Expected exactly one face, found {0}")]
    MultipleFaces(usize),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Image rejected: {0}")]
    ImageRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GreeterError>;
