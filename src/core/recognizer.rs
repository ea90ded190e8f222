use crate::common::{GreeterError, Result, Config};
use crate::core::detector::{build_session, resolve_model_path, FaceBox, FaceDetector};
use crate::core::matching::DistanceMetric;
use crate::core::types::{DetectedFace, Embedding};
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

/// Face detection plus embedding extraction, and the distance used to
/// compare embeddings. Lower distance means more similar.
pub trait Recognizer {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>>;

    fn distance(&self, a: &[f32], b: &[f32]) -> f32;
}

pub struct FaceEmbedder {
    session: Session,
    _environment: Arc<Environment>,
    input_size: u32,
    normalization_value: f32,
    channels: u32,
}

impl FaceEmbedder {
    pub fn new_with_model_path(
        config: &Config,
        environment: Arc<Environment>,
        models_base: &Path,
    ) -> Result<Self> {
        let model_path = resolve_model_path(&config.models.recognizer_path, models_base);
        let session = build_session(&environment, &model_path, config.performance.optimization_level)?;
        tracing::info!("Loaded embedding model from {}", model_path.display());

        Ok(Self {
            session,
            _environment: environment,
            input_size: config.recognizer.input_size,
            normalization_value: config.recognizer.normalization_value,
            channels: config.recognizer.channels,
        })
    }

    pub fn embed(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let face_img = crop_face(image, face);
        let resized = face_img.resize_exact(self.input_size, self.input_size, FilterType::Triangle);

        let input_array = self.preprocess_face(&resized);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let first = outputs.first()
            .ok_or_else(|| GreeterError::Model("Embedding model produced no outputs".into()))?;
        let mut embedding: Embedding = first.try_extract::<f32>()?.view().iter().copied().collect();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        let size = self.input_size as usize;
        let norm = self.normalization_value;
        let mut array = Array4::<f32>::zeros((1, self.channels as usize, size, size));

        if self.channels == 1 {
            let gray = img.to_luma8();
            for (x, y, pixel) in gray.enumerate_pixels() {
                array[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - norm) / norm;
            }
        } else {
            let rgb = img.to_rgb8();
            for (x, y, pixel) in rgb.enumerate_pixels() {
                for c in 0..3 {
                    array[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - norm) / norm;
                }
            }
        }

        array
    }
}

fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let x = face.x1.max(0.0) as u32;
    let y = face.y1.max(0.0) as u32;
    let width = (face.x2 - face.x1).max(1.0) as u32;
    let height = (face.y2 - face.y1).max(1.0) as u32;

    image.crop_imm(x, y, width, height)
}

/// Scales to unit length so distance tolerances are model independent.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

/// ONNX detector and embedder behind the `Recognizer` seam.
pub struct OnnxRecognizer {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    metric: DistanceMetric,
    model_tag: String,
}

impl OnnxRecognizer {
    pub fn new_with_model_path(config: &Config, models_base: &Path) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("facegreeter")
                .build()
                .map_err(|e| GreeterError::Model(format!("Failed to create environment: {}", e)))?
        );

        let detector = FaceDetector::new_with_model_path(config, environment.clone(), models_base)?;
        let embedder = FaceEmbedder::new_with_model_path(config, environment, models_base)?;

        let model_tag = format!(
            "{}:{}:{}",
            config.models.recognizer_path.display(),
            config.recognizer.input_size,
            config.recognizer.channels
        );

        Ok(Self {
            detector,
            embedder,
            metric: config.recognition.metric,
            model_tag,
        })
    }

    /// Identifies the embedding model; cached embeddings from another model are discarded.
    pub fn model_tag(&self) -> &str {
        &self.model_tag
    }
}

impl Recognizer for OnnxRecognizer {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let faces = self.detector.detect(image)?;
        let mut detected = Vec::with_capacity(faces.len());

        for face in &faces {
            let embedding = self.embedder.embed(image, face)?;
            detected.push(DetectedFace {
                bbox: face.to_bounding_box(image.width(), image.height()),
                embedding,
            });
        }

        Ok(detected)
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.metric.distance(a, b)
    }
}
