use crate::common::{GreeterError, Result, Config};
use crate::common::config::DetectorConfig;
use crate::core::types::BoundingBox;
use ort::{Environment, Session, SessionBuilder, Value, GraphOptimizationLevel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

// Anything below this is treated as background before NMS.
const MIN_RAW_CONFIDENCE: f32 = 0.001;
const MIN_BOX_SIZE: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn to_bounding_box(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let clamp = |v: f32, max: u32| (v.max(0.0).round() as u32).min(max);
        BoundingBox {
            top: clamp(self.y1, frame_height),
            right: clamp(self.x2, frame_width),
            bottom: clamp(self.y2, frame_height),
            left: clamp(self.x1, frame_width),
        }
    }
}

pub(crate) fn resolve_model_path(path: &Path, models_base: &Path) -> PathBuf {
    if path.is_relative() {
        models_base.join(path)
    } else {
        path.to_path_buf()
    }
}

pub(crate) fn build_session(
    environment: &Arc<Environment>,
    model_path: &Path,
    optimization_level: u32,
) -> Result<Session> {
    if !model_path.exists() {
        return Err(GreeterError::Model(
            format!("Model not found at: {:?}", model_path)
        ));
    }

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    let session = SessionBuilder::new(environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;
    Ok(session)
}

pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn new_with_model_path(
        config: &Config,
        environment: Arc<Environment>,
        models_base: &Path,
    ) -> Result<Self> {
        let model_path = resolve_model_path(&config.models.detector_path, models_base);
        let session = build_session(&environment, &model_path, config.performance.optimization_level)?;
        tracing::info!("Loaded face detector from {}", model_path.display());

        Ok(Self {
            session,
            _environment: environment,
            config: config.detector.clone(),
        })
    }

    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.config.input_width
            && image.height() == self.config.input_height {
            image_to_array(image)
        } else {
            let resized = image.resize_exact(
                self.config.input_width,
                self.config.input_height,
                FilterType::Nearest
            );
            image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let first = outputs.first()
            .ok_or_else(|| GreeterError::Model("Detector produced no outputs".into()))?;
        let output = first.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let data: Vec<f32> = output.iter().copied().collect();

        let candidates = decode_predictions(
            &data,
            &shape,
            self.config.input_width as f32,
            self.config.input_height as f32,
        );

        // NMS first over the loose candidates, then the real confidence cut.
        let mut faces = apply_nms(candidates, self.config.nms_iou_threshold);
        faces.retain(|face| face.confidence >= self.config.confidence_threshold);
        faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        faces.truncate(self.config.max_faces);

        let scale_x = orig_width / self.config.input_width as f32;
        let scale_y = orig_height / self.config.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }
}

fn image_to_array(img: &DynamicImage) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let width = rgb.width() as usize;
    let height = rgb.height() as usize;
    let mut array = Array4::<f32>::zeros((1, 3, height, width));
    let norm_factor = 1.0 / 255.0;

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        array[[0, 0, y, x]] = pixel[0] as f32 * norm_factor;
        array[[0, 1, y, x]] = pixel[1] as f32 * norm_factor;
        array[[0, 2, y, x]] = pixel[2] as f32 * norm_factor;
    }

    array
}

/// Decodes YOLO-style output, either `[1, N, C]`, transposed `[1, C, N]`
/// or `[N, C]`, where each prediction is `[cx, cy, w, h, conf, ...]`.
/// Boxes come back in detector input coordinates.
pub fn decode_predictions(
    output: &[f32],
    shape: &[usize],
    input_width: f32,
    input_height: f32,
) -> Vec<FaceBox> {
    let (num_predictions, prediction_length, is_transposed) = match shape {
        [_, a, b] if b > a && *a <= 20 => (*b, *a, true),
        [_, a, b] => (*a, *b, false),
        [a, b] => (*a, *b, false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };

    if prediction_length < 4 || output.len() < num_predictions * prediction_length {
        tracing::warn!("Detector output too short for shape {:?}", shape);
        return Vec::new();
    }

    let at = |i: usize, k: usize| {
        if is_transposed {
            output[k * num_predictions + i]
        } else {
            output[i * prediction_length + k]
        }
    };

    let mut faces = Vec::new();
    for i in 0..num_predictions {
        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        let confidence = if prediction_length > 4 { at(i, 4) } else { 0.0 };

        if !(confidence > MIN_RAW_CONFIDENCE) {
            continue;
        }

        // Normalized coordinates get scaled to input pixels
        let (sx, sy) = if cx > 1.0 || cy > 1.0 || w > 1.0 || h > 1.0 {
            (1.0, 1.0)
        } else {
            (input_width, input_height)
        };
        let (cx, cy, w, h) = (cx * sx, cy * sy, w * sx, h * sy);

        let x1 = (cx - w / 2.0).max(0.0);
        let y1 = (cy - h / 2.0).max(0.0);
        let x2 = (cx + w / 2.0).min(input_width);
        let y2 = (cy + h / 2.0).min(input_height);

        if x2 - x1 > MIN_BOX_SIZE && y2 - y1 > MIN_BOX_SIZE {
            faces.push(FaceBox { x1, y1, x2, y2, confidence });
        }
    }

    faces
}

pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1.x2 - box1.x1) * (box1.y2 - box1.y1);
    let area2 = (box2.x2 - box2.x1) * (box2.y2 - box2.y1);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
