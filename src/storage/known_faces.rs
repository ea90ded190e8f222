use crate::common::{GreeterError, Result};
use crate::core::recognizer::Recognizer;
use crate::core::types::EnrolledIdentity;
use crate::storage::embedding_cache::EmbeddingCache;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

pub const KNOWN_FACE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Source of the enrolled identity set.
pub trait IdentityRepository {
    fn load_all(&mut self) -> Result<Vec<EnrolledIdentity>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownFace {
    pub name: String,
    pub path: PathBuf,
}

impl KnownFace {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Reference photos, one per person, named `<Name>.<ext>`.
pub struct KnownFaces {
    dir: PathBuf,
}

fn known_face_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    KNOWN_FACE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

impl KnownFaces {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> Result<Vec<KnownFace>> {
        let mut faces = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || known_face_extension(&path).is_none() {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                faces.push(KnownFace { name: name.to_string(), path: path.clone() });
            }
        }
        faces.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        Ok(faces)
    }

    pub fn find(&self, name: &str) -> Result<Option<KnownFace>> {
        Ok(self.list()?.into_iter().find(|f| f.name == name))
    }

    /// Copies `source` in as the reference photo for `name`.
    /// Returns the stored path.
    pub fn add(&self, name: &str, source: &Path) -> Result<PathBuf> {
        let name = sanitize_name(name)?;
        let ext = known_face_extension(source).ok_or_else(|| GreeterError::ImageRejected(format!(
            "{} is not a {} file", source.display(), KNOWN_FACE_EXTENSIONS.join("/")
        )))?;

        if self.find(&name)?.is_some() {
            return Err(GreeterError::InvalidName(format!("{} is already enrolled", name)));
        }

        let dest = self.dir.join(format!("{}.{}", name, ext));
        fs::copy(source, &dest)?;
        tracing::info!("Added known face {} from {}", name, source.display());
        Ok(dest)
    }

    pub fn remove(&self, name: &str) -> Result<PathBuf> {
        let face = self.find(name)?
            .ok_or_else(|| GreeterError::IdentityNotFound(name.to_string()))?;
        fs::remove_file(&face.path)?;
        tracing::info!("Removed known face {}", name);
        Ok(face.path)
    }
}

/// Keeps letters, digits, spaces, `-` and `_`, collapsing whitespace runs.
pub fn sanitize_name(raw: &str) -> Result<String> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    let name = kept.split_whitespace().collect::<Vec<_>>().join(" ");

    if name.is_empty() {
        return Err(GreeterError::InvalidName(raw.to_string()));
    }
    Ok(name)
}

/// Variance of the Laplacian; low values mean a blurry image.
pub fn laplacian_variance(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let laplacian = imageproc::filter::laplacian_filter(&gray);

    let count = laplacian.width() as f64 * laplacian.height() as f64;
    if count == 0.0 {
        return 0.0;
    }
    let mean = laplacian.pixels().map(|p| p[0] as f64).sum::<f64>() / count;
    laplacian
        .pixels()
        .map(|p| {
            let d = p[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count
}

/// Checks a candidate reference photo: it must decode, contain exactly one
/// face and be sharp enough.
pub fn validate_reference_image(
    recognizer: &dyn Recognizer,
    path: &Path,
    blur_threshold: f64,
) -> Result<DynamicImage> {
    let image = image::open(path)
        .map_err(|e| GreeterError::ImageRejected(format!("{}: {}", path.display(), e)))?;

    let faces = recognizer.detect(&image)?;
    match faces.len() {
        0 => return Err(GreeterError::NoFaceDetected),
        1 => {}
        n => return Err(GreeterError::MultipleFaces(n)),
    }

    let sharpness = laplacian_variance(&image);
    if sharpness < blur_threshold {
        return Err(GreeterError::ImageRejected(format!(
            "image too blurry (sharpness {:.1}, need {:.1})", sharpness, blur_threshold
        )));
    }

    Ok(image)
}

/// Known faces directory plus the recognizer that embeds each photo.
pub struct KnownFaceRepository {
    faces: KnownFaces,
    recognizer: Arc<dyn Recognizer>,
    cache: EmbeddingCache,
}

impl KnownFaceRepository {
    pub fn new(faces: KnownFaces, recognizer: Arc<dyn Recognizer>, cache: EmbeddingCache) -> Self {
        Self { faces, recognizer, cache }
    }

    fn embed(&mut self, face: &KnownFace) -> Result<Option<Vec<f32>>> {
        let metadata = fs::metadata(&face.path)?;
        let size = metadata.len();
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let file_name = face.file_name();

        if let Some(embedding) = self.cache.get(&file_name, size, modified) {
            return Ok(Some(embedding.clone()));
        }

        let image = image::open(&face.path)?;
        let detected = self.recognizer.detect(&image)?;
        if detected.len() > 1 {
            tracing::warn!("{} has {} faces, using the most confident", file_name, detected.len());
        }
        let Some(first) = detected.into_iter().next() else {
            return Ok(None);
        };

        self.cache.insert(&file_name, size, modified, first.embedding.clone());
        Ok(Some(first.embedding))
    }
}

impl IdentityRepository for KnownFaceRepository {
    fn load_all(&mut self) -> Result<Vec<EnrolledIdentity>> {
        let faces = self.faces.list()?;
        let mut identities = Vec::with_capacity(faces.len());

        for face in &faces {
            match self.embed(face) {
                Ok(Some(embedding)) => {
                    identities.push(EnrolledIdentity { name: face.name.clone(), embedding });
                }
                Ok(None) => tracing::warn!("No face found in {}, skipping", face.path.display()),
                Err(e) => tracing::warn!("Failed to load {}: {}", face.path.display(), e),
            }
        }

        let present: Vec<String> = faces.iter().map(KnownFace::file_name).collect();
        self.cache.retain(|name| present.iter().any(|p| p == name));
        if let Err(e) = self.cache.save() {
            tracing::warn!("Failed to save embedding cache: {}", e);
        }

        tracing::info!("Loaded {} known faces", identities.len());
        Ok(identities)
    }
}
