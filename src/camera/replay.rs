use crate::camera::FrameSource;
use crate::common::{GreeterError, Result};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Plays back still images from a directory in file name order.
pub struct ImageDirSource {
    frames: Vec<PathBuf>,
    position: usize,
    looping: bool,
}

impl ImageDirSource {
    pub fn new(dir: &Path, looping: bool) -> Result<Self> {
        let mut frames = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                frames.push(path);
            }
        }

        if frames.is_empty() {
            return Err(GreeterError::Camera(format!("No images found in {}", dir.display())));
        }
        frames.sort();
        tracing::info!("Replaying {} images from {}", frames.len(), dir.display());

        Ok(Self { frames, position: 0, looping })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        if self.position >= self.frames.len() {
            if !self.looping {
                return Err(GreeterError::SourceExhausted);
            }
            self.position = 0;
        }

        let path = &self.frames[self.position];
        self.position += 1;
        Ok(image::open(path)?)
    }
}
