pub mod replay;
pub mod v4l2;

use crate::common::Result;
use image::DynamicImage;

/// Anything that produces frames for the recognition loop.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<DynamicImage>;
}

pub use replay::ImageDirSource;
pub use v4l2::{CameraInfo, V4lCamera};
