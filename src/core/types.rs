use serde::{Deserialize, Serialize};
use std::fmt;

pub type Embedding = Vec<f32>;

/// Face location in frame pixels, in top/right/bottom/left order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Grows the box by `padding` on every side, clamped to the frame.
    pub fn padded(&self, padding: u32, frame_width: u32, frame_height: u32) -> Self {
        Self {
            top: self.top.saturating_sub(padding),
            right: self.right.saturating_add(padding).min(frame_width),
            bottom: self.bottom.saturating_add(padding).min(frame_height),
            left: self.left.saturating_sub(padding),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.top, self.right, self.bottom, self.left)
    }
}

/// One face found in the current frame. Never persisted directly.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A known person: unique display name plus the embedding of their reference photo.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledIdentity {
    pub name: String,
    pub embedding: Embedding,
}
