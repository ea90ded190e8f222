use crate::core::recognition_loop::{FaceLabel, FaceOutcome};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Frame copy with a box per face: green for known, red for unknown.
pub fn annotate(frame: &DynamicImage, outcomes: &[FaceOutcome]) -> RgbImage {
    let mut img = frame.to_rgb8();

    for outcome in outcomes {
        let (width, height) = (outcome.bbox.width(), outcome.bbox.height());
        if width == 0 || height == 0 {
            continue;
        }
        let color = match outcome.label {
            FaceLabel::Known(_) => KNOWN_COLOR,
            FaceLabel::Unknown => UNKNOWN_COLOR,
        };
        let rect = Rect::at(outcome.bbox.left as i32, outcome.bbox.top as i32).of_size(width, height);
        draw_hollow_rect_mut(&mut img, rect, color);
    }

    img
}
