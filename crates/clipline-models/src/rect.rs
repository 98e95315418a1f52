//! Pixel rectangles for crop geometry.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle centered at `(cx, cy)`.
    pub fn centered_at(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Shift the rectangle so it lies fully inside a `frame_w`×`frame_h`
    /// frame. A rectangle larger than the frame is shrunk to fit.
    pub fn clamp_within(&self, frame_w: f64, frame_h: f64) -> Rect {
        let width = self.width.min(frame_w);
        let height = self.height.min(frame_h);
        let x = self.x.clamp(0.0, frame_w - width);
        let y = self.y.clamp(0.0, frame_h - height);
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Round position and size down to even integers, as libx264 requires.
    pub fn even_aligned(&self) -> (i64, i64, i64, i64) {
        let even = |v: f64| ((v.max(0.0) as i64) / 2) * 2;
        (even(self.x), even(self.y), even(self.width), even(self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_within_bounds() {
        let r = Rect::centered_at(10.0, 10.0, 100.0, 100.0);
        let clamped = r.clamp_within(1920.0, 1080.0);
        assert_eq!(clamped.x, 0.0);
        assert_eq!(clamped.y, 0.0);
        assert_eq!(clamped.width, 100.0);

        let r = Rect::centered_at(1900.0, 540.0, 200.0, 200.0);
        let clamped = r.clamp_within(1920.0, 1080.0);
        assert_eq!(clamped.x + clamped.width, 1920.0);
    }

    #[test]
    fn test_oversized_rect_shrinks() {
        let r = Rect::new(-10.0, -10.0, 4000.0, 4000.0);
        let clamped = r.clamp_within(1920.0, 1080.0);
        assert_eq!(clamped.width, 1920.0);
        assert_eq!(clamped.height, 1080.0);
        assert_eq!(clamped.x, 0.0);
    }

    #[test]
    fn test_even_alignment() {
        let r = Rect::new(3.7, 5.2, 101.9, 99.0);
        let (x, y, w, h) = r.even_aligned();
        assert_eq!((x, y, w, h), (2, 4, 100, 98));
    }
}
