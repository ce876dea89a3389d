//! Axis-aligned box geometry.

use serde::{Deserialize, Serialize};

/// Pixel-space box as `(x1, y1, x2, y2)`.
///
/// Boxes are not validated on construction. A box with `x2 <= x1` or
/// `y2 <= y1` is degenerate and overlaps nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x2 > self.x1 && self.y2 > self.y1)
    }

    pub fn area(&self) -> f32 {
        if self.is_degenerate() {
            return 0.0;
        }
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        iou(self, other)
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Intersection-over-union of two boxes, always in `[0, 1]`.
pub fn iou(a: &BBox, b: &BBox) -> f32 {
    if a.is_degenerate() || b.is_degenerate() {
        return 0.0;
    }

    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;
    // NaN coordinates fall through both comparisons.
    if !(union > 0.0) {
        return 0.0;
    }

    let ratio = inter / union;
    if ratio.is_nan() {
        return 0.0;
    }
    ratio.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_boxes_overlap_fully() {
        let a = BBox::new(10.0, 10.0, 50.0, 80.0);
        assert_eq!(iou(&a, &a), 1.0);
    }

    #[test]
    fn iou_is_symmetric() {
        let pairs = [
            (BBox::new(0.0, 0.0, 10.0, 10.0), BBox::new(5.0, 5.0, 15.0, 15.0)),
            (BBox::new(0.0, 0.0, 4.0, 4.0), BBox::new(1.0, 1.0, 2.0, 2.0)),
            (BBox::new(0.0, 0.0, 1.0, 1.0), BBox::new(3.0, 3.0, 4.0, 4.0)),
            (BBox::new(0.0, 0.0, 0.0, 9.0), BBox::new(0.0, 0.0, 9.0, 9.0)),
        ];
        for (a, b) in pairs {
            let ab = iou(&a, &b);
            assert_eq!(ab, iou(&b, &a));
            assert!((0.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn partial_overlap_ratio() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        // inter 50, union 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_boxes_have_zero_overlap() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn degenerate_boxes_yield_zero() {
        let good = BBox::new(0.0, 0.0, 10.0, 10.0);
        let inverted = BBox::new(10.0, 10.0, 0.0, 0.0);
        let flat = BBox::new(0.0, 5.0, 10.0, 5.0);
        assert_eq!(iou(&good, &inverted), 0.0);
        assert_eq!(iou(&flat, &good), 0.0);
        assert_eq!(iou(&flat, &flat), 0.0);
    }

    #[test]
    fn nan_coordinates_do_not_escape_range() {
        let nan = BBox::new(f32::NAN, 0.0, 10.0, 10.0);
        let good = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(iou(&nan, &good), 0.0);
    }

    #[test]
    fn bbox_serializes_as_array() {
        let b = BBox::new(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");
        let back: BBox = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
