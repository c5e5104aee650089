//! Integer image rectangles and formats.
//!
//! Boxes are half-open: a box covers columns `x..r` and rows `y..t`.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Half-open pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Box2D {
    pub x: i32,
    pub y: i32,
    pub r: i32,
    pub t: i32,
}

impl Box2D {
    pub const fn new(x: i32, y: i32, r: i32, t: i32) -> Self {
        Self { x, y, r, t }
    }

    /// Box anchored at the origin.
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> i32 {
        (self.r - self.x).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.t - self.y).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.r <= self.x || self.t <= self.y
    }

    pub fn contains_row(&self, y: i32) -> bool {
        y >= self.y && y < self.t
    }

    /// Overlap of two boxes; empty boxes collapse to the default box.
    pub fn intersect(&self, other: &Box2D) -> Box2D {
        let b = Box2D::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.r.min(other.r),
            self.t.min(other.t),
        );
        if b.is_empty() { Box2D::default() } else { b }
    }

    /// Bounding box of both. An empty side is ignored.
    pub fn merge(&self, other: &Box2D) -> Box2D {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Box2D::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.r.max(other.r),
            self.t.max(other.t),
        )
    }
}

/// Nominal image format: display bounds plus pixel aspect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Format {
    pub bounds: Box2D,
    pub pixel_aspect: f32,
}

impl Format {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            bounds: Box2D::from_size(width, height),
            pixel_aspect: 1.0,
        }
    }

    pub fn width(&self) -> i32 {
        self.bounds.width()
    }

    pub fn height(&self) -> i32 {
        self.bounds.height()
    }

    /// Bottom row (inclusive).
    pub fn y(&self) -> i32 {
        self.bounds.y
    }

    /// One past the top row.
    pub fn top(&self) -> i32 {
        self.bounds.t
    }
}

impl Default for Format {
    fn default() -> Self {
        Self {
            bounds: Box2D::default(),
            pixel_aspect: 1.0,
        }
    }
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.bounds == other.bounds && self.pixel_aspect.to_bits() == other.pixel_aspect.to_bits()
    }
}

impl Eq for Format {}

impl Hash for Format {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bounds.hash(state);
        self.pixel_aspect.to_bits().hash(state);
    }
}
