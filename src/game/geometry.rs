//! Geometry primitives
//!
//! Integer tile-space vectors and half-open rectangles used for
//! bounding boxes, region bounds and viewports.

use serde::{Deserialize, Serialize};

/// A point in tile space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: i32,
    pub y: i32,
}

impl Vector2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, other: Vector2) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

/// An axis-aligned rectangle; `right` and `bottom` are exclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Build from inclusive corner coordinates.
    ///
    /// Spans wider than `i32::MAX` saturate.
    pub fn from_corners(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::new(left, top, span(left, right), span(top, bottom))
    }

    /// Saturates at `i32::MAX`
    #[inline]
    pub fn right(&self) -> i32 {
        self.left.saturating_add(self.width)
    }

    /// Saturates at `i32::MAX`
    #[inline]
    pub fn bottom(&self) -> i32 {
        self.top.saturating_add(self.height)
    }

    pub fn top_left(&self) -> Vector2 {
        Vector2::new(self.left, self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.left < other.right()
            && self.right() > other.left
            && self.top < other.bottom()
            && self.bottom() > other.top
    }

    pub fn contains(&self, other: &Rectangle) -> bool {
        self.left <= other.left
            && self.right() >= other.right()
            && self.top <= other.top
            && self.bottom() >= other.bottom()
    }

    pub fn contains_point(&self, point: Vector2) -> bool {
        point.x >= self.left && point.x < self.right() && point.y >= self.top && point.y < self.bottom()
    }

    pub fn offset(&self, by: Vector2) -> Self {
        Self::new(self.left + by.x, self.top + by.y, self.width, self.height)
    }

    /// Clip to another rectangle; `None` when they do not overlap
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (left < right && top < bottom).then(|| Rectangle::new(left, top, right - left, bottom - top))
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }
}

/// Length of the inclusive range `[low, high]`, clamped to `i32`
fn span(low: i32, high: i32) -> i32 {
    (i64::from(high) - i64::from(low) + 1).clamp(0, i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_are_exclusive() {
        let a = Rectangle::new(0, 0, 16, 16);
        let b = Rectangle::new(16, 0, 16, 16);
        assert!(!a.intersects(&b));
        assert!(!b.intersects(&a));

        let c = Rectangle::new(15, 15, 2, 2);
        assert!(a.intersects(&c));
        assert!(b.intersects(&c));
    }

    #[test]
    fn test_from_corners_is_inclusive() {
        let r = Rectangle::from_corners(0, 0, 1, 1);
        assert_eq!(r, Rectangle::new(0, 0, 2, 2));
        assert_eq!(r.area(), 4);
    }

    #[test]
    fn test_contains() {
        let outer = Rectangle::new(0, 0, 10, 10);
        assert!(outer.contains(&Rectangle::new(2, 2, 3, 3)));
        assert!(!outer.contains(&Rectangle::new(8, 8, 3, 3)));
        assert!(outer.contains_point(Vector2::new(9, 9)));
        assert!(!outer.contains_point(Vector2::new(10, 0)));
    }

    #[test]
    fn test_intersection() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(5, -5, 10, 10);
        assert_eq!(a.intersection(&b), Some(Rectangle::new(5, 0, 5, 5)));
        assert_eq!(a.intersection(&Rectangle::new(20, 20, 1, 1)), None);
    }

    #[test]
    fn test_extreme_corners_saturate() {
        let wide = Rectangle::from_corners(0, 0, i32::MAX, 0);
        assert_eq!(wide.width, i32::MAX);
        assert_eq!(wide.right(), i32::MAX);

        let edge = Rectangle::from_corners(i32::MAX, 0, i32::MAX, 0);
        assert_eq!(edge, Rectangle::new(i32::MAX, 0, 1, 1));
        assert_eq!(edge.right(), i32::MAX);
        assert_eq!(edge.intersection(&Rectangle::new(0, 0, 3, 3)), None);

        let full = Rectangle::from_corners(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(full.width, i32::MAX);
        assert!(full.intersects(&Rectangle::new(0, 0, 1, 1)));
    }

    #[test]
    fn test_offset() {
        let bbox = Rectangle::new(0, 0, 1, 1);
        assert_eq!(bbox.offset(Vector2::new(4, 7)), Rectangle::new(4, 7, 1, 1));
    }
}
