//! Clip regions
//!
//! Drawing calls are clipped by nothing, by one rectangle (loaded into the
//! hardware scissor), or by a list of rectangles that the engines walk one
//! at a time.

use embedded_graphics_core::geometry::{Point, Size};
use embedded_graphics_core::primitives::Rectangle;

/// Device rectangle, right and bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn to_rectangle(&self) -> Rectangle {
        Rectangle::new(
            Point::new(self.left, self.top),
            Size::new(
                (self.right - self.left).max(0) as u32,
                (self.bottom - self.top).max(0) as u32,
            ),
        )
    }

    pub fn from_rectangle(r: &Rectangle) -> Self {
        Self {
            left: r.top_left.x,
            top: r.top_left.y,
            right: r.top_left.x + r.size.width as i32,
            bottom: r.top_left.y + r.size.height as i32,
        }
    }

    /// Overlap of two rectangles (empty if disjoint)
    pub fn intersect(&self, other: &Rect) -> Rect {
        if self.is_empty() || other.is_empty() {
            return Rect::default();
        }
        Rect::from_rectangle(&self.to_rectangle().intersection(&other.to_rectangle()))
    }
}

/// Clip complexity of one drawing call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipRegion<'a> {
    /// Nothing is clipped
    Trivial,
    /// One rectangle
    Rect(Rect),
    /// Union of non-overlapping rectangles
    Complex(&'a [Rect]),
}

impl<'a> ClipRegion<'a> {
    #[inline]
    pub fn is_trivial(&self) -> bool {
        matches!(self, ClipRegion::Trivial)
    }

    /// Rectangles a multi-pass engine has to visit (empty for trivial)
    pub fn rects(&self) -> &[Rect] {
        match self {
            ClipRegion::Trivial => &[],
            ClipRegion::Rect(r) => core::slice::from_ref(r),
            ClipRegion::Complex(list) => list,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, -3, 20, 4);
        assert_eq!(a.intersect(&b), Rect::new(5, 0, 10, 4));
        assert!(a.intersect(&Rect::new(10, 0, 12, 5)).is_empty());
        assert!(a.contains(9, 9));
        assert!(!a.contains(10, 9));
    }

    #[test]
    fn test_region_rects() {
        let r = Rect::new(1, 2, 3, 4);
        assert!(ClipRegion::Trivial.rects().is_empty());
        assert_eq!(ClipRegion::Rect(r).rects(), &[r]);
        let list = [r, Rect::new(5, 5, 6, 6)];
        assert_eq!(ClipRegion::Complex(&list).rects().len(), 2);
    }
}
