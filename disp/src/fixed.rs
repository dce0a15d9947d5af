//! Fixed-point formats
//!
//! Device coordinates arrive as 28.4 (`Fix`). The rasterizer registers take
//! 16.16.

/// 28.4 fixed point
pub type Fix = i32;

pub const FIX_SHIFT: u32 = 4;
pub const FIX_ONE: Fix = 1 << FIX_SHIFT;
pub const FIX_MASK: Fix = FIX_ONE - 1;

/// Just under one half / one in 16.16
pub const NEARLY_HALF: i32 = 0x7fff;
pub const NEARLY_ONE: i32 = 0xffff;

/// Integer to 16.16
#[inline]
pub const fn int_to_fixed(x: i32) -> i32 {
    x.wrapping_shl(16)
}

/// 28.4 to 16.16
#[inline]
pub const fn fix_to_fixed(x: Fix) -> i32 {
    x.wrapping_shl(12)
}

#[inline]
pub const fn fix_floor(x: Fix) -> i32 {
    x >> FIX_SHIFT
}

#[inline]
pub const fn fix_ceil(x: Fix) -> i32 {
    (x + FIX_MASK) >> FIX_SHIFT
}

#[inline]
pub const fn fix_frac(x: Fix) -> i32 {
    x & FIX_MASK
}

/// A point in 28.4 device coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointFix {
    pub x: Fix,
    pub y: Fix,
}

impl PointFix {
    pub const fn new(x: Fix, y: Fix) -> Self {
        Self { x, y }
    }

    /// Whole-pixel coordinates
    pub const fn from_int(x: i32, y: i32) -> Self {
        Self { x: x << FIX_SHIFT, y: y << FIX_SHIFT }
    }
}

/// Integer device point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointL {
    pub x: i32,
    pub y: i32,
}

impl PointL {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(fix_floor(-1), -1);
        assert_eq!(fix_ceil(17), 2);
        assert_eq!(fix_ceil(16), 1);
        assert_eq!(fix_frac(-1), 15);
        assert_eq!(fix_to_fixed(PointFix::from_int(3, 0).x), 3 << 16);
        assert_eq!(int_to_fixed(-2), -(2 << 16));
    }
}
