//! Hardware line primitive paths
//!
//! The chip's line DDA starts at a 16.16 position and steps a fixed 16.16
//! delta per pixel. Whether the pixels it lights match the diamond rule
//! depends on where the start is snapped and how the minor delta is rounded,
//! so each path here either gets it exactly right or refuses the line.

use crate::dma::P2Dma;
use crate::regs::*;

use super::{MAX_LENGTH_CONFORMANT_INTEGER_LINES, MAX_LENGTH_CONFORMANT_NONINTEGER_LINES};

const ONE: i64 = 1 << 16;

/// Diamond membership of a sub-pixel position: row `m` (x fraction),
/// bit `n` (y fraction)
const IN_DIAMOND: [u16; 16] = [
    0b1111111111111111, // m = 0
    0b1111110001111111, // m = 1
    0b1111100000111111, // m = 2
    0b1111000000011111, // m = 3
    0b1110000000001111, // m = 4
    0b1100000000000111, // m = 5
    0b1000000000000011, // m = 6
    0b0000000000000001, // m = 7
    0b0000000000000001, // m = 8
    0b0000000000000001, // m = 9
    0b1000000000000011, // m = 10
    0b1100000000000111, // m = 11
    0b1110000000001111, // m = 12
    0b1111000000011111, // m = 13
    0b1111100000111111, // m = 14
    0b1111110001111111, // m = 15
];

#[inline]
pub(crate) fn in_diamond(m: i64, n: i64) -> bool {
    (IN_DIAMOND[(m & 15) as usize] >> (n & 15)) & 1 != 0
}

/// Diamond test for slope 1 lines, which also own the lower-right edge
#[inline]
fn in_s1_diamond(m: i64, n: i64) -> bool {
    in_diamond(m, n) || m - n == 8
}

/// Diamond test for slope -1 lines
#[inline]
fn in_sm1_diamond(m: i64, n: i64) -> bool {
    in_diamond(m, n) || m + n == 8
}

/// Minor-axis delta for `minor` pixels over `major` steps, rounded so the
/// DDA never crosses a pixel centre early
#[inline]
fn minor_delta(minor: i64, major: i64) -> i64 {
    let mut d = minor << 16;
    if minor < 0 {
        d -= major - 1;
    }
    d / major
}

/// DDA deltas and pixel count for an integer line of (dx, dy) pixels
fn integer_deltas(dx: i64, dy: i64, conformant: bool, continuing: bool) -> Option<(i64, i64, i64)> {
    let (adx, ady) = (dx.abs(), dy.abs());
    let limit = MAX_LENGTH_CONFORMANT_INTEGER_LINES as i64;
    if adx > ady {
        let gdx = if dx > 0 { ONE } else { -ONE };
        let gdy = if ady == 0 {
            0
        } else {
            if conformant && adx > limit {
                return None;
            }
            minor_delta(dy, adx)
        };
        Some((gdx, gdy, adx))
    } else if adx < ady {
        let gdy = if dy > 0 { ONE } else { -ONE };
        let gdx = if adx == 0 {
            0
        } else {
            if conformant && ady > limit {
                return None;
            }
            minor_delta(dx, ady)
        };
        Some((gdx, gdy, ady))
    } else {
        if continuing && ady == 0 {
            return Some((0, 0, 0));
        }
        let gdx = if dx > 0 { ONE } else { -ONE };
        let gdy = if dy > 0 { ONE } else { -ONE };
        Some((gdx, gdy, adx))
    }
}

/// Line between integer endpoints (28.4 with zero fractions)
pub(crate) fn fast_integer_line(dma: &P2Dma, conformant: bool, x1: i64, y1: i64, x2: i64, y2: i64) -> bool {
    let (x1, y1, x2, y2) = (x1 >> 4, y1 >> 4, x2 >> 4, y2 >> 4);
    let Some((gdx, gdy, count)) = integer_deltas(x2 - x1, y2 - y1, conformant, false) else {
        return false;
    };

    #[cfg(feature = "lines-trace")]
    crate::log_trace!("[LINES] integer ({},{})->({},{}) n={}", x1, y1, x2, y2, count);

    let mut cursor = dma.reserve(16);
    cursor.push(tag::START_X_DOM, ((x1 << 16) + 0x7fff) as u32);
    cursor.push(tag::START_Y, ((y1 << 16) + 0x7fff) as u32);
    cursor.push(tag::D_X_DOM, gdx as u32);
    cursor.push(tag::D_Y, gdy as u32);
    cursor.push(tag::COUNT, count as u32);
    cursor.push(tag::RENDER, RENDER_LINE_PRIMITIVE);
    cursor.push(tag::D_X_DOM, 0);
    cursor.push(tag::D_Y, ONE as u32);
    dma.commit(cursor);
    true
}

/// Chain an integer line onto the one just drawn with ContinueNewLine; the
/// chip restarts from the pixel centre where the previous line ended
pub(crate) fn fast_integer_continue_line(
    dma: &P2Dma,
    conformant: bool,
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
) -> bool {
    let Some((gdx, gdy, count)) = integer_deltas((x2 - x1) >> 4, (y2 - y1) >> 4, conformant, true) else {
        return false;
    };
    if count == 0 {
        return true;
    }

    let mut cursor = dma.reserve(10);
    cursor.push(tag::D_X_DOM, gdx as u32);
    cursor.push(tag::D_Y, gdy as u32);
    cursor.push(tag::CONTINUE_NEW_LINE, count as u32);
    cursor.push(tag::D_X_DOM, 0);
    cursor.push(tag::D_Y, ONE as u32);
    dma.commit(cursor);
    true
}

/// Snap a major-axis start (16.16) onto the first lit pixel
#[inline]
fn snap_start(s: i64, lit: bool, forward: bool, half: i64) -> i64 {
    match (lit, forward) {
        (true, _) => (s + half) & !0xffff,
        (false, true) => (s + 0xffff) & !0xffff,
        (false, false) => s & !0xffff,
    }
}

/// Snap a major-axis end (28.4) onto the first pixel not lit
#[inline]
fn snap_end(e: i64, lit: bool, forward: bool, half: i64) -> i64 {
    match (lit, forward) {
        (true, _) => (e + half) & !15,
        (false, true) => (e + 15) & !15,
        (false, false) => e & !15,
    }
}

/// Line with fractional endpoints. Fails when the line is too long for the
/// hardware DDA to stay on the ideal pixels.
pub(crate) fn fast_line(dma: &P2Dma, conformant: bool, fx1: i64, fy1: i64, fx2: i64, fy2: i64) -> bool {
    let (dx, dy) = (fx2 - fx1, fy2 - fy1);
    let (adx, ady) = (dx.abs(), dy.abs());
    if (adx | ady) & !0x7fff != 0 {
        return false;
    }
    let limit = (MAX_LENGTH_CONFORMANT_NONINTEGER_LINES as i64) << 4;
    let (m1, n1, m2, n2) = (fx1 & 15, fy1 & 15, fx2 & 15, fy2 & 15);
    let mut sx = fx1 << 12;
    let mut sy = fy1 << 12;
    let (gdx, gdy, count);

    if adx == ady {
        let forward = dx >= 0;
        if dx == dy {
            // Slope 1
            let lit = in_s1_diamond(m1, n1);
            let start = snap_start(sx, lit, forward, 0x8000);
            sy += start - sx;
            sx = start;
            let end = snap_end(fx2, in_s1_diamond(m2, n2), forward, 8);
            gdx = if forward { ONE } else { -ONE };
            gdy = gdx;
            count = if forward { (end >> 4) - (sx >> 16) } else { (sx >> 16) - (end >> 4) };
        } else {
            // Slope -1
            let lit = in_sm1_diamond(m1, n1);
            let start = snap_start(sx, lit, forward, 0x7fff);
            sy += sx - start;
            sx = start;
            let end = snap_end(fx2, in_sm1_diamond(m2, n2), forward, 7);
            gdx = if forward { ONE } else { -ONE };
            gdy = -gdx;
            count = if forward { (end >> 4) - (sx >> 16) } else { (sx >> 16) - (end >> 4) };
        }
    } else if adx > ady {
        if conformant && adx > limit && ady != 0 {
            return false;
        }
        let forward = dx >= 0;
        let start = snap_start(sx, in_diamond(m1, n1), forward, 0x7fff);
        gdy = if dy != 0 { minor_delta(dy, adx) } else { 0 };
        if dy != 0 {
            let step = if forward { start - sx } else { sx - start };
            sy += ((step >> 12) * gdy) >> 4;
        }
        sx = start;
        let end = snap_end(fx2, in_diamond(m2, n2), forward, 7);
        gdx = if forward { ONE } else { -ONE };
        count = if forward { (end >> 4) - (sx >> 16) } else { (sx >> 16) - (end >> 4) };
    } else {
        if conformant && ady > limit && adx != 0 {
            return false;
        }
        let forward = dy >= 0;
        let start = snap_start(sy, in_diamond(m1, n1), forward, 0x7fff);
        gdx = if dx != 0 { minor_delta(dx, ady) } else { 0 };
        if dx != 0 {
            let step = if forward { start - sy } else { sy - start };
            sx += ((step >> 12) * gdx) >> 4;
        }
        sy = start;
        let end = snap_end(fy2, in_diamond(m2, n2), forward, 7);
        gdy = if forward { ONE } else { -ONE };
        count = if forward { (end >> 4) - (sy >> 16) } else { (sy >> 16) - (end >> 4) };
    }

    #[cfg(feature = "lines-trace")]
    crate::log_trace!("[LINES] fractional start {:#x},{:#x} n={}", sx, sy, count);

    let mut cursor = dma.reserve(16);
    cursor.push(tag::START_X_DOM, (sx + 0x7fff) as u32);
    cursor.push(tag::START_Y, (sy + 0x7fff) as u32);
    cursor.push(tag::D_X_DOM, gdx as u32);
    cursor.push(tag::D_Y, gdy as u32);
    cursor.push(tag::COUNT, count as u32);
    cursor.push(tag::RENDER, RENDER_LINE_PRIMITIVE);
    cursor.push(tag::D_X_DOM, 0);
    cursor.push(tag::D_Y, ONE as u32);
    dma.commit(cursor);
    true
}
