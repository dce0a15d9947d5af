//! Line Rasterizer
//!
//! Lines arrive as 28.4 endpoints and must light exactly the pixels whose
//! diamonds the ideal line exits (the GIQ rule, last pixel excluded). Three
//! paths, cheapest first:
//!
//! ```text
//!   integer endpoints, short enough  ──► hardware line, chained with
//!                                        ContinueNewLine along the path
//!   fractional, short or axial       ──► hardware line from a snapped start
//!   anything else                    ──► DDA into runs ("strips"), replayed
//!                                        by a strip drawer
//! ```
//!
//! The DDA works on a normalized line running left to right, top to bottom,
//! with slope at most one. Flags record the flips applied so start points,
//! clip rectangles and strip directions can be mapped back.

pub mod fast;
pub mod strips;
pub mod style;

use alloc::vec::Vec;

use crate::clip::{ClipRegion, Rect};
use crate::dma::P2Dma;
use crate::fixed::{PointFix, PointL};

use self::strips::{Strip, StripDrawer};
use self::style::LineState;

pub use self::style::{LineStyle, StylePattern};

/// Longest integer line the hardware DDA draws without stray pixels
pub const MAX_LENGTH_CONFORMANT_INTEGER_LINES: u32 = 194;
/// Longest non-axial fractional line (pixels) sent to the hardware DDA
pub const MAX_LENGTH_CONFORMANT_NONINTEGER_LINES: u32 = 16;

// Fast-path coordinate windows (absolute 28.4 values). The integer masks
// also demand a zero fraction.
const XMASK_INTEGER: i64 = !0x7ff0;
const YMASK_INTEGER: i64 = !0x3ff0;
const XMASK_FRACTIONAL: i64 = !0x7fff;
const YMASK_FRACTIONAL: i64 = !0x3fff;

// Normalization flags
const FL_FLIP_D: u32 = 1 << 0;
const FL_FLIP_V: u32 = 1 << 1;
const FL_FLIP_SLOPE_ONE: u32 = 1 << 2;
const FL_FLIP_H: u32 = 1 << 3;
const FL_H_ROUND_DOWN: u32 = 1 << 4;
const FL_V_ROUND_DOWN: u32 = 1 << 5;

/// Tie-break per (FLIP_D, FLIP_V, SLOPE_ONE): which half-pixel boundaries
/// round down in normalized space
const ROUND_TABLE: [u32; 8] = [
    FL_H_ROUND_DOWN | FL_V_ROUND_DOWN, // no flips
    FL_H_ROUND_DOWN | FL_V_ROUND_DOWN, // FLIP_D
    FL_H_ROUND_DOWN,                   // FLIP_V
    FL_V_ROUND_DOWN,                   // FLIP_V | FLIP_D
    FL_V_ROUND_DOWN,                   // SLOPE_ONE
    0,                                 // SLOPE_ONE | FLIP_D (cannot happen)
    FL_H_ROUND_DOWN,                   // SLOPE_ONE | FLIP_V
    0,                                 // cannot happen
];

/// Round a sub-pixel coordinate to the nearest pixel, ties per `down`
#[inline]
fn lround(m: i64, down: bool) -> i64 {
    (m + 8 - down as i64) >> 4
}

#[inline]
fn fits(p0: PointFix, p1: PointFix, xmask: i64, ymask: i64) -> bool {
    let orx = (p0.x as i64).abs() | (p1.x as i64).abs();
    let ory = (p0.y as i64).abs() | (p1.y as i64).abs();
    orx & xmask == 0 && ory & ymask == 0
}

/// A line after normalization, ready for the DDA
struct NormalizedLine {
    fl: u32,
    /// Start pixel in normalized space
    x: i64,
    y: i64,
    dm: i64,
    dn: i64,
    gamma: i64,
    beta: i64,
    /// First and last pixel index along the major axis, row of the first
    x0: i64,
    x1: i64,
    y0: i64,
}

impl NormalizedLine {
    /// Classify, flip and resolve the first and last lit pixels. `None`
    /// for lines that light nothing or overflow the 32-bit delta range.
    fn new(p0: PointFix, p1: PointFix) -> Option<Self> {
        let (mut m0, mut n0) = (p0.x as i64, p0.y as i64);
        let (mut dm, mut dn) = (p1.x as i64, p1.y as i64);
        let mut fl = 0;

        if m0 > dm {
            core::mem::swap(&mut m0, &mut dm);
            core::mem::swap(&mut n0, &mut dn);
            fl |= FL_FLIP_H;
        }
        dm -= m0;
        if dm > i32::MAX as i64 {
            return None;
        }
        if dn < n0 {
            n0 = -n0;
            dn = -dn;
            fl |= FL_FLIP_V;
        }
        dn -= n0;
        if dn > i32::MAX as i64 {
            return None;
        }
        if dn >= dm {
            if dn == dm {
                fl |= FL_FLIP_SLOPE_ONE;
            } else {
                core::mem::swap(&mut dm, &mut dn);
                core::mem::swap(&mut m0, &mut n0);
                fl |= FL_FLIP_D;
            }
        }

        let index = (fl & FL_FLIP_D != 0) as usize
            | ((fl & FL_FLIP_V != 0) as usize) << 1
            | ((fl & FL_FLIP_SLOPE_ONE != 0) as usize) << 2;
        fl |= ROUND_TABLE[index];

        let x = m0 >> 4;
        let y = n0 >> 4;
        let m0 = m0 & 15;
        let n0 = n0 & 15;

        // 64-bit: dM * 24 can overflow 32 bits
        let mut gamma = dm * (n0 + 8) - m0 * dn;
        if fl & FL_V_ROUND_DOWN != 0 {
            gamma -= 1;
        }
        gamma >>= 4;
        let beta = !gamma;

        let n1 = (n0 + dn) & 15;
        let m1 = (m0 + dm) & 15;
        let mut x1 = (m0 + dm) >> 4;
        let h_round_down = fl & FL_H_ROUND_DOWN != 0;
        let (x0, y0);

        if fl & FL_FLIP_H != 0 {
            // Drawn right to left: the stored start is the exclusive end
            if n1 == 0 {
                if lround(m1, h_round_down) != 0 {
                    x1 += 1;
                }
            } else if (n1 - 8).abs() + m1 > 16 {
                x1 += 1;
            }

            let mut start = None;
            if fl & (FL_FLIP_SLOPE_ONE | FL_H_ROUND_DOWN) == FL_FLIP_SLOPE_ONE {
                if n1 > 0 && m1 == n1 + 8 {
                    x1 += 1;
                }
                if n0 > 0 && m0 == n0 + 8 {
                    start = Some((2, dn));
                }
            }
            let (first, delta) = start.unwrap_or_else(|| {
                if n0 == 0 {
                    if lround(m0, h_round_down) != 0 { (2, dn) } else { (1, 0) }
                } else if (n0 - 8).abs() + m0 > 16 {
                    (2, dn)
                } else {
                    (1, 0)
                }
            });
            x0 = first;
            let ll = gamma + delta;
            y0 = if ll >= 2 * dm - dn {
                2
            } else if ll >= dm - dn {
                1
            } else {
                0
            };
        } else {
            x1 -= 1;
            if m1 > 0 {
                if n1 == 0 {
                    if lround(m1, h_round_down) != 0 {
                        x1 += 1;
                    }
                } else if (n1 - 8).abs() <= m1 {
                    x1 += 1;
                }
            }

            let mut first = None;
            if fl & (FL_FLIP_SLOPE_ONE | FL_H_ROUND_DOWN) == FL_FLIP_SLOPE_ONE | FL_H_ROUND_DOWN {
                if m1 > 0 && n1 == m1 + 8 {
                    x1 -= 1;
                }
                if m0 > 0 && n0 == m0 + 8 {
                    first = Some(0);
                }
            }
            x0 = first.unwrap_or_else(|| {
                if m0 == 0 {
                    0
                } else if n0 == 0 {
                    (lround(m0, h_round_down) != 0) as i64
                } else {
                    ((n0 - 8).abs() <= m0) as i64
                }
            });
            y0 = (gamma >= dm - if x0 != 0 { dn } else { 0 }) as i64;
        }

        Some(Self { fl, x, y, dm, dn, gamma, beta, x0, x1, y0 })
    }

    #[inline]
    fn flip_h(&self) -> bool {
        self.fl & FL_FLIP_H != 0
    }

    /// Major-axis pixel count of the whole line
    #[inline]
    fn style_pels(&self) -> i64 {
        self.x1 - self.x0 + 1
    }

    /// Row of major-axis pixel `i`
    #[inline]
    fn row_at(&self, i: i64) -> i64 {
        (i * self.dn + self.gamma).div_euclid(self.dm)
    }

    /// Last major-axis pixel above row `j`
    #[inline]
    fn last_on_row(&self, j: i64) -> i64 {
        (j * self.dm + self.beta).div_euclid(self.dn)
    }

    /// Clip rectangle mapped into normalized space, relative to the start
    /// pixel: (left, top, right, bottom), right and bottom exclusive
    fn normalize_rect(&self, r: &Rect) -> (i64, i64, i64, i64) {
        let (mut l, mut t, mut rr, mut b) = (r.left as i64, r.top as i64, r.right as i64, r.bottom as i64);
        if self.fl & FL_FLIP_V != 0 {
            (t, b) = (1 - b, 1 - t);
        }
        if self.fl & FL_FLIP_D != 0 {
            (l, t, rr, b) = (t, l, b, rr);
        }
        (l - self.x, t - self.y, rr - self.x, b - self.y)
    }

    /// The part of the line inside `r` as (x0, x1, y0), computed from the
    /// closed-form row relation rather than per pixel
    fn clip_to(&self, r: &Rect) -> Option<(i64, i64, i64)> {
        let (x_left, y_top, x_right, y_bottom) = self.normalize_rect(r);
        let (mut x0, mut x1, mut y0) = (self.x0, self.x1, self.y0);

        if y_bottom <= y0 || x_right <= x0 || x_left > x1 {
            return None;
        }
        if x1 >= x_right {
            x1 = x_right - 1;
        }
        let y1 = self.row_at(x1);
        if y_top > y1 {
            return None;
        }
        if y_bottom <= y1 {
            x1 = self.last_on_row(y_bottom);
        }
        if x_left > x0 {
            x0 = x_left;
            y0 = self.row_at(x0);
            if y_bottom <= y0 {
                return None;
            }
        }
        if y_top > y0 {
            y0 = y_top;
            x0 = self.last_on_row(y0) + 1;
            if x_right <= x0 {
                return None;
            }
        }
        Some((x0, x1, y0))
    }
}

/// Draws the lines of one stroke call
pub(crate) struct LineRenderer<'a> {
    pub dma: &'a P2Dma,
    pub conformant: bool,
    /// Diagonal strips allowed
    pub half_flip: bool,
    /// Logic op reads the framebuffer; ContinueNewLine would hit the shared
    /// vertex twice
    pub reads_dest: bool,
}

impl LineRenderer<'_> {
    /// Draw the polyline `points`. Fast paths are only tried for solid lines
    /// that are unclipped or clipped by the hardware scissor.
    pub fn stroke(&self, points: &[PointFix], clip: &ClipRegion<'_>, mut style: Option<&mut LineState>) {
        let fast = style.is_none() && !matches!(clip, ClipRegion::Complex(_));
        let mut seg = 0;

        while seg + 1 < points.len() {
            let (mut a, mut b) = (points[seg], points[seg + 1]);

            if fast {
                if fits(a, b, XMASK_INTEGER, YMASK_INTEGER)
                    && fast::fast_integer_line(self.dma, self.conformant, a.x as i64, a.y as i64, b.x as i64, b.y as i64)
                {
                    seg += 1;
                    if self.reads_dest {
                        continue;
                    }
                    // Chain while the next points stay integer and short
                    let mut chained = true;
                    while seg + 1 < points.len() {
                        a = points[seg];
                        b = points[seg + 1];
                        if !fits(b, b, XMASK_INTEGER, YMASK_INTEGER)
                            || !fast::fast_integer_continue_line(
                                self.dma,
                                self.conformant,
                                a.x as i64,
                                a.y as i64,
                                b.x as i64,
                                b.y as i64,
                            )
                        {
                            chained = false;
                            break;
                        }
                        seg += 1;
                    }
                    if chained {
                        continue;
                    }
                }

                if fits(a, b, XMASK_FRACTIONAL, YMASK_FRACTIONAL)
                    && fast::fast_line(self.dma, self.conformant, a.x as i64, a.y as i64, b.x as i64, b.y as i64)
                {
                    seg += 1;
                    continue;
                }
            }

            #[cfg(feature = "lines-trace")]
            crate::log_trace!("[LINES] strips ({},{})->({},{})", a.x, a.y, b.x, b.y);

            self.strip_line(a, b, clip, style.as_deref_mut());
            seg += 1;
        }
    }

    /// One line through the DDA and the strip drawers
    fn strip_line(&self, p0: PointFix, p1: PointFix, clip: &ClipRegion<'_>, mut style: Option<&mut LineState>) {
        let Some(line) = NormalizedLine::new(p0, p1) else {
            return;
        };
        let pels = line.style_pels();
        if pels <= 0 {
            return;
        }
        let x_start = line.x0;

        // The style phase of the whole line, whatever part of it is drawn
        let (sp_this, sp_after) = match style.as_deref_mut() {
            Some(ls) => {
                let this = ls.advance(pels);
                ls.sp_complex = this;
                (this, ls.sp_next)
            }
            None => (0, 0),
        };

        let mut pieces: Vec<(i64, i64, i64)> = Vec::new();
        match clip {
            ClipRegion::Trivial => pieces.push((line.x0, line.x1, line.y0)),
            ClipRegion::Rect(r) => pieces.extend(line.clip_to(r)),
            ClipRegion::Complex(rects) => {
                pieces.extend(rects.iter().filter_map(|r| line.clip_to(r)));
                // Runs in drawing order
                if line.flip_h() {
                    pieces.sort_unstable_by(|a, b| b.0.cmp(&a.0));
                } else {
                    pieces.sort_unstable_by(|a, b| a.0.cmp(&b.0));
                }
            }
        }

        for (x0, x1, y0) in pieces {
            if let Some(ls) = style.as_deref_mut() {
                let sp = if line.flip_h() {
                    sp_after - x0 + x_start
                } else {
                    sp_this + x0 - x_start
                };
                ls.position(sp, line.flip_h());
            }
            self.draw_run(&line, x0, x1, y0, style.as_deref_mut());
        }
    }

    /// DDA over pixels `x0..=x1` of a normalized line, starting on row `y0`
    fn draw_run(&self, line: &NormalizedLine, x0: i64, x1: i64, y0: i64, mut style: Option<&mut LineState>) {
        let (mut sx, mut sy) = (line.x + x0, line.y + y0);
        if line.fl & FL_FLIP_D != 0 {
            core::mem::swap(&mut sx, &mut sy);
        }
        let y_dir = if line.fl & FL_FLIP_V != 0 {
            sy = -sy;
            -1
        } else {
            1
        };

        let dm = line.dm;
        let (mut dn, mut beta, mut y0) = (line.dn, line.beta, y0);
        // Closer to diagonal than to axial: count runs along the diagonal
        let half_flip = 2 * dn > dm && style.is_none() && self.half_flip;
        if half_flip {
            beta = line.gamma - dm;
            dn = dm - dn;
            y0 = x0 - y0;
        }
        let drawer = StripDrawer::select(line.fl & FL_FLIP_D != 0, half_flip, style.is_some());
        let mut strip = Strip::new(PointL::new(sx as i32, sy as i32), y_dir);

        let (mut i, mut r, di, dr) = if dn == 0 {
            (i32::MAX as i64, 0, 0, 0)
        } else {
            let dl = (y0 + 1) * dm + beta;
            (dl.div_euclid(dn) - x0 + 1, dl.rem_euclid(dn), dm / dn, dm % dn)
        };

        let mut pels = x1 - x0 + 1;
        loop {
            pels -= i;
            if pels <= 0 {
                break;
            }
            strip.push(i as i32);
            if strip.is_full() {
                drawer.draw(self.dma, &mut strip, style.as_deref_mut());
            }
            i = di;
            r += dr;
            if r >= dn {
                r -= dn;
                i += 1;
            }
        }
        strip.push((pels + i) as i32);
        drawer.draw(self.dma, &mut strip, style);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::sync::Arc;
    use alloc::vec;

    use super::strips::{initialize_strips, reset_strips, StripSetup};
    use crate::config::DisplayConfig;
    use crate::dma::{SharedDma, DMA_CMD_MIN_SIZE};
    use crate::interrupt::InterruptControlBlock;
    use crate::rop::LogicOp;
    use crate::sim::{Latency, SimAllocator, SimChip, SimConfig, XorShift64};

    struct Rig {
        chip: Arc<SimChip>,
        dma: P2Dma,
        _shared: Arc<SharedDma>,
    }

    fn rig() -> Rig {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(
            SimConfig { latency: Latency::Fixed(2), width: 256, height: 256, ..SimConfig::default() },
            allocator.clone(),
        );
        let icb = Arc::new(InterruptControlBlock::new());
        chip.connect_interrupt(icb.clone());
        let shared = SharedDma::new(icb, allocator);
        let config = DisplayConfig { dma_buffer_bytes: DMA_CMD_MIN_SIZE, ..DisplayConfig::default() };
        let dma = P2Dma::initialize(&shared, chip.clone(), &config).unwrap();
        Rig { chip, dma, _shared: shared }
    }

    fn setup(logic_op: LogicOp, clip: Option<Rect>) -> StripSetup {
        StripSetup { logic_op, color: 0xffffff, window_base: 0, clip }
    }

    impl Rig {
        fn renderer(&self, half_flip: bool, reads_dest: bool) -> LineRenderer<'_> {
            LineRenderer { dma: &self.dma, conformant: true, half_flip, reads_dest }
        }

        /// Per-pixel write counts, keyed by (x, y)
        fn writes(&self) -> BTreeMap<(i32, i32), u32> {
            self.chip.with_framebuffer(|fb| {
                fb.written_pixels().into_iter().map(|(x, y)| ((x, y), fb.writes_at(x, y))).collect()
            })
        }

        /// Stroke with XOR, the way a read-modify-write op is drawn
        fn draw(
            &self,
            points: &[PointFix],
            clip: ClipRegion<'_>,
            style: Option<&mut LineState>,
            half_flip: bool,
        ) -> BTreeMap<(i32, i32), u32> {
            self.chip.clear_framebuffer(0);
            let scissor = match clip {
                ClipRegion::Rect(r) => Some(r),
                _ => None,
            };
            initialize_strips(&self.dma, &setup(LogicOp::Xor, scissor));
            self.renderer(half_flip, true).stroke(points, &clip, style);
            reset_strips(&self.dma);
            self.dma.wait_complete();
            self.writes()
        }

        /// One line forced through the DDA
        fn strips(&self, a: PointFix, b: PointFix, half_flip: bool) -> Vec<(i32, i32)> {
            self.chip.clear_framebuffer(0);
            initialize_strips(&self.dma, &setup(LogicOp::Xor, None));
            self.renderer(half_flip, true).strip_line(a, b, &ClipRegion::Trivial, None);
            reset_strips(&self.dma);
            self.dma.wait_complete();
            pixels(&self.writes())
        }
    }

    fn pt(x: i32, y: i32) -> PointFix {
        PointFix::from_int(x, y)
    }

    fn pixels(map: &BTreeMap<(i32, i32), u32>) -> Vec<(i32, i32)> {
        map.keys().copied().collect()
    }

    /// Nearest-pixel rounding with ties toward the smaller coordinate
    fn round_down_ties(num: i32, den: i32) -> i32 {
        -((-(2 * num - den)).div_euclid(2 * den))
    }

    /// Integer-endpoint GIQ pixels of a polyline in drawing order: one pixel
    /// per major step, last pixel of each segment excluded
    fn ordered(points: &[(i32, i32)]) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        for w in points.windows(2) {
            let ((x0, y0), (x1, y1)) = (w[0], w[1]);
            let (dx, dy) = (x1 - x0, y1 - y0);
            let (adx, ady) = (dx.abs(), dy.abs());
            if adx >= ady {
                out.extend((0..adx).map(|k| (x0 + dx.signum() * k, y0 + round_down_ties(dy * k, adx))));
            } else {
                out.extend((0..ady).map(|k| (x0 + round_down_ties(dx * k, ady), y0 + dy.signum() * k)));
            }
        }
        out
    }

    fn reference(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<(i32, i32)> {
        let mut out = ordered(&[(x0, y0), (x1, y1)]);
        out.sort_unstable();
        out
    }

    #[test]
    fn test_horizontal_example() {
        let rig = rig();
        let got = rig.draw(&[pt(0, 0), pt(10, 0)], ClipRegion::Trivial, None, true);
        assert_eq!(pixels(&got), (0..10).map(|x| (x, 0)).collect::<Vec<_>>());
    }

    #[test]
    fn test_slope_one_example() {
        let rig = rig();
        let got = rig.draw(&[pt(0, 0), pt(4, 4)], ClipRegion::Trivial, None, true);
        assert_eq!(pixels(&got), vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
        assert_eq!(rig.strips(pt(0, 0), pt(4, 4), true), vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_every_octant_matches_reference() {
        let rig = rig();
        let (cx, cy) = (40, 40);
        for dx in -9..=9 {
            for dy in -9..=9 {
                let (x1, y1) = (cx + dx * 3, cy + dy * 2);
                let expected = reference(cx, cy, x1, y1);
                let got = rig.draw(&[pt(cx, cy), pt(x1, y1)], ClipRegion::Trivial, None, true);
                assert_eq!(pixels(&got), expected, "line to ({}, {})", x1, y1);
                assert_eq!(rig.strips(pt(cx, cy), pt(x1, y1), true), expected, "strips to ({}, {})", x1, y1);
                assert_eq!(rig.strips(pt(cx, cy), pt(x1, y1), false), expected);
            }
        }
    }

    #[test]
    fn test_long_lines_use_strips() {
        let rig = rig();
        // Past the conformant limit the hardware line is refused
        let (x1, y1) = (240, 101);
        let got = rig.draw(&[pt(1, 2), pt(x1, y1)], ClipRegion::Trivial, None, true);
        assert_eq!(pixels(&got), reference(1, 2, x1, y1));
        let got = rig.draw(&[pt(x1, y1), pt(1, 2)], ClipRegion::Trivial, None, false);
        assert_eq!(pixels(&got), reference(x1, y1, 1, 2));
        assert!(got.values().all(|&n| n == 1));
    }

    #[test]
    fn test_closed_outline_lights_each_pixel_once() {
        let rig = rig();
        let corners = [(10, 10), (60, 14), (52, 70), (8, 40), (10, 10)];
        let outline: Vec<_> = corners.iter().map(|&(x, y)| pt(x, y)).collect();
        let got = rig.draw(&outline, ClipRegion::Trivial, None, true);
        assert!(got.values().all(|&n| n == 1));
        let mut expected = ordered(&corners);
        expected.sort_unstable();
        assert_eq!(pixels(&got), expected);
    }

    #[test]
    fn test_continue_line_chain() {
        let rig = rig();
        let corners = [(5, 5), (25, 5), (25, 30), (5, 40), (40, 60), (200, 61), (210, 80)];
        let points: Vec<_> = corners.iter().map(|&(x, y)| pt(x, y)).collect();
        rig.chip.clear_framebuffer(0);
        rig.chip.clear_consumed();
        initialize_strips(&rig.dma, &setup(LogicOp::Copy, None));
        rig.renderer(true, false).stroke(&points, &ClipRegion::Trivial, None);
        reset_strips(&rig.dma);
        rig.dma.wait_complete();

        let got = rig.writes();
        assert!(got.values().all(|&n| n == 1));
        let mut expected = ordered(&corners);
        expected.sort_unstable();
        assert_eq!(pixels(&got), expected);
        // Later integer segments were chained instead of restarted
        assert!(rig.chip.consumed_words().contains(&crate::regs::tag::CONTINUE_NEW_LINE));
    }

    #[test]
    fn test_fractional_lines_agree_across_paths() {
        let rig = rig();
        let mut rng = XorShift64::new(0xfeed);
        for _ in 0..300 {
            let a = PointFix::new(320 + (rng.next() % 640) as i32, 320 + (rng.next() % 640) as i32);
            let len: u64 = if rng.next() % 2 == 0 { 250 } else { 64 };
            let b = PointFix::new(
                a.x + (rng.next() % (2 * len)) as i32 - len as i32,
                a.y + (rng.next() % (2 * len)) as i32 - len as i32,
            );
            let fast = rig.draw(&[a, b], ClipRegion::Trivial, None, true);
            let slow = rig.strips(a, b, true);
            assert_eq!(pixels(&fast), slow, "{:?} -> {:?}", a, b);
            // Diagonal strips change the encoding, never the pixels
            assert_eq!(rig.strips(a, b, false), slow);
        }
    }

    /// L1 distance from the segment point at `num / den` to the center of
    /// pixel (i, j), compared against the diamond's half-pixel radius
    fn diamond_cmp(a: PointFix, b: PointFix, num: i64, den: i64, i: i64, j: i64) -> core::cmp::Ordering {
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let (dx, dy) = ((b.x - a.x) as i64, (b.y - a.y) as i64);
        let ex = a.x as i64 * den + num * dx - 16 * i * den;
        let ey = a.y as i64 * den + num * dy - 16 * j * den;
        (ex.abs() + ey.abs()).cmp(&(8 * den))
    }

    /// Exact diamond-exit pixels of one segment: a pixel is lit when the
    /// segment passes through its diamond and does not end inside it.
    /// `None` when some pixel is decided by a boundary touch.
    fn diamond_reference(a: PointFix, b: PointFix) -> Option<Vec<(i32, i32)>> {
        use core::cmp::Ordering::*;
        let (dx, dy) = ((b.x - a.x) as i64, (b.y - a.y) as i64);
        let lo_x = (a.x.min(b.x) as i64).div_euclid(16) - 1;
        let hi_x = (a.x.max(b.x) as i64).div_euclid(16) + 2;
        let lo_y = (a.y.min(b.y) as i64).div_euclid(16) - 1;
        let hi_y = (a.y.max(b.y) as i64).div_euclid(16) + 2;
        let mut out = Vec::new();
        for j in lo_y..=hi_y {
            for i in lo_x..=hi_x {
                // The distance is convex along the segment, so its minimum is
                // at an end or where one coordinate crosses the center
                let mut params = vec![(0, 1), (1, 1)];
                for (d, c) in [(dx, 16 * i - a.x as i64), (dy, 16 * j - a.y as i64)] {
                    if d != 0 {
                        let (n, d) = if d < 0 { (-c, -d) } else { (c, d) };
                        if 0 <= n && n <= d {
                            params.push((n, d));
                        }
                    }
                }
                let closest = params.iter().map(|&(n, d)| diamond_cmp(a, b, n, d, i, j)).min();
                let end = diamond_cmp(a, b, 1, 1, i, j);
                match (closest, end) {
                    (Some(Equal), _) | (Some(Less), Equal) => return None,
                    (Some(Less), Greater) => out.push((i as i32, j as i32)),
                    _ => {}
                }
            }
        }
        out.sort_unstable();
        Some(out)
    }

    #[test]
    fn test_fractional_lines_match_diamond_rule() {
        let rig = rig();
        let mut rng = XorShift64::new(0xd1a0);
        let mut checked = 0;
        while checked < 300 {
            let a = PointFix::new(320 + (rng.next() % 640) as i32, 320 + (rng.next() % 640) as i32);
            let b = PointFix::new(a.x + (rng.next() % 400) as i32 - 200, a.y + (rng.next() % 400) as i32 - 200);
            if a == b {
                continue;
            }
            let Some(expected) = diamond_reference(a, b) else {
                continue;
            };
            checked += 1;
            let got = rig.draw(&[a, b], ClipRegion::Trivial, None, true);
            assert_eq!(pixels(&got), expected, "{:?} -> {:?}", a, b);
            assert!(got.values().all(|&n| n == 1));
        }
    }

    #[test]
    fn test_clipping_keeps_ideal_pixels() {
        let rig = rig();
        let mut rng = XorShift64::new(42);
        let rects = [Rect::new(12, 8, 30, 25), Rect::new(30, 8, 44, 20), Rect::new(5, 30, 50, 41)];
        for _ in 0..200 {
            let mut coord = || (rng.next() % 900) as i32;
            let (a, b) = (PointFix::new(coord(), coord()), PointFix::new(coord(), coord()));
            let full = rig.strips(a, b, true);
            let inside = |r: &Rect| -> Vec<(i32, i32)> {
                full.iter().copied().filter(|&(x, y)| r.contains(x, y)).collect()
            };

            let simple = rig.draw(&[a, b], ClipRegion::Rect(rects[0]), None, true);
            assert_eq!(pixels(&simple), inside(&rects[0]));

            let complex = rig.draw(&[a, b], ClipRegion::Complex(&rects), None, true);
            let mut expected: Vec<_> = rects.iter().flat_map(|r| inside(r)).collect();
            expected.sort_unstable();
            assert_eq!(pixels(&complex), expected);
        }
    }

    fn styled(runs: &[u32]) -> LineState {
        match LineState::resolve(&LineStyle::runs(runs, false)) {
            Some(style::ResolvedStyle::Styled(ls)) => ls,
            _ => panic!("expected a styled pattern"),
        }
    }

    /// The pixels a dash pattern keeps, walking `order` from the start
    fn dashed(order: &[(i32, i32)], runs: &[u32]) -> Vec<(i32, i32)> {
        let total: u32 = runs.iter().sum();
        let mut out: Vec<_> = order
            .iter()
            .enumerate()
            .filter(|&(k, _)| {
                let mut k = k as u32 % (2 * total);
                let mut dash = true;
                if k >= total {
                    k -= total;
                    if runs.len() % 2 == 1 {
                        dash = !dash;
                    }
                }
                let mut i = 0;
                while k >= runs[i] {
                    k -= runs[i];
                    i += 1;
                }
                dash == (i % 2 == 0)
            })
            .map(|(_, &p)| p)
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_style_continuity() {
        let rig = rig();
        let polys: [&[(i32, i32)]; 4] = [
            &[(4, 4), (14, 4), (29, 4)],
            &[(29, 6), (4, 6)],
            &[(10, 10), (22, 22), (10, 34), (40, 50)],
            &[(30, 60), (50, 67), (70, 57), (35, 30)],
        ];
        for runs in [&[3u32, 2][..], &[1, 1], &[4, 1, 2, 3], &[2, 3, 1]] {
            let total: u32 = runs.iter().sum();
            for poly in polys {
                let points: Vec<_> = poly.iter().map(|&(x, y)| pt(x, y)).collect();
                let expected = dashed(&ordered(poly), runs);

                let mut ls = styled(runs);
                let got = rig.draw(&points, ClipRegion::Trivial, Some(&mut ls), true);
                assert_eq!(pixels(&got), expected, "{:?} {:?}", runs, poly);
                assert_eq!(ls.sp_next as usize, ordered(poly).len() % (2 * total as usize));

                // One stroke per segment carries the phase across calls
                let mut split = styled(runs);
                let mut union = Vec::new();
                for w in points.windows(2) {
                    let part = rig.draw(w, ClipRegion::Trivial, Some(&mut split), true);
                    union.extend(part.keys().copied());
                }
                union.sort_unstable();
                assert_eq!(union, expected);
            }
        }
    }

    #[test]
    fn test_styled_clip_keeps_phase() {
        let rig = rig();
        let poly = [(3, 5), (40, 20), (12, 44)];
        let points: Vec<_> = poly.iter().map(|&(x, y)| pt(x, y)).collect();
        let clip = Rect::new(8, 10, 30, 38);
        let runs = [5u32, 1, 1, 1];

        let mut clipped = styled(&runs);
        let got = rig.draw(&points, ClipRegion::Rect(clip), Some(&mut clipped), true);
        let expected: Vec<_> = dashed(&ordered(&poly), &runs)
            .into_iter()
            .filter(|&(x, y)| clip.contains(x, y))
            .collect();
        assert_eq!(pixels(&got), expected);

        let mut full = styled(&runs);
        rig.draw(&points, ClipRegion::Trivial, Some(&mut full), true);
        assert_eq!(clipped.sp_next, full.sp_next);
    }

    #[test]
    fn test_normalization_flags() {
        let line = NormalizedLine::new(pt(0, 0), pt(4, 4)).unwrap();
        assert_eq!(line.fl & (FL_FLIP_SLOPE_ONE | FL_FLIP_D), FL_FLIP_SLOPE_ONE);
        assert_eq!(line.style_pels(), 4);
        let steep = NormalizedLine::new(pt(0, 0), pt(-3, 9)).unwrap();
        assert_eq!(steep.fl & (FL_FLIP_D | FL_FLIP_V | FL_FLIP_H), FL_FLIP_D | FL_FLIP_V | FL_FLIP_H);
        assert_eq!(steep.style_pels(), 9);
        assert!(NormalizedLine::new(PointFix::new(i32::MIN, 0), PointFix::new(i32::MAX, 0)).is_none());
    }
}
