//! Span fill for polygons with fractional y
//!
//! The trapezoid registers only step whole scanlines from an integer start,
//! so fractional vertices are handled here: each edge runs its own
//! Bresenham DDA in 28.4 units, the two walls are resolved to the first
//! pixel centre at or right of the edge, and the hardware is fed one
//! scanline at a time with only the walls that moved reloaded.

use crate::dma::P2Dma;
use crate::fixed::{PointFix, NEARLY_ONE};
use crate::regs::*;

use super::brush::Pass;
use super::FillMode;

const RIGHT: usize = 0;
const LEFT: usize = 1;

/// First scanline at or below a 28.4 y
#[inline]
fn ceil_pixel(v: i32) -> i64 {
    (v as i64 + 15) >> 4
}

#[inline]
fn fixed(v: i64) -> i64 {
    v << 16
}

/// One polygon wall
#[derive(Debug, Clone, Copy)]
struct Edge {
    /// Index of the point this edge runs to
    point: usize,
    forward: bool,
    scans_to_go: i64,
    /// 16.16 with NEARLY_ONE added once the edge is started
    x: i64,
    x_advance: i64,
    error: i64,
    error_up: i64,
    error_down: i64,
}

impl Edge {
    fn new(point: usize, forward: bool) -> Self {
        Self {
            point,
            forward,
            scans_to_go: 0,
            x: 0,
            x_advance: 0,
            error: 0,
            error_up: 0,
            error_down: 0,
        }
    }

    /// Set the DDA up for the edge `from`..`to` and step it onto the first
    /// scanline it crosses
    fn start(&mut self, from: PointFix, to: PointFix) {
        let dy = to.y as i64 - from.y as i64;
        let mut dx = to.x as i64 - from.x as i64;
        debug_assert!(dy > 0, "edges only run down");

        if dx < 0 {
            dx = -dx;
            if dx < dy {
                self.x_advance = -1;
                self.error_up = dy - dx;
            } else {
                self.x_advance = -(dx / dy);
                self.error_up = dx % dy;
                if self.error_up > 0 {
                    self.x_advance -= 1;
                    self.error_up = dy - self.error_up;
                }
            }
        } else if dx < dy {
            self.x_advance = 0;
            self.error_up = dx;
        } else {
            self.x_advance = dx / dy;
            self.error_up = dx % dy;
        }
        self.error_down = dy;
        // Ceiling bias folded in so the sign can be tested instead
        self.error = -1;
        self.x = from.x as i64;

        let frac_y = from.y as i64 & 15;
        if frac_y != 0 {
            for _ in 0..16 - frac_y {
                self.step_sub_pixel();
            }
        }
        let frac_x = self.x & 15;
        if frac_x != 0 {
            self.error -= self.error_down * (16 - frac_x);
            self.x += 15;
        }
        self.x >>= 4;
        self.error >>= 4;

        self.x = fixed(self.x) + NEARLY_ONE as i64;
        self.x_advance = fixed(self.x_advance);
    }

    /// Advance by 1/16 of a scanline (28.4 units, before conversion)
    #[inline]
    fn step_sub_pixel(&mut self) {
        self.x += self.x_advance;
        self.error += self.error_up;
        if self.error >= 0 {
            self.error -= self.error_down;
            self.x += 1;
        }
    }

    /// Advance one scanline; returns true if the wall moved
    #[inline]
    fn step_scanline(&mut self) -> bool {
        let before = self.x;
        self.x += self.x_advance;
        self.error += self.error_up;
        if self.error >= 0 {
            self.error -= self.error_down;
            self.x += fixed(1);
        }
        self.x != before
    }
}

/// Fill a non-complex polygon whose topmost point is `points[top]`. The
/// fill modes (and the color, for a single pass) are already loaded.
pub(super) fn fill_spans(dma: &P2Dma, points: &[PointFix], top: usize, mode: &FillMode, passes: &[Pass]) {
    let n = points.len();
    let mut edges_left = n as i64;
    let mut current = ceil_pixel(points[top].y);
    let mut walls = [Edge::new(top, true), Edge::new(top, false)];

    let mut cursor = dma.reserve(2);
    cursor.push(tag::COUNT, 0);
    dma.commit(cursor);

    loop {
        for side in [LEFT, RIGHT] {
            let edge = &mut walls[side];
            if edge.scans_to_go != 0 {
                continue;
            }
            // Skip edges that cross no scanline
            let from = loop {
                edges_left -= 1;
                if edges_left < 0 {
                    return;
                }
                let from = edge.point;
                edge.point = if edge.forward { (from + 1) % n } else { (from + n - 1) % n };
                edge.scans_to_go = ceil_pixel(points[edge.point].y) - current;
                if edge.scans_to_go > 0 {
                    break from;
                }
            };
            edge.start(points[from], points[edge.point]);
        }

        let scans = walls[LEFT].scans_to_go.min(walls[RIGHT].scans_to_go);
        walls[LEFT].scans_to_go -= scans;
        walls[RIGHT].scans_to_go -= scans;
        let first_scan = current;
        current += scans;

        // Every pass starts from the same walls
        let mut after = walls;
        for pass in passes {
            let mut run = walls;
            if passes.len() > 1 {
                let mut cursor = dma.reserve(4);
                cursor.push(mode.color_reg, pass.color);
                cursor.push(tag::AREA_STIPPLE_MODE, pass.stipple.unwrap_or(DISABLE));
                dma.commit(cursor);
            }
            draw_trapezoid(dma, mode, &mut run, first_scan, scans);
            after = run;
        }
        walls = after;
    }
}

fn draw_trapezoid(dma: &P2Dma, mode: &FillMode, walls: &mut [Edge; 2], first_scan: i64, mut scans: i64) {
    let mut cursor = dma.reserve(8);
    cursor.push(tag::START_X_DOM, walls[RIGHT].x as u32);
    cursor.push(tag::START_X_SUB, walls[LEFT].x as u32);
    cursor.push(tag::START_Y, fixed(first_scan) as u32);
    cursor.push(tag::RENDER, mode.render);
    dma.commit(cursor);

    let [right, left] = *walls;
    if (left.error_up | right.error_up) == 0 && (left.x_advance | right.x_advance) == 0 && scans > 1 {
        // Both walls vertical
        let mut cursor = dma.reserve(2);
        cursor.push(tag::CONTINUE, scans as u32);
        dma.commit(cursor);
        return;
    }

    let mut message = tag::CONTINUE;
    loop {
        let mut cursor = dma.reserve(2);
        cursor.push(message, 1);
        dma.commit(cursor);

        let right_moved = walls[RIGHT].step_scanline();
        let left_moved = walls[LEFT].step_scanline();
        scans -= 1;
        if scans == 0 {
            break;
        }

        if right_moved {
            if left_moved {
                let mut cursor = dma.reserve(6);
                cursor.push(tag::START_X_SUB, walls[LEFT].x as u32);
                cursor.push(tag::CONTINUE_NEW_SUB, 0);
                cursor.push(tag::START_X_DOM, walls[RIGHT].x as u32);
                dma.commit(cursor);
            } else {
                let mut cursor = dma.reserve(2);
                cursor.push(tag::START_X_DOM, walls[RIGHT].x as u32);
                dma.commit(cursor);
            }
            message = tag::CONTINUE_NEW_DOM;
        } else if left_moved {
            let mut cursor = dma.reserve(2);
            cursor.push(tag::START_X_SUB, walls[LEFT].x as u32);
            dma.commit(cursor);
            message = tag::CONTINUE_NEW_SUB;
        }
    }
}
