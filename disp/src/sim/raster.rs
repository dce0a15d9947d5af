//! Graphics-processor side of the simulated chip: the tag/data decoder, the
//! register file and a rasterizer for the line and trapezoid primitives.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use embedded_graphics_core::{
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Size},
    pixelcolor::{Rgb888, RgbColor},
    Pixel,
};

use crate::regs::*;
use crate::rop::LogicOp;

const REGISTER_COUNT: usize = (TAG_MASK + 1) as usize;

// ═══════════════════════════════════════════════════════════════════════════════
// FRAMEBUFFER
// ═══════════════════════════════════════════════════════════════════════════════

/// Simulated video memory, one u32 per pixel, with a write counter per pixel
pub struct SimFramebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    writes: Vec<u32>,
}

impl SimFramebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            pixels: vec![0; len],
            writes: vec![0; len],
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        self.index(x, y).map(|i| self.pixels[i])
    }

    pub fn writes_at(&self, x: i32, y: i32) -> u32 {
        self.index(x, y).map(|i| self.writes[i]).unwrap_or(0)
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, value: u32) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = value;
            self.writes[i] += 1;
        }
    }

    /// Fill with `value` and forget the write history
    pub fn clear(&mut self, value: u32) {
        self.pixels.iter_mut().for_each(|p| *p = value);
        self.writes.iter_mut().for_each(|w| *w = 0);
    }

    /// Coordinates of every pixel that differs from `background`, row-major
    pub fn lit_pixels(&self, background: u32) -> Vec<(i32, i32)> {
        let w = self.width as usize;
        self.pixels
            .iter()
            .enumerate()
            .filter(|(_, &p)| p != background)
            .map(|(i, _)| ((i % w) as i32, (i / w) as i32))
            .collect()
    }

    /// Coordinates of every pixel written at least once, row-major
    pub fn written_pixels(&self) -> Vec<(i32, i32)> {
        let w = self.width as usize;
        self.writes
            .iter()
            .enumerate()
            .filter(|(_, &n)| n != 0)
            .map(|(i, _)| ((i % w) as i32, (i / w) as i32))
            .collect()
    }

    pub fn total_writes(&self) -> u64 {
        self.writes.iter().map(|&n| n as u64).sum()
    }

    pub fn max_writes(&self) -> u32 {
        self.writes.iter().copied().max().unwrap_or(0)
    }
}

impl OriginDimensions for SimFramebuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for SimFramebuffer {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            let value = ((color.r() as u32) << 16) | ((color.g() as u32) << 8) | color.b() as u32;
            self.set_pixel(coord.x, coord.y, value);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPRETER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum Decode {
    Header,
    Data { tag: u32, increment: bool, remaining: u32 },
}

/// Consumes the input FIFO word stream and drives the rasterizer
pub struct Interpreter {
    regs: Vec<u32>,
    decode: Decode,
    render: u32,
    xdom: i32,
    xsub: i32,
    y: i32,
    fb: SimFramebuffer,
    output: VecDeque<u32>,
    consumed: Vec<u32>,
}

impl Interpreter {
    pub fn new(width: u32, height: u32) -> Self {
        let mut regs = vec![0u32; REGISTER_COUNT];
        regs[tag::D_Y as usize] = 1 << 16;
        regs[tag::SCISSOR_MODE as usize] = SCREEN_SCISSOR_DEFAULT;
        Self {
            regs,
            decode: Decode::Header,
            render: 0,
            xdom: 0,
            xsub: 0,
            y: 0,
            fb: SimFramebuffer::new(width, height),
            output: VecDeque::new(),
            consumed: Vec::new(),
        }
    }

    pub fn framebuffer(&self) -> &SimFramebuffer {
        &self.fb
    }

    pub fn framebuffer_mut(&mut self) -> &mut SimFramebuffer {
        &mut self.fb
    }

    #[inline]
    pub fn register(&self, tag: u32) -> u32 {
        self.regs[(tag & TAG_MASK) as usize]
    }

    pub fn consumed(&self) -> &[u32] {
        &self.consumed
    }

    pub fn clear_consumed(&mut self) {
        self.consumed.clear();
    }

    /// True between a tag header and its last data word
    pub fn mid_packet(&self) -> bool {
        matches!(self.decode, Decode::Data { .. })
    }

    pub fn output_words(&self) -> usize {
        self.output.len()
    }

    pub fn pop_output(&mut self) -> Option<u32> {
        self.output.pop_front()
    }

    /// One word from the input FIFO
    pub fn feed(&mut self, word: u32) {
        self.consumed.push(word);
        match self.decode {
            Decode::Header => {
                let tag = word & TAG_MASK;
                let increment = (word >> TAG_MODE_SHIFT) & 3 == TAG_MODE_INCREMENT;
                let remaining = (word >> TAG_COUNT_SHIFT) + 1;
                self.decode = Decode::Data { tag, increment, remaining };
            }
            Decode::Data { tag, increment, remaining } => {
                self.decode = if remaining > 1 {
                    Decode::Data {
                        tag: if increment { (tag + 1) & TAG_MASK } else { tag },
                        increment,
                        remaining: remaining - 1,
                    }
                } else {
                    Decode::Header
                };
                self.write_register(tag, word);
            }
        }
    }

    fn write_register(&mut self, tag: u32, value: u32) {
        self.regs[tag as usize] = value;
        match tag {
            tag::RENDER => {
                self.render = value;
                self.xdom = self.register(tag::START_X_DOM) as i32;
                self.xsub = self.register(tag::START_X_SUB) as i32;
                self.y = self.register(tag::START_Y) as i32;
                let count = self.register(tag::COUNT) as i32;
                self.run(count);
            }
            tag::CONTINUE_NEW_LINE => {
                // A new line segment restarts on the pixel centre it ended on
                self.xdom = (self.xdom & !0xffff) | 0x7fff;
                self.y = (self.y & !0xffff) | 0x7fff;
                self.run(value as i32);
            }
            tag::CONTINUE => self.run(value as i32),
            tag::CONTINUE_NEW_DOM => {
                self.xdom = self.register(tag::START_X_DOM) as i32;
                self.run(value as i32);
            }
            tag::CONTINUE_NEW_SUB => {
                self.xsub = self.register(tag::START_X_SUB) as i32;
                self.run(value as i32);
            }
            tag::SYNC => {
                if self.register(tag::FILTER_MODE) & FILTER_MODE_PASS_SYNC != 0 {
                    self.output.push_back(tag::SYNC);
                }
            }
            _ => {}
        }
    }

    fn run(&mut self, count: i32) {
        if self.render & RENDER_PRIMITIVE_MASK == RENDER_TRAPEZOID_PRIMITIVE {
            self.trapezoid(count);
        } else {
            self.line(count);
        }
    }

    fn line(&mut self, count: i32) {
        let dx = self.register(tag::D_X_DOM) as i32;
        let dy = self.register(tag::D_Y) as i32;
        for _ in 0..count.max(0) {
            self.plot(self.xdom >> 16, self.y >> 16);
            self.xdom = self.xdom.wrapping_add(dx);
            self.y = self.y.wrapping_add(dy);
        }
    }

    fn trapezoid(&mut self, count: i32) {
        let ddom = self.register(tag::D_X_DOM) as i32;
        let dsub = self.register(tag::D_X_SUB) as i32;
        let dy = self.register(tag::D_Y) as i32;
        for _ in 0..count.max(0) {
            let row = self.y >> 16;
            let (a, b) = (self.xdom >> 16, self.xsub >> 16);
            for x in a.min(b)..a.max(b) {
                self.plot(x, row);
            }
            self.xdom = self.xdom.wrapping_add(ddom);
            self.xsub = self.xsub.wrapping_add(dsub);
            self.y = self.y.wrapping_add(dy);
        }
    }

    fn scissored(&self, x: i32, y: i32) -> bool {
        if self.register(tag::SCISSOR_MODE) & USER_SCISSOR_ENABLE == 0 {
            return false;
        }
        let min = self.register(tag::SCISSOR_MIN_XY);
        let max = self.register(tag::SCISSOR_MAX_XY);
        let field = |v: u32, shift: u32| ((v >> shift) & 0xffff) as u16 as i16 as i32;
        x < field(min, SCISSOR_XOFFSET)
            || y < field(min, SCISSOR_YOFFSET)
            || x >= field(max, SCISSOR_XOFFSET)
            || y >= field(max, SCISSOR_YOFFSET)
    }

    fn stippled_out(&self, x: i32, y: i32) -> bool {
        let mode = self.register(tag::AREA_STIPPLE_MODE);
        if self.render & RENDER_AREA_STIPPLE_ENABLE == 0 || mode & AREA_STIPPLE_ENABLE == 0 {
            return false;
        }
        let xoff = ((mode >> AREA_STIPPLE_XOFFSET_SHIFT) & 0x1f) as i32;
        let yoff = ((mode >> AREA_STIPPLE_YOFFSET_SHIFT) & 0x1f) as i32;
        let row = self.register(tag::AREA_STIPPLE_PATTERN0 + ((y + yoff) & 7) as u32);
        let mut bit = (row >> ((x + xoff) & 7)) & 1;
        if mode & AREA_STIPPLE_INVERT != 0 {
            bit ^= 1;
        }
        bit == 0
    }

    fn plot(&mut self, x: i32, y: i32) {
        if self.scissored(x, y) || self.stippled_out(x, y) {
            return;
        }
        let base = self.register(tag::FB_WINDOW_BASE) as i32;
        let width = self.fb.width() as i32;
        let (x, y) = if base != 0 && width != 0 {
            let linear = y * width + x + base;
            (linear.rem_euclid(width), linear.div_euclid(width))
        } else {
            (x, y)
        };

        let logic = self.register(tag::LOGICAL_OP_MODE);
        let color = if self.render & RENDER_FAST_FILL_ENABLE != 0 {
            self.register(tag::FB_BLOCK_COLOR)
        } else if logic & CONSTANT_FB_WRITE != 0 {
            self.register(tag::FB_WRITE_DATA)
        } else if logic & LOGICOP_ENABLE != 0 {
            let op = LogicOp::from_bits((logic >> LOGICOP_SHIFT) & 0xf);
            let dest = self.fb.pixel(x, y).unwrap_or(0);
            op.apply(self.register(tag::CONSTANT_COLOR), dest)
        } else {
            self.register(tag::CONSTANT_COLOR)
        };
        self.fb.set_pixel(x, y, color);
    }
}
