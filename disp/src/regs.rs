//! Permedia2 register map
//!
//! Two address spaces:
//!
//! ```text
//!   control aperture   byte offsets, read/written directly over the bus
//!   GP tags            small register numbers carried through the input
//!                      FIFO (or DMA) as tag/data word pairs
//! ```

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL REGISTERS (byte offsets into the control aperture)
// ═══════════════════════════════════════════════════════════════════════════════

pub const RESET_STATUS: u32 = 0x0000;
pub const INT_ENABLE: u32 = 0x0008;
/// Pending interrupt sources; write 1s to acknowledge
pub const INT_FLAGS: u32 = 0x0010;
/// Free entries in the input FIFO
pub const IN_FIFO_SPACE: u32 = 0x0018;
/// Words waiting in the output FIFO
pub const OUT_FIFO_WORDS: u32 = 0x0020;
/// Bus address of the next DMA transfer
pub const IN_DMA_ADDRESS: u32 = 0x0028;
/// Writing starts a transfer of this many words; reads back the words left
pub const IN_DMA_COUNT: u32 = 0x0030;
pub const ERROR_FLAGS: u32 = 0x0038;
pub const DMA_CONTROL: u32 = 0x0060;
pub const FIFO_DISCON: u32 = 0x0068;
/// Writes feed the input FIFO, reads drain the output FIFO
pub const FIFO_INTERFACE: u32 = 0x2000;
/// Last line of vertical blank
pub const VB_END: u32 = 0x3040;
/// Current display line
pub const LINE_COUNT: u32 = 0x3070;

// Interrupt sources (IntEnable / IntFlags)
pub const INTR_DMA: u32 = 1 << 0;
pub const INTR_SYNC: u32 = 1 << 1;
pub const INTR_ERROR: u32 = 1 << 3;
pub const INTR_VSYNC: u32 = 1 << 4;

pub const FIFODISCON_ENABLE: u32 = 1 << 0;
/// Graphics processor still working on queued primitives
pub const FIFODISCON_GP_ACTIVE: u32 = 1 << 31;

// ═══════════════════════════════════════════════════════════════════════════════
// GRAPHICS PROCESSOR TAGS
// ═══════════════════════════════════════════════════════════════════════════════

pub mod tag {
    // Rasterizer DDA
    pub const START_X_DOM: u32 = 0x000;
    pub const D_X_DOM: u32 = 0x001;
    pub const START_X_SUB: u32 = 0x002;
    pub const D_X_SUB: u32 = 0x003;
    pub const START_Y: u32 = 0x004;
    pub const D_Y: u32 = 0x005;
    pub const COUNT: u32 = 0x006;
    pub const RENDER: u32 = 0x007;
    pub const CONTINUE_NEW_LINE: u32 = 0x008;
    pub const CONTINUE_NEW_DOM: u32 = 0x009;
    pub const CONTINUE_NEW_SUB: u32 = 0x00A;
    pub const CONTINUE: u32 = 0x00B;

    // Scissor and stipple
    pub const SCISSOR_MODE: u32 = 0x030;
    pub const SCISSOR_MIN_XY: u32 = 0x031;
    pub const SCISSOR_MAX_XY: u32 = 0x032;
    pub const AREA_STIPPLE_MODE: u32 = 0x034;
    pub const AREA_STIPPLE_PATTERN0: u32 = 0x040;
    pub const AREA_STIPPLE_PATTERN7: u32 = 0x047;

    // Color and framebuffer units
    pub const TEXTURE_COLOR_MODE: u32 = 0x0D0;
    pub const FOG_MODE: u32 = 0x0D2;
    pub const COLOR_DDA_MODE: u32 = 0x0FC;
    pub const CONSTANT_COLOR: u32 = 0x0FD;
    pub const LOGICAL_OP_MODE: u32 = 0x105;
    pub const FB_WRITE_DATA: u32 = 0x106;
    pub const FB_READ_MODE: u32 = 0x150;
    pub const FB_WINDOW_BASE: u32 = 0x156;
    pub const FB_BLOCK_COLOR: u32 = 0x159;

    // Host-out path
    pub const FILTER_MODE: u32 = 0x180;
    pub const SYNC: u32 = 0x188;

    pub const DELTA_MODE: u32 = 0x260;
}

// Input FIFO tag word: tag | mode << 14 | (count - 1) << 16
pub const TAG_MASK: u32 = 0x7ff;
pub const TAG_MODE_SHIFT: u32 = 14;
pub const TAG_MODE_HOLD: u32 = 0;
pub const TAG_MODE_INCREMENT: u32 = 1;
pub const TAG_COUNT_SHIFT: u32 = 16;

/// Header for `count` data words all written to `tag`
#[inline]
pub const fn hold_tag(tag: u32, count: u32) -> u32 {
    tag | ((count - 1) << TAG_COUNT_SHIFT)
}

/// Header for `count` data words written to `tag`, `tag + 1`, ...
#[inline]
pub const fn increment_tag(tag: u32, count: u32) -> u32 {
    tag | (TAG_MODE_INCREMENT << TAG_MODE_SHIFT) | ((count - 1) << TAG_COUNT_SHIFT)
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODE REGISTER BITS
// ═══════════════════════════════════════════════════════════════════════════════

pub const DISABLE: u32 = 0;

// Render command
pub const RENDER_AREA_STIPPLE_ENABLE: u32 = 1 << 0;
pub const RENDER_FAST_FILL_ENABLE: u32 = 1 << 3;
pub const RENDER_PRIMITIVE_SHIFT: u32 = 6;
pub const RENDER_PRIMITIVE_MASK: u32 = 3 << RENDER_PRIMITIVE_SHIFT;
pub const RENDER_LINE_PRIMITIVE: u32 = 0 << RENDER_PRIMITIVE_SHIFT;
pub const RENDER_TRAPEZOID_PRIMITIVE: u32 = 1 << RENDER_PRIMITIVE_SHIFT;

// ScissorMode
pub const USER_SCISSOR_ENABLE: u32 = 1 << 0;
pub const SCREEN_SCISSOR_ENABLE: u32 = 1 << 1;
pub const SCREEN_SCISSOR_DEFAULT: u32 = SCREEN_SCISSOR_ENABLE;
pub const SCISSOR_XOFFSET: u32 = 0;
pub const SCISSOR_YOFFSET: u32 = 16;

/// Pack a scissor corner
#[inline]
pub const fn scissor_xy(x: i32, y: i32) -> u32 {
    ((x as u32 & 0xffff) << SCISSOR_XOFFSET) | ((y as u32 & 0xffff) << SCISSOR_YOFFSET)
}

// ColorDDAMode
pub const COLOR_DDA_FLAT_SHADE: u32 = 1 << 0;

// LogicalOpMode
pub const LOGICOP_ENABLE: u32 = 1 << 0;
pub const LOGICOP_SHIFT: u32 = 1;
/// Write FBWriteData straight to memory, bypassing the color path
pub const CONSTANT_FB_WRITE: u32 = 1 << 5;

#[inline]
pub const fn enabled_logical_op(op: u32) -> u32 {
    (op << LOGICOP_SHIFT) | LOGICOP_ENABLE
}

// FBReadMode
pub const FBREAD_SOURCE_ENABLE: u32 = 1 << 9;
pub const FBREAD_DEST_ENABLE: u32 = 1 << 10;

// AreaStippleMode (8x8 pattern)
pub const AREA_STIPPLE_ENABLE: u32 = 1 << 0;
pub const AREA_STIPPLE_8X8: u32 = (2 << 1) | (2 << 4);
pub const AREA_STIPPLE_XOFFSET_SHIFT: u32 = 7;
pub const AREA_STIPPLE_YOFFSET_SHIFT: u32 = 12;
pub const AREA_STIPPLE_INVERT: u32 = 1 << 17;

/// Stipple mode with the pattern shifted by (x, y)
#[inline]
pub const fn area_stipple_mode(x_offset: u32, y_offset: u32) -> u32 {
    AREA_STIPPLE_ENABLE
        | AREA_STIPPLE_8X8
        | ((x_offset & 7) << AREA_STIPPLE_XOFFSET_SHIFT)
        | ((y_offset & 7) << AREA_STIPPLE_YOFFSET_SHIFT)
}

// FilterMode: pass Sync tags through to the output FIFO
pub const FILTER_MODE_PASS_SYNC: u32 = 0x400;
