//! Raster-op translation
//!
//! GDI hands out ROP3/ROP4 codes; the framebuffer unit only knows the 16
//! two-operand logic ops. Only pattern/destination ROPs can be expressed.

/// Hardware logic ops (the op number is the truth table, see `truth_index`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogicOp {
    Clear = 0,
    And = 1,
    AndReverse = 2,
    Copy = 3,
    AndInverted = 4,
    Noop = 5,
    Xor = 6,
    Or = 7,
    Nor = 8,
    Equiv = 9,
    Invert = 10,
    OrReverse = 11,
    CopyInverted = 12,
    OrInverted = 13,
    Nand = 14,
    Set = 15,
}

const ALL_OPS: [LogicOp; 16] = [
    LogicOp::Clear,
    LogicOp::And,
    LogicOp::AndReverse,
    LogicOp::Copy,
    LogicOp::AndInverted,
    LogicOp::Noop,
    LogicOp::Xor,
    LogicOp::Or,
    LogicOp::Nor,
    LogicOp::Equiv,
    LogicOp::Invert,
    LogicOp::OrReverse,
    LogicOp::CopyInverted,
    LogicOp::OrInverted,
    LogicOp::Nand,
    LogicOp::Set,
];

/// Bit of the op number holding the result for source bit `s`, dest bit `d`
#[inline]
const fn truth_index(s: u32, d: u32) -> u32 {
    ((1 - s) << 1) | (1 - d)
}

impl LogicOp {
    #[inline]
    pub fn from_bits(op: u32) -> LogicOp {
        ALL_OPS[(op & 15) as usize]
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Combine `src` into `dst` bitwise
    pub fn apply(self, src: u32, dst: u32) -> u32 {
        match self {
            LogicOp::Clear => 0,
            LogicOp::And => src & dst,
            LogicOp::AndReverse => src & !dst,
            LogicOp::Copy => src,
            LogicOp::AndInverted => !src & dst,
            LogicOp::Noop => dst,
            LogicOp::Xor => src ^ dst,
            LogicOp::Or => src | dst,
            LogicOp::Nor => !(src | dst),
            LogicOp::Equiv => !(src ^ dst),
            LogicOp::Invert => !dst,
            LogicOp::OrReverse => src | !dst,
            LogicOp::CopyInverted => !src,
            LogicOp::OrInverted => !src | dst,
            LogicOp::Nand => !(src & dst),
            LogicOp::Set => 0xffff_ffff,
        }
    }

    /// The result depends on what is already in the framebuffer
    pub fn reads_dest(self) -> bool {
        !matches!(
            self,
            LogicOp::Clear | LogicOp::Copy | LogicOp::CopyInverted | LogicOp::Set
        )
    }
}

/// Translate a ROP3 that only involves pattern and destination
pub fn rop3_to_logic_op(rop3: u8) -> Option<LogicOp> {
    let rop3 = rop3 as u32;
    // Bits at index P*4 + S*2 + D; reject anything that looks at S
    if ((rop3 >> 2) ^ rop3) & 0x33 != 0 {
        return None;
    }
    let mut op = 0;
    for p in 0..2 {
        for d in 0..2 {
            let bit = (rop3 >> (p * 4 + d)) & 1;
            op |= bit << truth_index(p, d);
        }
    }
    Some(LogicOp::from_bits(op))
}

/// Foreground (low byte) and background (high byte) of a ROP4
pub fn rop4_to_logic_ops(rop4: u32) -> Option<(LogicOp, LogicOp)> {
    let fg = rop3_to_logic_op((rop4 & 0xff) as u8)?;
    let bg = rop3_to_logic_op(((rop4 >> 8) & 0xff) as u8)?;
    Some((fg, bg))
}

// Common ROP3 codes
pub const ROP3_BLACKNESS: u8 = 0x00;
pub const ROP3_PATINVERT: u8 = 0x5a;
pub const ROP3_DSTINVERT: u8 = 0x55;
pub const ROP3_NOOP: u8 = 0xaa;
pub const ROP3_PATCOPY: u8 = 0xf0;
pub const ROP3_WHITENESS: u8 = 0xff;
pub const ROP3_SRCCOPY: u8 = 0xcc;

/// ROP4 with the same ROP3 in both halves
#[inline]
pub const fn rop4(fg: u8, bg: u8) -> u32 {
    ((bg as u32) << 8) | fg as u32
}
