//! Per-device configuration handed in at enable time

use crate::dma::{DMA_CMD_MIN_SIZE, DMA_CMD_SIZE};

/// Display device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    /// 0 = full acceleration; anything else keeps the transport in CPU
    /// emulation mode
    pub accel_level: u32,
    /// Bytes per pixel (1, 2 or 4)
    pub pel_size: u32,
    /// Refuse hardware DDA lines longer than the exactly-rasterized lengths
    pub conformant_lines: bool,
    /// Allow diagonal strips (the half-flip) in the strip path
    pub diagonal_strips: bool,
    /// Size requested for the DMA command buffer
    pub dma_buffer_bytes: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            accel_level: 0,
            pel_size: 4,
            conformant_lines: true,
            diagonal_strips: true,
            dma_buffer_bytes: DMA_CMD_SIZE,
        }
    }
}

impl DisplayConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !matches!(self.pel_size, 1 | 2 | 4) {
            return Err("unsupported pixel size");
        }
        if self.dma_buffer_bytes < DMA_CMD_MIN_SIZE {
            return Err("DMA buffer smaller than the minimum command buffer");
        }
        Ok(())
    }

    /// Replicate a pixel value across a 32-bit word (block fill color)
    pub fn replicate_color(&self, color: u32) -> u32 {
        match self.pel_size {
            1 => {
                let c = color & 0xff;
                c | (c << 8) | (c << 16) | (c << 24)
            }
            2 => {
                let c = color & 0xffff;
                c | (c << 16)
            }
            _ => color,
        }
    }
}
