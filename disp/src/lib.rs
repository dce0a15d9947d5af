//! Permedia2 display driver core
//!
//! Command transport, interrupt synchronization and the two accelerated
//! drawing paths (lines and polygon fills) of the 3Dlabs Permedia2.
//! Everything is written against `hw::DeviceRegisters`, so the same code
//! runs on the real chip or on the simulated one in `sim`.

#![cfg_attr(not(test), no_std)]
extern crate alloc;

// Ambient
#[macro_use]
pub mod logger;
pub mod console;
pub mod config;

// Chip access
pub mod regs;
pub mod hw;
pub mod interrupt;
pub mod dma; // ring buffer + FIFO emulation

// Geometry
pub mod fixed;
pub mod rop;
pub mod clip;

// Drawing
pub mod lines;
pub mod fill;
pub mod display;

// Register-level chip model
pub mod sim;

pub use clip::{ClipRegion, Rect};
pub use config::DisplayConfig;
pub use display::DisplayDevice;
pub use dma::{P2Dma, SharedDma};
pub use fill::{Fill, MonoBrush};
pub use fixed::{PointFix, PointL};
pub use lines::{LineStyle, StylePattern};
