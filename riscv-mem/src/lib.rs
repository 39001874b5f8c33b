//! Guest address-space core for a RISC-V instruction-set simulator.
//!
//! Routes every load/store the execution engine issues to the device owning
//! the target physical address: sparse page-backed RAM, built-in MMIO
//! devices, or out-of-tree plugins registered through a stable C-ABI
//! vtable. CSR traffic bypasses the bus and goes through the [`cpu::Hart`]
//! accessors.
//!
//! The core is a functional (untimed) memory model. It holds no internal
//! locks: every access method takes `&mut self`, and an integrator sharing
//! a [`bus::Bus`] or [`dram::Dram`] between harts must serialize accesses
//! itself.

pub mod bus;
pub mod cpu;
pub mod devices;
pub mod dram;
pub mod plugin;

pub use bus::{Bus, Device};
pub use cpu::{Hart, Mode, Trap, Xlen};
pub use dram::{Dram, DramError, PAGE_SHIFT, PAGE_SIZE};
pub use plugin::{MmioPlugin, MmioPluginDevice, PluginError, PluginRegistry};
