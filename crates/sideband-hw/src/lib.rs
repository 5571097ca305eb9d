//! Hardware access capabilities for the sideband link.
//!
//! The transport crates never touch hardware directly; they are written
//! against the traits in this crate so tests can substitute scripted fakes
//! for the memory-mapped register file, the PCI configuration space, and the
//! free-running timer.

#![forbid(unsafe_code)]

use std::cell::Cell;
use std::rc::Rc;

/// 32-bit memory-mapped register access at an offset from a device base.
///
/// Reads take `&mut self` because several registers have read side effects
/// (the circular-buffer read window pops one word per access).
pub trait MmioOps {
    fn read32(&mut self, offset: u64) -> u32;
    fn write32(&mut self, offset: u64, value: u32);
}

impl<T: MmioOps + ?Sized> MmioOps for &mut T {
    fn read32(&mut self, offset: u64) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: u64, value: u32) {
        (**self).write32(offset, value)
    }
}

/// PCI bus/device/function address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bdf {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl Bdf {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self { bus, device, function }
    }
}

/// PCI configuration space accessor.
pub trait PciCfg {
    fn cfg_read8(&mut self, bdf: Bdf, offset: u16) -> u8;
    fn cfg_read16(&mut self, bdf: Bdf, offset: u16) -> u16;
    fn cfg_read32(&mut self, bdf: Bdf, offset: u16) -> u32;
    fn cfg_write8(&mut self, bdf: Bdf, offset: u16, value: u8);
    fn cfg_write16(&mut self, bdf: Bdf, offset: u16, value: u16);
    fn cfg_write32(&mut self, bdf: Bdf, offset: u16, value: u32);

    /// Read-modify-write of a 32-bit config register.
    fn cfg_update32(&mut self, bdf: Bdf, offset: u16, clear: u32, set: u32) {
        let v = self.cfg_read32(bdf, offset);
        self.cfg_write32(bdf, offset, (v & !clear) | set);
    }
}

/// A fixed-rate, free-running, wrapping 32-bit counter.
///
/// The counter is the only notion of time the link has; all deadlines are
/// expressed as counter values and compared wrap-safely.
pub trait TickSource {
    /// Current counter value. Wraps at `u32::MAX`.
    fn now(&self) -> u32;

    /// Counter increments per second.
    fn frequency_hz(&self) -> u64;
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn now(&self) -> u32 {
        (**self).now()
    }

    fn frequency_hz(&self) -> u64 {
        (**self).frequency_hz()
    }
}

/// Deterministic tick source for tests.
///
/// Clones share the same underlying counter, so a test can hold one handle
/// to advance time while the code under test holds another. An optional
/// `step` advances the counter on every read, which lets bounded polling
/// loops reach their deadline against an otherwise idle fake.
#[derive(Debug, Clone)]
pub struct ManualTicks {
    ticks: Rc<Cell<u32>>,
    step: u32,
    hz: u64,
}

impl ManualTicks {
    pub const DEFAULT_HZ: u64 = 1_000_000;

    /// A counter that only moves when `advance`/`set` is called.
    pub fn new() -> Self {
        Self::with_step(0)
    }

    /// A counter that additionally advances by `step` on every `now()` read.
    pub fn with_step(step: u32) -> Self {
        Self {
            ticks: Rc::new(Cell::new(0)),
            step,
            hz: Self::DEFAULT_HZ,
        }
    }

    pub fn advance(&self, ticks: u32) {
        self.ticks.set(self.ticks.get().wrapping_add(ticks));
    }

    pub fn set(&self, ticks: u32) {
        self.ticks.set(ticks);
    }

    pub fn get(&self) -> u32 {
        self.ticks.get()
    }
}

impl Default for ManualTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for ManualTicks {
    fn now(&self) -> u32 {
        let t = self.ticks.get();
        self.ticks.set(t.wrapping_add(self.step));
        t
    }

    fn frequency_hz(&self) -> u64 {
        self.hz
    }
}
