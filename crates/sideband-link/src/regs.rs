//! Register views for the two sideband register files.
//!
//! Layouts are expressed as const offsets and shift/mask accessors over plain
//! `u32` words; nothing here depends on compiler bitfield layout.

use crate::error::{LinkError, Result};

// Ring-link register block (primary controller).
//
// The TX window pushes one word into the host circular buffer per write and
// the hardware advances the host write pointer; the RX window pops one word
// from the controller's buffer per read and advances the host-side read
// pointer. The two control/status registers mirror the pointer state.
pub const REG_TX_WINDOW: u64 = 0x00;
pub const REG_HOST_CSR: u64 = 0x04;
pub const REG_RX_WINDOW: u64 = 0x08;
pub const REG_PEER_CSR: u64 = 0x0C;

const CSR_INT_ENABLE: u32 = 1 << 0;
const CSR_INT_STATUS: u32 = 1 << 1;
const CSR_INT_GENERATE: u32 = 1 << 2;
const CSR_READY: u32 = 1 << 3;
const CSR_RESET: u32 = 1 << 4;
const CSR_READ_PTR_SHIFT: u32 = 8;
const CSR_WRITE_PTR_SHIFT: u32 = 16;
const CSR_DEPTH_SHIFT: u32 = 24;

/// Control/status register of one side of the ring link.
///
/// Both the host-owned and the controller-owned instance use the same
/// encoding; only who may write them differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Csr(pub u32);

impl Csr {
    pub fn ready(self) -> bool {
        self.0 & CSR_READY != 0
    }

    pub fn reset(self) -> bool {
        self.0 & CSR_RESET != 0
    }

    pub fn int_status(self) -> bool {
        self.0 & CSR_INT_STATUS != 0
    }

    pub fn int_enabled(self) -> bool {
        self.0 & CSR_INT_ENABLE != 0
    }

    pub fn read_ptr(self) -> u8 {
        (self.0 >> CSR_READ_PTR_SHIFT) as u8
    }

    pub fn write_ptr(self) -> u8 {
        (self.0 >> CSR_WRITE_PTR_SHIFT) as u8
    }

    /// Buffer depth in 32-bit words.
    pub fn depth(self) -> u8 {
        (self.0 >> CSR_DEPTH_SHIFT) as u8
    }

    pub fn with_ready(self, on: bool) -> Self {
        self.with_bit(CSR_READY, on)
    }

    pub fn with_reset(self, on: bool) -> Self {
        self.with_bit(CSR_RESET, on)
    }

    pub fn with_int_generate(self, on: bool) -> Self {
        self.with_bit(CSR_INT_GENERATE, on)
    }

    pub fn with_int_enable(self, on: bool) -> Self {
        self.with_bit(CSR_INT_ENABLE, on)
    }

    fn with_bit(self, mask: u32, on: bool) -> Self {
        if on {
            Csr(self.0 | mask)
        } else {
            Csr(self.0 & !mask)
        }
    }

    /// Unread words currently in the buffer.
    ///
    /// Pointer arithmetic is mod 256; any result beyond the advertised depth
    /// means the pointers no longer describe a valid buffer.
    pub fn filled_slots(self) -> Result<u8> {
        let filled = self.write_ptr().wrapping_sub(self.read_ptr());
        if filled > self.depth() {
            return Err(LinkError::Overflow);
        }
        Ok(filled)
    }

    /// Words that can still be written without overrunning the reader.
    pub fn empty_slots(self) -> Result<u8> {
        Ok(self.depth() - self.filled_slots()?)
    }
}

// Doorbell register block (secondary coprocessor class).
pub const REG_HOST_COMM: u64 = 0x00;
pub const REG_REF_CLOCK: u64 = 0x04;
pub const REG_OUT_DOORBELL: u64 = 0x08;
pub const REG_IN_DOORBELL: u64 = 0x0C;
pub const REG_OUT_MSG: u64 = 0x10;
pub const REG_IN_MSG: u64 = 0x90;

/// Message window size, and therefore the largest single doorbell payload.
pub const DOORBELL_MAX_PAYLOAD: usize = 128;

pub const COMM_HOST_READY: u32 = 1 << 0;
pub const COMM_DRIVER_LOADED: u32 = 1 << 1;
pub const COMM_DRIVER_READY: u32 = 1 << 2;

const DB_LENGTH_MASK: u32 = 0x3FF;
const DB_PROTOCOL_SHIFT: u32 = 10;
const DB_PROTOCOL_MASK: u32 = 0xF;
const DB_COMMAND_SHIFT: u32 = 14;
const DB_COMMAND_MASK: u32 = 0xF;
const DB_BUSY: u32 = 1 << 31;

/// One doorbell word. Busy set means "new data present, unconsumed";
/// the consumer clears the whole register to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Doorbell(pub u32);

impl Doorbell {
    pub fn new(length: usize, protocol: u8, command: u8) -> Self {
        debug_assert!(length <= DB_LENGTH_MASK as usize);
        let w = (length as u32 & DB_LENGTH_MASK)
            | ((u32::from(protocol) & DB_PROTOCOL_MASK) << DB_PROTOCOL_SHIFT)
            | ((u32::from(command) & DB_COMMAND_MASK) << DB_COMMAND_SHIFT)
            | DB_BUSY;
        Doorbell(w)
    }

    pub fn busy(self) -> bool {
        self.0 & DB_BUSY != 0
    }

    /// Payload length in bytes (0–1023).
    pub fn length(self) -> usize {
        (self.0 & DB_LENGTH_MASK) as usize
    }

    pub fn protocol(self) -> u8 {
        ((self.0 >> DB_PROTOCOL_SHIFT) & DB_PROTOCOL_MASK) as u8
    }

    pub fn command(self) -> u8 {
        ((self.0 >> DB_COMMAND_SHIFT) & DB_COMMAND_MASK) as u8
    }
}
