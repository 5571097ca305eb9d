//! Transport capability seam and the trust-gated link facade.

use log::warn;
use sideband_hw::{Bdf, MmioOps, PciCfg, TickSource};

use crate::doorbell::DoorbellTransport;
use crate::error::{LinkError, Result};
use crate::msg::CommandHeader;
use crate::ring::RingTransport;
use crate::trust::{allowed_messages, hidden_devices, BootPath, FirmwareStatus, HiddenDevices};

/// What every transport variant offers. The variant is chosen when the link
/// handle is constructed, never per call.
pub trait Transport {
    /// Transmit one logical message.
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Receive one logical message; `blocking` only changes the wait for the
    /// first packet.
    fn receive(&mut self, blocking: bool, buf: &mut [u8]) -> Result<usize>;

    /// Re-synchronize the link after a failure or abandoned call.
    fn reset(&mut self) -> Result<()>;
}

impl<M: MmioOps, T: TickSource> Transport for RingTransport<M, T> {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        RingTransport::send(self, payload)
    }

    fn receive(&mut self, blocking: bool, buf: &mut [u8]) -> Result<usize> {
        RingTransport::receive(self, blocking, buf)
    }

    fn reset(&mut self) -> Result<()> {
        RingTransport::reset(self)
    }
}

impl<M: MmioOps, T: TickSource> Transport for DoorbellTransport<M, T> {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        DoorbellTransport::send(self, payload)
    }

    fn receive(&mut self, blocking: bool, buf: &mut [u8]) -> Result<usize> {
        DoorbellTransport::receive(self, blocking, buf)
    }

    fn reset(&mut self) -> Result<()> {
        DoorbellTransport::reset(self)
    }
}

/// Source of the controller's trust status words.
pub trait StatusSource {
    fn firmware_status(&mut self) -> Result<FirmwareStatus>;
}

/// Configuration-space offsets of the controller's status words.
pub const CFG_VENDOR_ID: u16 = 0x00;
pub const CFG_FW_STATUS1: u16 = 0x40;
pub const CFG_FW_STATUS2: u16 = 0x48;

const VENDOR_ABSENT: u16 = 0xFFFF;

/// Reads the status words from the companion device's PCI function.
#[derive(Debug)]
pub struct PciStatusSource<P: PciCfg> {
    cfg: P,
    bdf: Bdf,
}

impl<P: PciCfg> PciStatusSource<P> {
    pub fn new(cfg: P, bdf: Bdf) -> Self {
        Self { cfg, bdf }
    }
}

impl<P: PciCfg> StatusSource for PciStatusSource<P> {
    fn firmware_status(&mut self) -> Result<FirmwareStatus> {
        if self.cfg.cfg_read16(self.bdf, CFG_VENDOR_ID) == VENDOR_ABSENT {
            return Err(LinkError::DeviceAbsent);
        }
        Ok(FirmwareStatus {
            status1: self.cfg.cfg_read32(self.bdf, CFG_FW_STATUS1),
            status2: self.cfg.cfg_read32(self.bdf, CFG_FW_STATUS2),
        })
    }
}

/// Trust-gated message link.
///
/// Every outbound message is checked against the allowance mask of the boot
/// path computed at that moment; a blocked message fails with
/// [`LinkError::Unsupported`] before any transport register is touched.
#[derive(Debug)]
pub struct GatedLink<T: Transport, S: StatusSource> {
    transport: T,
    status: S,
}

impl<T: Transport, S: StatusSource> GatedLink<T, S> {
    pub fn new(transport: T, status: S) -> Self {
        Self { transport, status }
    }

    /// Current boot path, derived fresh from the status registers.
    pub fn boot_path(&mut self) -> Result<BootPath> {
        Ok(self.status.firmware_status()?.boot_path())
    }

    /// Devices the platform must hide given the current boot path.
    pub fn hidden_devices(&mut self) -> Result<HiddenDevices> {
        Ok(hidden_devices(self.boot_path()?))
    }

    /// Sends a catalog message (command header plus body).
    pub fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        let header = CommandHeader::parse(payload)?;
        let path = self.boot_path()?;
        let category = header.category();
        if !allowed_messages(path).contains(category) {
            warn!(
                "link policy: {category:?} blocked on {path:?} (group {:#04x} command {:#04x})",
                header.group, header.command
            );
            return Err(LinkError::Unsupported);
        }
        self.transport.send(payload)
    }

    pub fn receive(&mut self, blocking: bool, buf: &mut [u8]) -> Result<usize> {
        self.transport.receive(blocking, buf)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.transport.reset()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
