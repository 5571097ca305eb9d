//! Full-duplex circular-buffer transport (primary controller link).
//!
//! Outbound messages are fragmented into packets sized to the hardware
//! buffer; inbound packets are drained into the caller's buffer with
//! truncation and overflow detection. The ready flags are the link's only
//! mutual-exclusion discipline: a clear controller-ready mid-transaction
//! means a reset happened underneath us and the transaction is void.

use log::{debug, trace, warn};
use sideband_hw::{MmioOps, TickSource};

use crate::error::{LinkError, Result};
use crate::packet::{self, PacketHeader, MAX_PACKET_BYTES, WORD_BYTES};
use crate::regs::{Csr, REG_HOST_CSR, REG_PEER_CSR, REG_RX_WINDOW, REG_TX_WINDOW};
use crate::timeout::{Timeout, RESET_TIMEOUT_US, WORD_FILL_TIMEOUT_US, XFER_TIMEOUT_US};

/// Fixed endpoint addresses for one ring link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Our address, written into the source field of outbound headers.
    pub host_addr: u8,
    /// The controller endpoint we address.
    pub peer_addr: u8,
}

/// Circular-buffer transport over an injected register file.
#[derive(Debug)]
pub struct RingTransport<M: MmioOps, T: TickSource> {
    mmio: M,
    ticks: T,
    cfg: RingConfig,
}

impl<M: MmioOps, T: TickSource> RingTransport<M, T> {
    pub fn new(mmio: M, ticks: T, cfg: RingConfig) -> Self {
        Self { mmio, ticks, cfg }
    }

    fn host_csr(&mut self) -> Csr {
        Csr(self.mmio.read32(REG_HOST_CSR))
    }

    fn peer_csr(&mut self) -> Csr {
        Csr(self.mmio.read32(REG_PEER_CSR))
    }

    fn write_host_csr(&mut self, csr: Csr) {
        self.mmio.write32(REG_HOST_CSR, csr.0);
    }

    /// Brings the link to Ready, performing the reset handshake if either
    /// side is not already signalling ready.
    pub fn init(&mut self) -> Result<()> {
        if self.host_csr().ready() && self.peer_csr().ready() {
            return Ok(());
        }
        self.reset()
    }

    /// Two-sided link reset handshake.
    ///
    /// Safe to retry from the top after any failure; every wait is bounded by
    /// the reset timeout.
    pub fn reset(&mut self) -> Result<()> {
        debug!("ring link: reset requested");
        let csr = self.host_csr().with_reset(true).with_int_generate(true);
        self.write_host_csr(csr);

        // Reset accepted: hardware drops our ready flag.
        self.wait_reset(|csr| !csr.ready(), Self::host_csr)?;
        // Controller finished its side and came back up.
        self.wait_reset(|csr| csr.ready(), Self::peer_csr)?;

        let csr = self
            .host_csr()
            .with_reset(false)
            .with_ready(true)
            .with_int_generate(true);
        self.write_host_csr(csr);
        debug!("ring link: reset complete");
        Ok(())
    }

    fn wait_reset(
        &mut self,
        done: impl Fn(Csr) -> bool,
        read: impl Fn(&mut Self) -> Csr,
    ) -> Result<()> {
        let timeout = Timeout::start(&self.ticks, RESET_TIMEOUT_US);
        loop {
            if done(read(self)) {
                return Ok(());
            }
            if timeout.expired(&self.ticks) {
                warn!("ring link: reset handshake timed out");
                return Err(LinkError::Timeout);
            }
        }
    }

    /// Largest payload one packet can carry on this link.
    fn packet_capacity(&mut self) -> usize {
        let depth = usize::from(self.host_csr().depth());
        // One word of each packet is the header; the 9-bit length field caps
        // the rest.
        depth.saturating_sub(1).saturating_mul(WORD_BYTES).min(MAX_PACKET_BYTES)
    }

    /// Sends one logical message, fragmenting as needed.
    ///
    /// On [`LinkError::NotReady`] the controller reset mid-transmission and
    /// the caller must [`RingTransport::reset`] before retrying; partial
    /// messages are never auto-resumed.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(LinkError::Unsupported);
        }
        if !self.peer_csr().ready() {
            return Err(LinkError::NotReady);
        }

        let capacity = self.packet_capacity();
        if capacity == 0 {
            return Err(LinkError::NotReady);
        }

        let chunks = payload.chunks(capacity);
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.enumerate() {
            self.send_packet(chunk, i == last)?;
        }
        Ok(())
    }

    fn send_packet(&mut self, chunk: &[u8], complete: bool) -> Result<()> {
        let header = PacketHeader::new(self.cfg.host_addr, self.cfg.peer_addr, chunk.len(), complete)?;
        let need = 1 + header.payload_words();

        let timeout = Timeout::start(&self.ticks, XFER_TIMEOUT_US);
        loop {
            let empty = self.host_csr().empty_slots()?;
            if usize::from(empty) >= need {
                break;
            }
            if timeout.expired(&self.ticks) {
                return Err(LinkError::Timeout);
            }
        }

        trace!(
            "ring link: tx packet len={} complete={}",
            chunk.len(),
            complete
        );
        self.mmio.write32(REG_TX_WINDOW, header.encode());
        for word in packet::pack_words(chunk) {
            self.mmio.write32(REG_TX_WINDOW, word);
        }
        let csr = self.host_csr().with_int_generate(true);
        self.write_host_csr(csr);

        // A reset may have hit while we were writing; the words we pushed are
        // then unverifiable.
        if !self.peer_csr().ready() {
            warn!("ring link: controller dropped ready mid-send");
            return Err(LinkError::NotReady);
        }
        Ok(())
    }

    /// Receives one logical message into `buf`, returning the byte count.
    ///
    /// Non-blocking mode only affects the wait for the first packet; once a
    /// multi-packet message has started it is always completed (or times
    /// out). Packets larger than the remaining space are fully drained from
    /// hardware and surfaced as [`LinkError::BufferTooSmall`].
    pub fn receive(&mut self, blocking: bool, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0usize;
        let mut truncated = false;
        let mut first = true;

        loop {
            let header = self.wait_packet(first, blocking)?;
            truncated |= self.drain_packet(&header, buf, &mut copied)?;

            // Tell the controller we consumed its words.
            let csr = self.host_csr().with_int_generate(true);
            self.write_host_csr(csr);

            if !self.peer_csr().ready() {
                warn!("ring link: controller dropped ready mid-receive");
                return Err(LinkError::NotReady);
            }

            if header.complete {
                break;
            }
            first = false;
        }

        if truncated {
            Err(LinkError::BufferTooSmall { copied })
        } else {
            Ok(copied)
        }
    }

    /// Waits for a packet header to appear and decodes it.
    fn wait_packet(&mut self, first: bool, blocking: bool) -> Result<PacketHeader> {
        // Once a multi-packet message has started, the continuation wait is
        // always the full transaction timeout, even for a non-blocking call.
        let micros = if first && !blocking { 0 } else { XFER_TIMEOUT_US };

        let timeout = Timeout::start(&self.ticks, micros);
        loop {
            if self.peer_csr().filled_slots()? > 0 {
                break;
            }
            if timeout.expired(&self.ticks) {
                return if first && !blocking {
                    Err(LinkError::NoData)
                } else {
                    Err(LinkError::Timeout)
                };
            }
        }

        let header = PacketHeader::decode(self.mmio.read32(REG_RX_WINDOW));
        let depth = usize::from(self.peer_csr().depth());
        if header.payload_words() > depth.saturating_sub(1) {
            return Err(LinkError::Protocol);
        }
        trace!(
            "ring link: rx packet len={} complete={}",
            header.length,
            header.complete
        );
        Ok(header)
    }

    /// Reads every payload word of `header` out of hardware, copying what
    /// fits into `buf` at `*copied`. Returns whether anything was dropped.
    fn drain_packet(
        &mut self,
        header: &PacketHeader,
        buf: &mut [u8],
        copied: &mut usize,
    ) -> Result<bool> {
        let mut truncated = false;
        let mut remaining = header.length;

        for _ in 0..header.payload_words() {
            // The controller may still be filling the buffer; give each word
            // its own bounded wait.
            let timeout = Timeout::start(&self.ticks, WORD_FILL_TIMEOUT_US);
            loop {
                if self.peer_csr().filled_slots()? > 0 {
                    break;
                }
                if timeout.expired(&self.ticks) {
                    return Err(LinkError::Timeout);
                }
            }

            let word = self.mmio.read32(REG_RX_WINDOW);
            let word_bytes = remaining.min(WORD_BYTES);
            let avail = buf.len() - *copied;
            let take = word_bytes.min(avail);
            if take > 0 {
                packet::unpack_word(word, &mut buf[*copied..*copied + take]);
                *copied += take;
            }
            if take < word_bytes {
                truncated = true;
            }
            remaining -= word_bytes;
        }
        Ok(truncated)
    }
}
