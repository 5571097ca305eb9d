//! Scripted fake hardware for driving the transports end to end.
//!
//! `RingSim` models the ring-link register file with a cooperative peer:
//! writes to the TX window land in a bounded word buffer, interrupt-generate
//! makes the peer consume (and optionally echo) whole packets, and the ready
//! flags can be scripted to drop mid-transaction. `DoorbellSim` models the
//! single-slot doorbell block with a queue of scripted inbound events.

// Each integration test binary uses a different slice of this module.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use sideband_hw::{Bdf, MmioOps, PciCfg};
use sideband_link::packet::{words_for, PacketHeader};
use sideband_link::regs::{
    Doorbell, REG_HOST_CSR, REG_HOST_COMM, REG_IN_DOORBELL, REG_IN_MSG, REG_OUT_DOORBELL,
    REG_OUT_MSG, REG_PEER_CSR, REG_REF_CLOCK, REG_RX_WINDOW, REG_TX_WINDOW,
};

const CSR_INT_GENERATE: u32 = 1 << 2;
const CSR_READY: u32 = 1 << 3;
const CSR_RESET: u32 = 1 << 4;

#[derive(Default)]
pub struct RingState {
    pub depth: u8,

    // Host-owned buffer (our TX). The peer consumes from the front.
    tx: VecDeque<u32>,
    tx_w: u8,
    tx_r: u8,

    // Controller-owned buffer (our RX).
    rx: VecDeque<u32>,
    rx_w: u8,
    rx_r: u8,

    pub host_ready: bool,
    pub peer_ready: bool,

    /// Peer consumes TX packets when interrupt-generate is set.
    pub consume_tx: bool,
    /// Consumed packets are echoed back into RX, respecting RX depth.
    pub echo: bool,
    /// Drop the peer ready flag after this many interrupt-generate writes.
    pub ready_drops_after_ig: Option<usize>,

    /// Header + payload words of every packet the peer consumed.
    pub tx_packets: Vec<(PacketHeader, Vec<u32>)>,
    echo_backlog: VecDeque<u32>,

    pub write_count: usize,
}

/// Shared handle to the ring-link fake; clones see the same registers.
#[derive(Clone)]
pub struct RingSim {
    state: Rc<RefCell<RingState>>,
}

impl RingSim {
    pub fn new(depth: u8) -> Self {
        let state = RingState {
            depth,
            host_ready: true,
            peer_ready: true,
            consume_tx: true,
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn state(&self) -> std::cell::RefMut<'_, RingState> {
        self.state.borrow_mut()
    }

    /// Enqueues one inbound packet as the controller would have written it.
    pub fn push_rx_packet(&self, source: u8, dest: u8, payload: &[u8], complete: bool) {
        let header = PacketHeader::new(source, dest, payload.len(), complete).unwrap();
        let mut s = self.state.borrow_mut();
        s.push_rx_word(header.encode());
        for chunk in payload.chunks(4) {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            s.push_rx_word(u32::from_le_bytes(bytes));
        }
    }

    /// Forces inconsistent RX pointers (more filled slots than the depth).
    pub fn corrupt_rx_pointers(&self) {
        let mut s = self.state.borrow_mut();
        s.rx_r = 0;
        s.rx_w = s.depth.wrapping_add(10);
    }
}

impl RingState {
    fn push_rx_word(&mut self, word: u32) {
        if self.rx.len() < usize::from(self.depth) {
            self.rx.push_back(word);
            self.rx_w = self.rx_w.wrapping_add(1);
        } else {
            // RX is bounded like the real hardware; overflow waits in the
            // backlog until the host drains words.
            self.echo_backlog.push_back(word);
        }
    }

    /// Refills RX from the echo backlog without exceeding the buffer depth.
    fn pump_echo(&mut self) {
        while !self.echo_backlog.is_empty() && self.rx.len() < usize::from(self.depth) {
            let word = self.echo_backlog.pop_front().unwrap();
            self.push_rx_word(word);
        }
    }

    /// Peer's interrupt service: consume whole packets from TX.
    fn service_peer(&mut self) {
        if !self.consume_tx {
            return;
        }
        while let Some(&hdr_word) = self.tx.front() {
            let header = PacketHeader::decode(hdr_word);
            let words = header.payload_words();
            if self.tx.len() < 1 + words {
                break;
            }
            self.tx.pop_front();
            let payload: Vec<u32> = (0..words).map(|_| self.tx.pop_front().unwrap()).collect();
            self.tx_r = self.tx_r.wrapping_add(1 + words as u8);
            if self.echo {
                self.echo_backlog.push_back(hdr_word);
                self.echo_backlog.extend(payload.iter().copied());
            }
            self.tx_packets.push((header, payload));
        }
        self.pump_echo();
    }

    fn host_csr(&self) -> u32 {
        (u32::from(self.depth) << 24)
            | (u32::from(self.tx_w) << 16)
            | (u32::from(self.tx_r) << 8)
            | if self.host_ready { CSR_READY } else { 0 }
    }

    fn peer_csr(&self) -> u32 {
        (u32::from(self.depth) << 24)
            | (u32::from(self.rx_w) << 16)
            | (u32::from(self.rx_r) << 8)
            | if self.peer_ready { CSR_READY } else { 0 }
    }
}

impl MmioOps for RingSim {
    fn read32(&mut self, offset: u64) -> u32 {
        let mut s = self.state.borrow_mut();
        match offset {
            REG_HOST_CSR => s.host_csr(),
            REG_PEER_CSR => {
                s.pump_echo();
                s.peer_csr()
            }
            REG_RX_WINDOW => {
                s.pump_echo();
                match s.rx.pop_front() {
                    Some(word) => {
                        s.rx_r = s.rx_r.wrapping_add(1);
                        word
                    }
                    None => 0,
                }
            }
            _ => 0,
        }
    }

    fn write32(&mut self, offset: u64, value: u32) {
        let mut s = self.state.borrow_mut();
        s.write_count += 1;
        match offset {
            REG_TX_WINDOW => {
                if s.tx.len() < usize::from(s.depth) {
                    s.tx.push_back(value);
                    s.tx_w = s.tx_w.wrapping_add(1);
                }
            }
            REG_HOST_CSR => {
                if value & CSR_RESET != 0 {
                    // Peer observes our reset request, tears down both
                    // buffers and comes back ready.
                    s.host_ready = false;
                    s.tx.clear();
                    s.rx.clear();
                    s.echo_backlog.clear();
                    s.tx_w = 0;
                    s.tx_r = 0;
                    s.rx_w = 0;
                    s.rx_r = 0;
                    s.peer_ready = true;
                } else {
                    s.host_ready = value & CSR_READY != 0;
                }
                if value & CSR_INT_GENERATE != 0 {
                    s.service_peer();
                    if let Some(n) = s.ready_drops_after_ig {
                        if n <= 1 {
                            s.peer_ready = false;
                            s.ready_drops_after_ig = None;
                        } else {
                            s.ready_drops_after_ig = Some(n - 1);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

#[derive(Default)]
pub struct DoorbellState {
    pub comm: u32,
    pub ref_clock: u32,
    out_db: u32,
    in_db: u32,
    out_msg: [u32; 32],
    in_msg: [u32; 32],

    /// Scripted inbound events: doorbell word plus message-window payload.
    pending: VecDeque<(u32, Vec<u32>)>,
    /// Responses to each outbound management doorbell, in order.
    pub mng_script: VecDeque<Vec<u32>>,
    /// Peer clears our outbound busy bit (set false to provoke timeouts).
    pub consume_outbound: bool,
    /// Peer acknowledges message-protocol chunks with a completion event.
    pub ack_msgs: bool,

    /// Every outbound doorbell with its payload-window snapshot.
    pub outbound_log: Vec<(u32, Vec<u32>)>,
    /// Reassembled message-protocol payload bytes the peer received.
    pub received: Vec<u8>,
}

/// Shared handle to the doorbell fake.
#[derive(Clone)]
pub struct DoorbellSim {
    state: Rc<RefCell<DoorbellState>>,
}

// Mirror of the management sub-protocol values in `sideband_link::doorbell`.
pub const PROTO_MSG: u8 = 1;
pub const PROTO_MNG: u8 = 3;
pub const MNG_COMPLETION: u8 = 0x2;
pub const MNG_RESET_ACK: u8 = 0x3;
pub const MSG_COMPLETE: u8 = 0x1;

pub fn mng_event(command: u8) -> u32 {
    Doorbell::new(0, PROTO_MNG, command).0
}

impl DoorbellSim {
    pub fn new() -> Self {
        let state = DoorbellState {
            consume_outbound: true,
            ack_msgs: true,
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn state(&self) -> std::cell::RefMut<'_, DoorbellState> {
        self.state.borrow_mut()
    }

    /// Scripts the two-cycle init handshake (ack kinds per cycle).
    pub fn script_init(&self, first: u8, second: u8) {
        let mut s = self.state.borrow_mut();
        s.mng_script.push_back(vec![mng_event(first), mng_event(first)]);
        s.mng_script.push_back(vec![mng_event(second), mng_event(second)]);
    }

    /// Enqueues one inbound message-protocol packet.
    pub fn push_msg(&self, payload: &[u8], complete: bool) {
        let command = if complete { MSG_COMPLETE } else { 0 };
        let db = Doorbell::new(payload.len(), PROTO_MSG, command).0;
        let words: Vec<u32> = payload
            .chunks(4)
            .map(|chunk| {
                let mut bytes = [0u8; 4];
                bytes[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(bytes)
            })
            .collect();
        self.state.borrow_mut().pending.push_back((db, words));
    }

    /// Enqueues a raw inbound doorbell word (for protocol-error scenarios).
    pub fn push_raw(&self, word: u32) {
        self.state.borrow_mut().pending.push_back((word, Vec::new()));
    }
}

impl MmioOps for DoorbellSim {
    fn read32(&mut self, offset: u64) -> u32 {
        let mut s = self.state.borrow_mut();
        match offset {
            REG_HOST_COMM => s.comm,
            REG_REF_CLOCK => s.ref_clock,
            REG_OUT_DOORBELL => s.out_db,
            REG_IN_DOORBELL => {
                if s.in_db == 0 {
                    if let Some((word, payload)) = s.pending.pop_front() {
                        for (i, w) in payload.iter().enumerate() {
                            s.in_msg[i] = *w;
                        }
                        s.in_db = word;
                    }
                }
                s.in_db
            }
            o if (REG_IN_MSG..REG_IN_MSG + 128).contains(&o) => {
                s.in_msg[((o - REG_IN_MSG) / 4) as usize]
            }
            o if (REG_OUT_MSG..REG_OUT_MSG + 128).contains(&o) => {
                s.out_msg[((o - REG_OUT_MSG) / 4) as usize]
            }
            _ => 0,
        }
    }

    fn write32(&mut self, offset: u64, value: u32) {
        let mut s = self.state.borrow_mut();
        match offset {
            REG_HOST_COMM => s.comm = value,
            REG_REF_CLOCK => s.ref_clock = value,
            REG_IN_DOORBELL => s.in_db = value,
            REG_OUT_DOORBELL => {
                s.out_db = value;
                let db = Doorbell(value);
                if !db.busy() {
                    return;
                }
                let words = words_for(db.length());
                let snapshot = s.out_msg[..words].to_vec();
                s.outbound_log.push((value, snapshot.clone()));

                if s.consume_outbound {
                    s.out_db = 0;
                } else {
                    return;
                }

                if db.protocol() == PROTO_MNG {
                    if let Some(events) = s.mng_script.pop_front() {
                        for word in events {
                            s.pending.push_back((word, Vec::new()));
                        }
                    }
                } else if db.protocol() == PROTO_MSG {
                    let mut bytes = Vec::with_capacity(db.length());
                    for word in &snapshot {
                        bytes.extend_from_slice(&word.to_le_bytes());
                    }
                    bytes.truncate(db.length());
                    s.received.extend_from_slice(&bytes);
                    if s.ack_msgs {
                        s.pending.push_back((mng_event(MNG_COMPLETION), Vec::new()));
                    }
                }
            }
            o if (REG_OUT_MSG..REG_OUT_MSG + 128).contains(&o) => {
                s.out_msg[((o - REG_OUT_MSG) / 4) as usize] = value;
            }
            _ => {}
        }
    }
}

/// PCI configuration space with one populated function.
///
/// The status words live behind shared cells so a test can degrade the
/// controller while a link handle owns the accessor.
pub struct FakePciCfg {
    pub bdf: Bdf,
    pub vendor: u16,
    status1: Rc<std::cell::Cell<u32>>,
    status2: Rc<std::cell::Cell<u32>>,
    pub writes: usize,
}

impl FakePciCfg {
    pub fn present(bdf: Bdf, status1: u32, status2: u32) -> Self {
        Self {
            bdf,
            vendor: 0x8086,
            status1: Rc::new(std::cell::Cell::new(status1)),
            status2: Rc::new(std::cell::Cell::new(status2)),
            writes: 0,
        }
    }

    pub fn absent(bdf: Bdf) -> Self {
        let mut cfg = Self::present(bdf, 0, 0);
        cfg.vendor = 0xFFFF;
        cfg
    }

    pub fn status1_handle(&self) -> Rc<std::cell::Cell<u32>> {
        self.status1.clone()
    }

    fn reg(&self, bdf: Bdf, offset: u16) -> u32 {
        if bdf != self.bdf || self.vendor == 0xFFFF {
            return u32::MAX;
        }
        match offset {
            0x00 => u32::from(self.vendor),
            0x40 => self.status1.get(),
            0x48 => self.status2.get(),
            _ => 0,
        }
    }
}

impl PciCfg for FakePciCfg {
    fn cfg_read8(&mut self, bdf: Bdf, offset: u16) -> u8 {
        (self.reg(bdf, offset & !0x3) >> ((offset & 0x3) * 8)) as u8
    }

    fn cfg_read16(&mut self, bdf: Bdf, offset: u16) -> u16 {
        (self.reg(bdf, offset & !0x3) >> ((offset & 0x2) * 8)) as u16
    }

    fn cfg_read32(&mut self, bdf: Bdf, offset: u16) -> u32 {
        self.reg(bdf, offset)
    }

    fn cfg_write8(&mut self, _bdf: Bdf, _offset: u16, _value: u8) {
        self.writes += 1;
    }

    fn cfg_write16(&mut self, _bdf: Bdf, _offset: u16, _value: u16) {
        self.writes += 1;
    }

    fn cfg_write32(&mut self, _bdf: Bdf, _offset: u16, _value: u32) {
        self.writes += 1;
    }
}
