//! Wire packet codec for the circular-buffer transport.
//!
//! A packet is one header word followed by the payload rounded up to whole
//! 32-bit words. Payload bytes ride little-endian; the pad bytes of the last
//! word are zero and excluded by the header length.

use crate::error::{LinkError, Result};

/// Bytes per buffer word.
pub const WORD_BYTES: usize = 4;

/// Largest payload a single packet header can describe (9-bit length).
pub const MAX_PACKET_BYTES: usize = 511;

const HDR_SOURCE_SHIFT: u32 = 0;
const HDR_DEST_SHIFT: u32 = 8;
const HDR_LENGTH_SHIFT: u32 = 16;
const HDR_LENGTH_MASK: u32 = 0x1FF;
const HDR_COMPLETE: u32 = 1 << 31;

/// Decoded packet header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub source: u8,
    pub dest: u8,
    /// Payload bytes in this packet (0–511).
    pub length: usize,
    /// Set on the final packet of a logical message. Clear promises at least
    /// one more packet belonging to the same message.
    pub complete: bool,
}

impl PacketHeader {
    pub fn new(source: u8, dest: u8, length: usize, complete: bool) -> Result<Self> {
        if length > MAX_PACKET_BYTES {
            return Err(LinkError::Unsupported);
        }
        Ok(Self { source, dest, length, complete })
    }

    pub fn encode(&self) -> u32 {
        (u32::from(self.source) << HDR_SOURCE_SHIFT)
            | (u32::from(self.dest) << HDR_DEST_SHIFT)
            | ((self.length as u32 & HDR_LENGTH_MASK) << HDR_LENGTH_SHIFT)
            | if self.complete { HDR_COMPLETE } else { 0 }
    }

    pub fn decode(word: u32) -> Self {
        Self {
            source: (word >> HDR_SOURCE_SHIFT) as u8,
            dest: (word >> HDR_DEST_SHIFT) as u8,
            length: ((word >> HDR_LENGTH_SHIFT) & HDR_LENGTH_MASK) as usize,
            complete: word & HDR_COMPLETE != 0,
        }
    }

    /// Buffer words occupied by this packet's payload.
    pub fn payload_words(&self) -> usize {
        words_for(self.length)
    }
}

/// Words needed to carry `len` payload bytes.
pub fn words_for(len: usize) -> usize {
    len.div_ceil(WORD_BYTES)
}

/// Packs payload bytes into little-endian words, zero-padding the tail.
pub fn pack_words(payload: &[u8]) -> impl Iterator<Item = u32> + '_ {
    payload.chunks(WORD_BYTES).map(|chunk| {
        let mut bytes = [0u8; WORD_BYTES];
        bytes[..chunk.len()].copy_from_slice(chunk);
        u32::from_le_bytes(bytes)
    })
}

/// Scatters one received word into `out`, dropping pad bytes past `out`.
pub fn unpack_word(word: u32, out: &mut [u8]) {
    let bytes = word.to_le_bytes();
    let n = out.len().min(WORD_BYTES);
    out[..n].copy_from_slice(&bytes[..n]);
}
