//! Upper-layer command header boundary.
//!
//! The transport never interprets message bodies; the only thing it reads is
//! the leading command header, and only to map the group/command pair onto a
//! message category for the allowance check.

use crate::error::{LinkError, Result};
use crate::trust::MessageCategories;

const CMD_GROUP_SHIFT: u32 = 0;
const CMD_COMMAND_SHIFT: u32 = 8;
const CMD_COMMAND_MASK: u32 = 0x7F;
const CMD_IS_RESPONSE: u32 = 1 << 15;
const CMD_RESULT_SHIFT: u32 = 24;

// Known command groups.
pub const GROUP_SYSTEM: u8 = 0x00;
pub const GROUP_SECURITY: u8 = 0x02;
pub const GROUP_UPDATE: u8 = 0x05;
pub const GROUP_GENERAL: u8 = 0xFF;

// System group commands.
pub const CMD_MEMORY_INIT_DONE: u8 = 0x01;
pub const CMD_SIZE_QUERY: u8 = 0x02;
pub const CMD_GLOBAL_RESET: u8 = 0x0B;
pub const CMD_END_OF_BOOT: u8 = 0x0C;

// Security group commands.
pub const CMD_COMMIT_SVN: u8 = 0x01;
pub const CMD_REVOKE_KEY: u8 = 0x02;

// General group commands.
pub const CMD_FW_VERSION: u8 = 0x02;

/// Common header every catalog message starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub group: u8,
    /// 7-bit command id.
    pub command: u8,
    pub is_response: bool,
    /// Result code; meaningful in responses only.
    pub result: u8,
}

impl CommandHeader {
    pub fn request(group: u8, command: u8) -> Self {
        Self {
            group,
            command: command & CMD_COMMAND_MASK as u8,
            is_response: false,
            result: 0,
        }
    }

    pub fn encode(&self) -> u32 {
        (u32::from(self.group) << CMD_GROUP_SHIFT)
            | ((u32::from(self.command) & CMD_COMMAND_MASK) << CMD_COMMAND_SHIFT)
            | if self.is_response { CMD_IS_RESPONSE } else { 0 }
            | (u32::from(self.result) << CMD_RESULT_SHIFT)
    }

    pub fn decode(word: u32) -> Self {
        Self {
            group: (word >> CMD_GROUP_SHIFT) as u8,
            command: ((word >> CMD_COMMAND_SHIFT) & CMD_COMMAND_MASK) as u8,
            is_response: word & CMD_IS_RESPONSE != 0,
            result: (word >> CMD_RESULT_SHIFT) as u8,
        }
    }

    /// Parses the header off the front of an outbound message buffer.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let bytes: [u8; 4] = payload
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(LinkError::Protocol)?;
        Ok(Self::decode(u32::from_le_bytes(bytes)))
    }

    /// Category used by the boot-path allowance check. Unknown pairs fall
    /// into the general category, which only fully-trusted paths allow.
    pub fn category(&self) -> MessageCategories {
        match (self.group, self.command) {
            (GROUP_SYSTEM, CMD_MEMORY_INIT_DONE) => MessageCategories::MEMORY_INIT_DONE,
            (GROUP_SYSTEM, CMD_SIZE_QUERY) => MessageCategories::SIZE_QUERY,
            (GROUP_SYSTEM, CMD_GLOBAL_RESET) => MessageCategories::GLOBAL_RESET,
            (GROUP_SYSTEM, CMD_END_OF_BOOT) => MessageCategories::END_OF_BOOT,
            (GROUP_SECURITY, CMD_COMMIT_SVN) => MessageCategories::SECURITY_VERSION,
            (GROUP_SECURITY, CMD_REVOKE_KEY) => MessageCategories::KEY_REVOCATION,
            (GROUP_UPDATE, _) => MessageCategories::FW_UPDATE,
            (GROUP_GENERAL, CMD_FW_VERSION) => MessageCategories::FW_VERSION,
            _ => MessageCategories::GENERAL,
        }
    }
}
