//! Boot-path classification and the policies derived from it.
//!
//! The companion controller publishes its trust/operational state through two
//! status words in PCI configuration space. Classification is recomputed from
//! those words on every query; the controller can reset or change mode
//! between any two calls, so nothing here is ever cached.

use bitflags::bitflags;

// Status word 1 layout.
const FWS1_CURRENT_STATE_MASK: u32 = 0xF;
const FWS1_FPT_BAD: u32 = 1 << 5;
const FWS1_ERROR_CODE_SHIFT: u32 = 12;
const FWS1_ERROR_CODE_MASK: u32 = 0xF;
const FWS1_OP_MODE_SHIFT: u32 = 16;
const FWS1_OP_MODE_MASK: u32 = 0xF;

// Status word 2 layout.
const FWS2_ENFORCEMENT_FLOW: u32 = 1 << 6;

/// Controller execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentState {
    Reset,
    Init,
    Recovery,
    Normal,
    Wait,
    Transition,
    Other(u8),
}

impl CurrentState {
    fn from_bits(v: u32) -> Self {
        match v {
            0 => Self::Reset,
            1 => Self::Init,
            2 => Self::Recovery,
            5 => Self::Normal,
            6 => Self::Wait,
            7 => Self::Transition,
            other => Self::Other(other as u8),
        }
    }
}

/// Controller error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    None,
    Uncategorized,
    Disabled,
    ImageFailure,
    Other(u8),
}

impl ErrorCode {
    fn from_bits(v: u32) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Uncategorized,
            2 => Self::Disabled,
            3 => Self::ImageFailure,
            other => Self::Other(other as u8),
        }
    }
}

/// Controller operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Normal,
    Debug,
    SoftTempDisable,
    SecoverJumper,
    SecoverMessage,
    Sps,
    Other(u8),
}

impl OperationMode {
    fn from_bits(v: u32) -> Self {
        match v {
            0 => Self::Normal,
            2 => Self::Debug,
            3 => Self::SoftTempDisable,
            4 => Self::SecoverJumper,
            5 => Self::SecoverMessage,
            0xF => Self::Sps,
            other => Self::Other(other as u8),
        }
    }
}

/// Raw status words, read fresh from configuration space per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareStatus {
    pub status1: u32,
    pub status2: u32,
}

impl FirmwareStatus {
    pub fn current_state(&self) -> CurrentState {
        CurrentState::from_bits(self.status1 & FWS1_CURRENT_STATE_MASK)
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_bits((self.status1 >> FWS1_ERROR_CODE_SHIFT) & FWS1_ERROR_CODE_MASK)
    }

    pub fn operation_mode(&self) -> OperationMode {
        OperationMode::from_bits((self.status1 >> FWS1_OP_MODE_SHIFT) & FWS1_OP_MODE_MASK)
    }

    pub fn partition_table_bad(&self) -> bool {
        self.status1 & FWS1_FPT_BAD != 0
    }

    pub fn enforcement_flow(&self) -> bool {
        self.status2 & FWS2_ENFORCEMENT_FLOW != 0
    }

    /// Derives the boot path. Priority-ordered; the first matching rule wins,
    /// so e.g. SPS mode with a pending error never classifies as `Sps`.
    pub fn boot_path(&self) -> BootPath {
        let mode = self.operation_mode();
        let error = self.error_code();
        let state = self.current_state();

        if mode == OperationMode::Sps && error == ErrorCode::None {
            return if state == CurrentState::Recovery {
                BootPath::SpsRecovery
            } else {
                BootPath::Sps
            };
        }
        if self.enforcement_flow() {
            return BootPath::EnforcementWithoutDidMsg;
        }
        match mode {
            OperationMode::Debug => return BootPath::DebugMode,
            OperationMode::SecoverJumper => return BootPath::SecoverJmpr,
            OperationMode::SoftTempDisable => return BootPath::SwTempDisable,
            OperationMode::SecoverMessage => return BootPath::SecoverMeiMsg,
            _ => {}
        }
        if error == ErrorCode::ImageFailure {
            return BootPath::ErrorWithoutDidMsg;
        }
        if state == CurrentState::Recovery {
            return BootPath::Recovery;
        }
        if self.partition_table_bad() || error != ErrorCode::None {
            return BootPath::Error;
        }
        BootPath::Normal
    }
}

/// Prioritized classification of the controller's trust/operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootPath {
    Sps,
    SpsRecovery,
    EnforcementWithoutDidMsg,
    DebugMode,
    SecoverJmpr,
    SwTempDisable,
    SecoverMeiMsg,
    ErrorWithoutDidMsg,
    Recovery,
    Error,
    Normal,
}

bitflags! {
    /// Secondary channels and manageability-presentation devices that must be
    /// hidden from the rest of the platform on a given boot path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HiddenDevices: u32 {
        const LINK2           = 1 << 0;
        const LINK3           = 1 << 1;
        const IDE_REDIRECT    = 1 << 2;
        const KEYBOARD_TEXT   = 1 << 3;
        const SERIAL_OVER_LAN = 1 << 4;
    }
}

impl HiddenDevices {
    /// The manageability-presentation trio.
    pub const PRESENTATION: Self = Self::IDE_REDIRECT
        .union(Self::KEYBOARD_TEXT)
        .union(Self::SERIAL_OVER_LAN);
}

bitflags! {
    /// Message categories that may be transmitted on a given boot path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageCategories: u32 {
        const MEMORY_INIT_DONE = 1 << 0;
        const SIZE_QUERY       = 1 << 1;
        const END_OF_BOOT      = 1 << 2;
        const GLOBAL_RESET     = 1 << 3;
        const FW_VERSION       = 1 << 4;
        const FW_UPDATE        = 1 << 5;
        const SECURITY_VERSION = 1 << 6;
        const KEY_REVOCATION   = 1 << 7;
        /// Everything without a dedicated category; normal operation only.
        const GENERAL          = 1 << 8;
    }
}

/// Fixed device-hide table.
pub fn hidden_devices(path: BootPath) -> HiddenDevices {
    match path {
        BootPath::Normal => HiddenDevices::empty(),
        // The server firmware variant carries no manageability presentation.
        BootPath::Sps | BootPath::SpsRecovery => HiddenDevices::PRESENTATION,
        // Degraded but trusted enough for the primary channel.
        BootPath::Error | BootPath::ErrorWithoutDidMsg | BootPath::Recovery => {
            HiddenDevices::PRESENTATION.union(HiddenDevices::LINK3)
        }
        // Untrusted execution environments: hide everything secondary.
        BootPath::EnforcementWithoutDidMsg
        | BootPath::DebugMode
        | BootPath::SecoverJmpr
        | BootPath::SwTempDisable
        | BootPath::SecoverMeiMsg => HiddenDevices::all(),
    }
}

/// Fixed message-allowance table.
///
/// `END_OF_BOOT` is unconditionally permitted on every path: downstream
/// security relies on that notification always being deliverable.
pub fn allowed_messages(path: BootPath) -> MessageCategories {
    let base = match path {
        BootPath::Normal | BootPath::Sps => MessageCategories::all(),
        BootPath::SpsRecovery => {
            MessageCategories::MEMORY_INIT_DONE
                | MessageCategories::SIZE_QUERY
                | MessageCategories::FW_VERSION
        }
        BootPath::Recovery => {
            MessageCategories::MEMORY_INIT_DONE
                | MessageCategories::SIZE_QUERY
                | MessageCategories::FW_VERSION
                | MessageCategories::FW_UPDATE
                | MessageCategories::GLOBAL_RESET
        }
        BootPath::Error => MessageCategories::MEMORY_INIT_DONE | MessageCategories::SIZE_QUERY,
        // "Without DID message": memory-init-done is specifically excluded.
        BootPath::ErrorWithoutDidMsg | BootPath::EnforcementWithoutDidMsg => {
            MessageCategories::SIZE_QUERY
        }
        BootPath::DebugMode
        | BootPath::SecoverJmpr
        | BootPath::SwTempDisable
        | BootPath::SecoverMeiMsg => {
            MessageCategories::MEMORY_INIT_DONE
                | MessageCategories::SIZE_QUERY
                | MessageCategories::FW_VERSION
        }
    };
    base | MessageCategories::END_OF_BOOT
}
