//! Transport and trust layer for the companion-controller sideband link.
//!
//! Pre-OS platform firmware talks to the embedded security/management
//! coprocessor over a shared memory-mapped interface. This crate implements
//! the framed wire protocol on top of that interface (circular-buffer
//! transport for the primary controller, single-slot doorbell transport for
//! the secondary coprocessor class) and the boot-path trust policy that gates
//! which message categories may be transmitted at any moment.
//!
//! Hardware access is injected through the traits in `sideband_hw`, so the
//! whole protocol stack runs against scripted fakes in tests.

#![forbid(unsafe_code)]

pub mod doorbell;
pub mod error;
pub mod link;
pub mod msg;
pub mod packet;
pub mod regs;
pub mod ring;
pub mod timeout;
pub mod trust;

pub use error::LinkError;
pub use link::{GatedLink, StatusSource, Transport};
pub use trust::BootPath;
