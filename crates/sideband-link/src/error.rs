use thiserror::Error;

/// Closed error set for every operation on the link.
///
/// All of these are returned, never panicked; `NoData` on a non-blocking
/// receive is an expected outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    /// A bounded wait elapsed without the hardware condition becoming true.
    #[error("timed out waiting on the link")]
    Timeout,

    /// The controller's ready flag was observed clear after a transaction
    /// started. The in-flight data is unverifiable; the caller must perform a
    /// link reset before issuing new calls.
    #[error("controller not ready; link reset required")]
    NotReady,

    /// Non-blocking receive found the buffer empty.
    #[error("no data available")]
    NoData,

    /// The caller's buffer could not hold the whole message. `copied` bytes
    /// of the leading payload were stored; the rest was drained and dropped.
    #[error("caller buffer too small ({copied} bytes copied)")]
    BufferTooSmall { copied: usize },

    /// Malformed or unexpected header/doorbell combination.
    #[error("protocol violation on the link")]
    Protocol,

    /// The message category is blocked by the current boot path, or the
    /// payload exceeds what the transport can carry. Never reaches the wire.
    #[error("message not permitted or not representable")]
    Unsupported,

    /// The companion device is absent from configuration space.
    #[error("companion device not present")]
    DeviceAbsent,

    /// Circular-buffer pointers describe more filled slots than the buffer
    /// holds. Terminal for the transaction, recoverable via link reset.
    #[error("circular buffer overflow")]
    Overflow,
}

pub type Result<T> = core::result::Result<T, LinkError>;
