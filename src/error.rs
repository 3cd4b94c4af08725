//! Error types for the poller
//!
//! Every failure surfaced by the codec, registry, session and scheduler is a
//! [`ModbusError`]. Errors fall in three groups:
//!
//! | Group | Variants | Effect |
//! |-------|----------|--------|
//! | Malformed frame | `ShortFrame`, `Truncated`, `UnsupportedFunction` | reading skipped |
//! | Device / request | `Exception`, `Timeout`, `Decode`, `ConnectionLost` | reading skipped |
//! | Session | `Connect`, `NotConnected`, `Transport`, `ReconnectExhausted`, `Cancelled` | may end polling |

use thiserror::Error;

use crate::constants;

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors produced by the protocol core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    /// The gateway connection could not be established
    #[error("Connect error: {message}")]
    Connect { message: String },

    /// An operation needed a connected session
    #[error("Session is not connected")]
    NotConnected,

    /// The underlying transport failed to send or receive
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The connection closed while the request was in flight
    #[error("Connection lost while waiting for transaction {transaction_id}")]
    ConnectionLost { transaction_id: u16 },

    /// The session was torn down while the request was in flight
    #[error("Transaction {transaction_id} cancelled by session teardown")]
    Cancelled { transaction_id: u16 },

    /// No response arrived before the deadline
    #[error("Timeout waiting for transaction {transaction_id} after {timeout_ms}ms")]
    Timeout { transaction_id: u16, timeout_ms: u64 },

    /// The device answered with a Modbus exception
    #[error("Modbus exception: function {function}, code {code}")]
    Exception { function: u8, code: u8 },

    /// Response shorter than the fixed header
    #[error("Short frame: {len} bytes (need at least {})", constants::MIN_RESPONSE_FRAME_LEN)]
    ShortFrame { len: usize },

    /// Declared byte count exceeds the bytes actually received
    #[error("Truncated frame: byte count {declared}, {available} bytes available")]
    Truncated { declared: usize, available: usize },

    /// Response carried a function code other than FC03
    #[error("Unsupported function code: {code:#04X}")]
    UnsupportedFunction { code: u8 },

    /// Payload too short for the device class
    #[error("Decode error: {device_class} needs {expected} bytes, got {actual}")]
    Decode {
        device_class: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A pending entry already exists for the transaction id
    #[error("Duplicate transaction id {transaction_id}")]
    DuplicateTransaction { transaction_id: u16 },

    /// Reconnection budget used up; the session is terminal
    #[error("Reconnection abandoned after {attempts} failed attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Request outside protocol limits, scoped to the one device
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ModbusError {
    /// Create a connect error
    pub fn connect<S: Into<String>>(message: S) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(transaction_id: u16, timeout_ms: u64) -> Self {
        Self::Timeout {
            transaction_id,
            timeout_ms,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether the error ends the polling session.
    ///
    /// Everything else is scoped to a single device request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReconnectExhausted { .. } | Self::NotConnected | Self::Config { .. }
        )
    }

    /// Whether the error describes a malformed response frame
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::ShortFrame { .. } | Self::Truncated { .. } | Self::UnsupportedFunction { .. }
        )
    }
}

/// Human-readable name for a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        constants::EXCEPTION_ILLEGAL_FUNCTION => "Illegal Function",
        constants::EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal Data Address",
        constants::EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal Data Value",
        constants::EXCEPTION_SERVER_DEVICE_FAILURE => "Server Device Failure",
        constants::EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        constants::EXCEPTION_SERVER_DEVICE_BUSY => "Server Device Busy",
        constants::EXCEPTION_MEMORY_PARITY_ERROR => "Memory Parity Error",
        constants::EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway Path Unavailable",
        constants::EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
