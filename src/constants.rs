//! Modbus TCP framing constants and poller defaults
//!
//! Frame layout for a Read Holding Registers exchange:
//! - Request: MBAP header (7 bytes, unit id included) + FC(1) + address(2) + quantity(2) = 12 bytes
//! - Response: MBAP header (7 bytes) + FC(1) + byte count(1) + data(N)
//! - Exception: MBAP header (7 bytes) + FC | 0x80 (1) + exception code(1)

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Transaction ID(2) + Protocol ID(2) + Length(2)
///
/// The unit id is counted by the Length field and therefore lives after this prefix.
pub const MBAP_HEADER_LEN: usize = 6;

/// Offset of the unit id inside a TCP frame
pub const UNIT_ID_OFFSET: usize = 6;

/// Offset of the function code inside a TCP frame
pub const FUNCTION_CODE_OFFSET: usize = 7;

/// Offset of the byte count (or exception code) inside a TCP response frame
pub const BYTE_COUNT_OFFSET: usize = 8;

/// Offset of the first data byte inside a TCP response frame
pub const RESPONSE_DATA_OFFSET: usize = 9;

/// Size of an encoded Read Holding Registers request
///
/// 6 (MBAP) + 1 (unit id) + 1 (FC) + 2 (address) + 2 (quantity) = 12 bytes
pub const READ_REQUEST_FRAME_LEN: usize = 12;

/// Value of the MBAP Length field for a read request: unit id + 5-byte PDU
pub const READ_REQUEST_MBAP_LENGTH: u16 = 6;

/// Smallest response frame that can be classified
///
/// Everything up to and including the byte count / exception code.
pub const MIN_RESPONSE_FRAME_LEN: usize = 9;

/// Modbus protocol identifier (always zero for Modbus TCP)
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Maximum number of registers for FC03 per request
///
/// 1 (FC) + 1 (byte count) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Lowest assignable unit id
pub const MIN_UNIT_ID: u8 = 1;

/// Highest assignable unit id
pub const MAX_UNIT_ID: u8 = 247;

// ============================================================================
// Function and Exception Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// High bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Poller Defaults
// ============================================================================

/// Per-request response deadline
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Deadline for opening the gateway connection
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Pause between poll rounds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Reconnection attempts after an unexpected close
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Delay before the first reconnection attempt (doubles per attempt)
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;

/// Upper bound for the reconnection delay
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 5000;

/// Readings kept per device
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Readings averaged for smoothed values
pub const DEFAULT_AVERAGE_WINDOW: usize = 5;

/// Gateway WebSocket port
pub const DEFAULT_GATEWAY_PORT: u16 = 8080;

/// Gateway WebSocket path
pub const DEFAULT_GATEWAY_PATH: &str = "/v1";

/// Gateway address used when none is configured
pub const DEFAULT_GATEWAY_HOST: &str = "192.168.16.200";

/// Unit id the gateway assigns to the hygrometer
pub const HYGROMETER_UNIT_ID: u8 = 4;
