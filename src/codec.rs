//! # Frame Codec
//!
//! Encoding of Read Holding Registers requests and decoding of the matching
//! responses. Stateless; every function works on a single complete frame as
//! delivered by one WebSocket message.
//!
//! ## Response classification
//!
//! | Check | Error |
//! |-------|-------|
//! | fewer than 9 bytes | `ShortFrame` |
//! | function code high bit set | `Exception { function, code }` |
//! | function code other than 0x03 | `UnsupportedFunction` |
//! | byte count beyond the frame end | `Truncated` |

use tracing::debug;

use crate::constants::{
    BYTE_COUNT_OFFSET, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FUNCTION_CODE_OFFSET,
    MIN_RESPONSE_FRAME_LEN, MODBUS_PROTOCOL_ID, READ_REQUEST_FRAME_LEN, READ_REQUEST_MBAP_LENGTH,
    RESPONSE_DATA_OFFSET, UNIT_ID_OFFSET,
};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusResponse, SlaveId};

// ============================================================================
// Encoding
// ============================================================================

/// Encode a FC03 request frame.
///
/// # Example
///
/// ```rust
/// use modbus_ws_poller::codec::encode_read_holding_registers;
///
/// let frame = encode_read_holding_registers(0x0001, 4, 0, 5);
/// assert_eq!(frame, [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x04, 0x03, 0x00, 0x00, 0x00, 0x05]);
/// ```
pub fn encode_read_holding_registers(
    transaction_id: u16,
    unit_id: SlaveId,
    start_address: u16,
    quantity: u16,
) -> [u8; READ_REQUEST_FRAME_LEN] {
    let tid = transaction_id.to_be_bytes();
    let protocol = MODBUS_PROTOCOL_ID.to_be_bytes();
    let length = READ_REQUEST_MBAP_LENGTH.to_be_bytes();
    let address = start_address.to_be_bytes();
    let qty = quantity.to_be_bytes();

    [
        tid[0],
        tid[1],
        protocol[0],
        protocol[1],
        length[0],
        length[1],
        unit_id,
        FC_READ_HOLDING_REGISTERS,
        address[0],
        address[1],
        qty[0],
        qty[1],
    ]
}

/// Encode a FC03 response frame carrying `data`.
///
/// This is the gateway side of the exchange; used by simulators and tests.
/// `data` longer than 255 bytes is cut to what the byte count can express.
pub fn encode_read_response(transaction_id: u16, unit_id: SlaveId, data: &[u8]) -> Vec<u8> {
    let data = &data[..data.len().min(u8::MAX as usize)];
    // unit id + FC + byte count + data
    let length = (3 + data.len()) as u16;

    let mut frame = Vec::with_capacity(RESPONSE_DATA_OFFSET + data.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&MODBUS_PROTOCOL_ID.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(unit_id);
    frame.push(FC_READ_HOLDING_REGISTERS);
    frame.push(data.len() as u8);
    frame.extend_from_slice(data);
    frame
}

/// Encode an exception response frame for `function`.
pub fn encode_exception_response(
    transaction_id: u16,
    unit_id: SlaveId,
    function: u8,
    code: u8,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MIN_RESPONSE_FRAME_LEN);
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&MODBUS_PROTOCOL_ID.to_be_bytes());
    frame.extend_from_slice(&3u16.to_be_bytes());
    frame.push(unit_id);
    frame.push(function | EXCEPTION_FLAG);
    frame.push(code);
    frame
}

// ============================================================================
// Decoding
// ============================================================================

/// Leading transaction id of a frame, if it has one.
#[inline]
pub fn transaction_id_of(frame: &[u8]) -> Option<u16> {
    match frame {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Parse a response frame, keeping exception responses as values.
///
/// Malformed frames are errors; a well-formed exception response is returned
/// with [`ResponsePayload::Exception`](crate::protocol::ResponsePayload).
pub fn parse_response(frame: &[u8]) -> ModbusResult<ModbusResponse> {
    if frame.len() < MIN_RESPONSE_FRAME_LEN {
        return Err(ModbusError::ShortFrame { len: frame.len() });
    }

    let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    let unit_id = frame[UNIT_ID_OFFSET];
    let function_code = frame[FUNCTION_CODE_OFFSET];

    if protocol_id != MODBUS_PROTOCOL_ID {
        debug!(
            "Frame TID={:04X} carries protocol id {:04X}, ignoring",
            transaction_id, protocol_id
        );
    }

    if function_code & EXCEPTION_FLAG != 0 {
        let code = frame[BYTE_COUNT_OFFSET];
        debug!(
            "Exception response: TID={:04X}, unit={}, FC={:02X}, code={:02X}",
            transaction_id, unit_id, function_code, code
        );
        return Ok(ModbusResponse::new_exception(
            transaction_id,
            unit_id,
            function_code & !EXCEPTION_FLAG,
            code,
        ));
    }

    if function_code != FC_READ_HOLDING_REGISTERS {
        return Err(ModbusError::UnsupportedFunction {
            code: function_code,
        });
    }

    let declared = frame[BYTE_COUNT_OFFSET] as usize;
    let available = frame.len() - RESPONSE_DATA_OFFSET;
    if declared > available {
        return Err(ModbusError::Truncated {
            declared,
            available,
        });
    }

    let data = frame[RESPONSE_DATA_OFFSET..RESPONSE_DATA_OFFSET + declared].to_vec();
    debug!(
        "Response parsed: TID={:04X}, unit={}, byte_count={}",
        transaction_id, unit_id, declared
    );

    Ok(ModbusResponse::new_success(transaction_id, unit_id, data))
}

/// Decode a response frame, turning exception responses into errors.
///
/// # Example
///
/// ```rust
/// use modbus_ws_poller::codec::decode_response;
/// use modbus_ws_poller::ModbusError;
///
/// let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x04, 0x83, 0x02];
/// assert_eq!(
///     decode_response(&frame),
///     Err(ModbusError::Exception { function: 3, code: 2 })
/// );
/// ```
pub fn decode_response(frame: &[u8]) -> ModbusResult<ModbusResponse> {
    let response = parse_response(frame)?;
    match response.get_exception() {
        Some(error) => Err(error),
        None => Ok(response),
    }
}

/// Format raw bytes as a hex string for packet logging
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Tests
// ============================================================================
