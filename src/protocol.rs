//! Modbus TCP message types
//!
//! Only function code 0x03 (Read Holding Registers) is spoken on the gateway
//! link, so the request type carries no function field and the response keeps
//! the raw function code for diagnostics.

use std::fmt;

use crate::codec;
use crate::constants::{self, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS};
use crate::error::{ModbusError, ModbusResult};

/// Modbus unit identifier, used by the gateway as the device address
pub type SlaveId = u8;

/// A Read Holding Registers request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModbusRequest {
    pub transaction_id: u16,
    pub unit_id: SlaveId,
    pub start_address: u16,
    pub quantity: u16,
}

impl ModbusRequest {
    /// Build a FC03 request
    pub fn read_holding_registers(
        transaction_id: u16,
        unit_id: SlaveId,
        start_address: u16,
        quantity: u16,
    ) -> Self {
        Self {
            transaction_id,
            unit_id,
            start_address,
            quantity,
        }
    }

    /// Function code carried by every request on this link
    #[inline]
    pub fn function_code(&self) -> u8 {
        FC_READ_HOLDING_REGISTERS
    }

    /// Encode into the 12-byte MBAP + PDU frame
    #[inline]
    pub fn encode(&self) -> [u8; constants::READ_REQUEST_FRAME_LEN] {
        codec::encode_read_holding_registers(
            self.transaction_id,
            self.unit_id,
            self.start_address,
            self.quantity,
        )
    }

    /// Check the request against protocol limits.
    ///
    /// Encoding never fails; this is for callers building requests from
    /// user input.
    pub fn validate(&self) -> ModbusResult<()> {
        if !(constants::MIN_UNIT_ID..=constants::MAX_UNIT_ID).contains(&self.unit_id) {
            return Err(ModbusError::invalid_request(format!(
                "unit id {} outside {}-{}",
                self.unit_id,
                constants::MIN_UNIT_ID,
                constants::MAX_UNIT_ID
            )));
        }
        if self.quantity == 0 || self.quantity > constants::MAX_READ_REGISTERS {
            return Err(ModbusError::invalid_request(format!(
                "register quantity {} outside 1-{}",
                self.quantity,
                constants::MAX_READ_REGISTERS
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ModbusRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TID={:04X} unit={} FC03 addr={} qty={}",
            self.transaction_id, self.unit_id, self.start_address, self.quantity
        )
    }
}

/// Body of a decoded response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Register bytes, exactly `byte_count` long
    Data(Vec<u8>),
    /// Exception code reported by the device
    Exception(u8),
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub transaction_id: u16,
    pub unit_id: SlaveId,
    pub function_code: u8,
    pub payload: ResponsePayload,
}

impl ModbusResponse {
    /// Create a successful response
    pub fn new_success(transaction_id: u16, unit_id: SlaveId, data: Vec<u8>) -> Self {
        Self {
            transaction_id,
            unit_id,
            function_code: FC_READ_HOLDING_REGISTERS,
            payload: ResponsePayload::Data(data),
        }
    }

    /// Create an exception response for `function`
    pub fn new_exception(transaction_id: u16, unit_id: SlaveId, function: u8, code: u8) -> Self {
        Self {
            transaction_id,
            unit_id,
            function_code: function | EXCEPTION_FLAG,
            payload: ResponsePayload::Exception(code),
        }
    }

    /// Check if this is an exception response
    pub fn is_exception(&self) -> bool {
        matches!(self.payload, ResponsePayload::Exception(_))
    }

    /// Register bytes of a successful response
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            ResponsePayload::Data(data) => data,
            ResponsePayload::Exception(_) => &[],
        }
    }

    /// Convert an exception response into its error
    pub fn get_exception(&self) -> Option<ModbusError> {
        match self.payload {
            ResponsePayload::Exception(code) => Some(ModbusError::Exception {
                function: self.function_code & !EXCEPTION_FLAG,
                code,
            }),
            ResponsePayload::Data(_) => None,
        }
    }

    /// Interpret the register bytes as big-endian 16-bit registers
    pub fn registers(&self) -> Vec<u16> {
        self.data()
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }
}
