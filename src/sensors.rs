//! # Sensor decoders
//!
//! Translate the register bytes of a FC03 response into physical values.
//!
//! | Class | Registers | Layout |
//! |-------|-----------|--------|
//! | Hygrometer | 5 | humidity /100, °C ×0.05, °F ×0.05, dew point °C /100, dew point °F /100 |
//! | Voltage sensor | 1 | volts /1000 |
//!
//! Every register is a signed 16-bit big-endian value.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::HYGROMETER_UNIT_ID;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;

/// Device classes known to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Multi-field humidity / temperature / dew point sensor
    Hygrometer,
    /// Single-field DC voltage sensor
    VoltageSensor,
}

impl DeviceClass {
    /// Class used when the configuration does not name one.
    ///
    /// The gateway places the hygrometer at unit 4; every other unit is a
    /// voltage sensor.
    pub fn for_unit(unit_id: SlaveId) -> Self {
        if unit_id == HYGROMETER_UNIT_ID {
            DeviceClass::Hygrometer
        } else {
            DeviceClass::VoltageSensor
        }
    }

    /// Holding registers read per poll
    pub fn register_count(&self) -> u16 {
        match self {
            DeviceClass::Hygrometer => 5,
            DeviceClass::VoltageSensor => 1,
        }
    }

    /// Minimum payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.register_count() as usize * 2
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceClass::Hygrometer => "hygrometer",
            DeviceClass::VoltageSensor => "voltage_sensor",
        }
    }

    /// Decode a response payload for this class
    pub fn decode(&self, payload: &[u8]) -> ModbusResult<SensorSample> {
        match self {
            DeviceClass::Hygrometer => decode_hygrometer(payload).map(SensorSample::Hygrometer),
            DeviceClass::VoltageSensor => decode_voltage(payload).map(SensorSample::Voltage),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceClass {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hygrometer" | "humidity" | "thm" => Ok(DeviceClass::Hygrometer),
            "voltage_sensor" | "voltage" | "vdc" => Ok(DeviceClass::VoltageSensor),
            other => Err(ModbusError::config(format!("Unknown device class: {}", other))),
        }
    }
}

/// Hygrometer values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HygrometerSample {
    /// Relative humidity, %RH
    pub humidity: f64,
    pub temperature_c: f64,
    pub temperature_f: f64,
    pub dew_point_c: f64,
    pub dew_point_f: f64,
}

/// Voltage sensor value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageSample {
    /// Volts DC
    pub voltage: f64,
}

/// Decoded values of one poll
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum SensorSample {
    Hygrometer(HygrometerSample),
    Voltage(VoltageSample),
}

/// Individual quantities a sample may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleField {
    Humidity,
    TemperatureC,
    TemperatureF,
    DewPointC,
    DewPointF,
    Voltage,
}

impl SensorSample {
    /// Value of `field`, if this sample carries it
    pub fn field(&self, field: SampleField) -> Option<f64> {
        match (self, field) {
            (SensorSample::Hygrometer(s), SampleField::Humidity) => Some(s.humidity),
            (SensorSample::Hygrometer(s), SampleField::TemperatureC) => Some(s.temperature_c),
            (SensorSample::Hygrometer(s), SampleField::TemperatureF) => Some(s.temperature_f),
            (SensorSample::Hygrometer(s), SampleField::DewPointC) => Some(s.dew_point_c),
            (SensorSample::Hygrometer(s), SampleField::DewPointF) => Some(s.dew_point_f),
            (SensorSample::Voltage(s), SampleField::Voltage) => Some(s.voltage),
            _ => None,
        }
    }

    pub fn device_class(&self) -> DeviceClass {
        match self {
            SensorSample::Hygrometer(_) => DeviceClass::Hygrometer,
            SensorSample::Voltage(_) => DeviceClass::VoltageSensor,
        }
    }
}

impl fmt::Display for SensorSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorSample::Hygrometer(s) => write!(
                f,
                "humidity {:.2}%RH, temperature {:.2}°C / {:.2}°F, dew point {:.2}°C / {:.2}°F",
                s.humidity, s.temperature_c, s.temperature_f, s.dew_point_c, s.dew_point_f
            ),
            SensorSample::Voltage(s) => write!(f, "voltage {:.3}V", s.voltage),
        }
    }
}

/// A sample stamped with its device and time of decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub unit_id: SlaveId,
    pub timestamp: DateTime<Utc>,
    pub sample: SensorSample,
}

impl DeviceReading {
    /// Stamp `sample` with the current time
    pub fn now(unit_id: SlaveId, sample: SensorSample) -> Self {
        Self {
            unit_id,
            timestamp: Utc::now(),
            sample,
        }
    }
}

/// Signed register at `index` (two's complement, big-endian)
#[inline]
fn register_i16(payload: &[u8], index: usize) -> i16 {
    i16::from_be_bytes([payload[index * 2], payload[index * 2 + 1]])
}

fn ensure_len(class: DeviceClass, payload: &[u8]) -> ModbusResult<()> {
    if payload.len() < class.payload_len() {
        return Err(ModbusError::Decode {
            device_class: class.name(),
            expected: class.payload_len(),
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Decode the five hygrometer registers
pub fn decode_hygrometer(payload: &[u8]) -> ModbusResult<HygrometerSample> {
    ensure_len(DeviceClass::Hygrometer, payload)?;

    Ok(HygrometerSample {
        humidity: f64::from(register_i16(payload, 0)) / 100.0,
        temperature_c: f64::from(register_i16(payload, 1)) * 0.05,
        temperature_f: f64::from(register_i16(payload, 2)) * 0.05,
        dew_point_c: f64::from(register_i16(payload, 3)) / 100.0,
        dew_point_f: f64::from(register_i16(payload, 4)) / 100.0,
    })
}

/// Decode the voltage register
pub fn decode_voltage(payload: &[u8]) -> ModbusResult<VoltageSample> {
    ensure_len(DeviceClass::VoltageSensor, payload)?;

    Ok(VoltageSample {
        voltage: f64::from(register_i16(payload, 0)) / 1000.0,
    })
}
