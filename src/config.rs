//! Monitor configuration
//!
//! Built in code or loaded from TOML:
//!
//! ```toml
//! poll_interval_ms = 250
//! packet_logging = false
//!
//! [gateway]
//! host = "192.168.16.200"
//! port = 8080
//! path = "/v1"
//!
//! [[devices]]
//! id = 4
//! class = "hygrometer"
//!
//! [[devices]]
//! id = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AVERAGE_WINDOW, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HISTORY_CAPACITY,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_RECONNECT_DELAY_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_MS, MAX_UNIT_ID, MIN_UNIT_ID,
};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::scheduler::PollOptions;
use crate::sensors::DeviceClass;
use crate::session::SessionConfig;
use crate::transport::GatewayEndpoint;

/// One polled device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Modbus unit id
    pub id: SlaveId,
    /// Sensor class; derived from the unit id when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<DeviceClass>,
}

impl DeviceConfig {
    /// Device whose class follows the gateway's unit convention
    pub fn new(id: SlaveId) -> Self {
        Self { id, class: None }
    }

    pub fn with_class(id: SlaveId, class: DeviceClass) -> Self {
        Self {
            id,
            class: Some(class),
        }
    }

    /// Effective sensor class
    pub fn class(&self) -> DeviceClass {
        self.class.unwrap_or_else(|| DeviceClass::for_unit(self.id))
    }
}

/// Complete poller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub gateway: GatewayEndpoint,
    pub devices: Vec<DeviceConfig>,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub history_capacity: usize,
    pub average_window: usize,
    pub packet_logging: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayEndpoint::default(),
            devices: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            average_window: DEFAULT_AVERAGE_WINDOW,
            packet_logging: false,
        }
    }
}

impl MonitorConfig {
    /// Defaults with the given devices
    pub fn with_devices<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = SlaveId>,
    {
        Self {
            devices: ids.into_iter().map(DeviceConfig::new).collect(),
            ..Self::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> ModbusResult<Self> {
        toml::from_str(text).map_err(|e| ModbusError::config(format!("Invalid config: {}", e)))
    }

    /// Read and parse a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject configurations the poller cannot run with
    pub fn validate(&self) -> ModbusResult<()> {
        if self.devices.is_empty() {
            return Err(ModbusError::config("No devices configured"));
        }
        for device in &self.devices {
            if !(MIN_UNIT_ID..=MAX_UNIT_ID).contains(&device.id) {
                return Err(ModbusError::config(format!(
                    "Device id {} outside {}-{}",
                    device.id, MIN_UNIT_ID, MAX_UNIT_ID
                )));
            }
        }
        if self.gateway.host.trim().is_empty() {
            return Err(ModbusError::config("Gateway host is empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ModbusError::config("poll_interval_ms must be greater than 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ModbusError::config("request_timeout_ms must be greater than 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ModbusError::config("connect_timeout_ms must be greater than 0"));
        }
        if self.history_capacity == 0 {
            return Err(ModbusError::config("history_capacity must be greater than 0"));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_max_reconnect_attempts(self.max_reconnect_attempts)
            .with_reconnect_delay(
                Duration::from_millis(self.reconnect_delay_ms),
                Duration::from_millis(self.max_reconnect_delay_ms),
            )
            .with_packet_logging(self.packet_logging)
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            history_capacity: self.history_capacity,
            average_window: self.average_window,
        }
    }
}

/// Parse a comma-separated unit id list such as `"4, 5, 6"`.
///
/// Entries that are not numbers are skipped. A numeric entry outside 1-247,
/// or a list with no numeric entry at all, is an error.
pub fn parse_device_ids(input: &str) -> ModbusResult<Vec<SlaveId>> {
    let mut ids = Vec::new();
    for entry in input.split(',').map(str::trim) {
        let Ok(id) = entry.parse::<i64>() else {
            continue;
        };
        match SlaveId::try_from(id) {
            Ok(id) if (MIN_UNIT_ID..=MAX_UNIT_ID).contains(&id) => ids.push(id),
            _ => {
                return Err(ModbusError::config(format!(
                    "Device id {} outside {}-{}",
                    id, MIN_UNIT_ID, MAX_UNIT_ID
                )))
            }
        }
    }

    if ids.is_empty() {
        return Err(ModbusError::config(format!(
            "No valid device ids in '{}'",
            input
        )));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_ids() {
        assert_eq!(parse_device_ids("4, 5, 6").unwrap(), vec![4, 5, 6]);
        assert_eq!(parse_device_ids("4,x, 5,").unwrap(), vec![4, 5]);
        assert!(parse_device_ids("a, b").is_err());
        assert!(parse_device_ids("").is_err());
        assert!(parse_device_ids("4, 300").is_err());
        assert!(parse_device_ids("0").is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = MonitorConfig::from_toml_str(
            r#"
            poll_interval_ms = 500
            packet_logging = true

            [gateway]
            host = "10.1.1.20"

            [[devices]]
            id = 4
            class = "hygrometer"

            [[devices]]
            id = 9
            class = "voltage_sensor"

            [[devices]]
            id = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.url(), "ws://10.1.1.20:8080/v1");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.request_timeout_ms, 5000);
        assert!(config.packet_logging);
        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.devices[0].class(), DeviceClass::Hygrometer);
        assert_eq!(config.devices[1].class(), DeviceClass::VoltageSensor);
        assert_eq!(config.devices[2].class, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_class_rejected() {
        let result = MonitorConfig::from_toml_str(
            r#"
            [[devices]]
            id = 4
            class = "thermocouple"
            "#,
        );
        assert!(matches!(result, Err(ModbusError::Config { .. })));
    }

    #[test]
    fn test_validate() {
        assert!(MonitorConfig::default().validate().is_err());

        let mut config = MonitorConfig::with_devices([4, 5]);
        assert!(config.validate().is_ok());

        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let config = MonitorConfig::with_devices([0]);
        assert!(config.validate().is_err());

        let config = MonitorConfig::with_devices([248]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_and_poll_settings() {
        let mut config = MonitorConfig::with_devices([5]);
        config.max_reconnect_attempts = 5;
        config.request_timeout_ms = 1000;

        let session = config.session_config();
        assert_eq!(session.max_reconnect_attempts, 5);
        assert_eq!(session.request_timeout, Duration::from_secs(1));
        assert_eq!(session.reconnect_delay, Duration::from_millis(500));

        let options = config.poll_options();
        assert_eq!(options.poll_interval, Duration::from_millis(250));
        assert_eq!(options.history_capacity, 500);
    }

    #[test]
    fn test_device_class_fallback() {
        assert_eq!(DeviceConfig::new(4).class(), DeviceClass::Hygrometer);
        assert_eq!(DeviceConfig::new(7).class(), DeviceClass::VoltageSensor);
        assert_eq!(
            DeviceConfig::with_class(7, DeviceClass::Hygrometer).class(),
            DeviceClass::Hygrometer
        );
    }
}
