//! Logging for the poller
//!
//! Internal diagnostics go straight to `tracing`. Messages meant for the
//! operator (per-device failures, connection changes) go through
//! [`CallbackLogger`], which emits the `tracing` event and forwards the text
//! to the [`MonitorEvents::on_log`] collaborator.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::codec::format_hex_packet;
use crate::events::{MonitorEvents, NoopEvents};
use crate::protocol::SlaveId;

/// Severity of an operator-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Logger that mirrors operator messages to the `on_log` callback
#[derive(Clone)]
pub struct CallbackLogger {
    events: Arc<dyn MonitorEvents>,
    /// Messages below this level stay in `tracing` only
    min_level: LogLevel,
    packet_logging: bool,
}

impl CallbackLogger {
    /// Forward messages at `Info` and above
    pub fn new(events: Arc<dyn MonitorEvents>) -> Self {
        Self {
            events,
            min_level: LogLevel::Info,
            packet_logging: false,
        }
    }

    /// Logger that only writes to `tracing`
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopEvents))
    }

    /// Change the lowest level forwarded to the callback
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Enable hex dumps of every frame
    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn packet_logging(&self) -> bool {
        self.packet_logging
    }

    /// Log `message` at `level`
    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        if level >= self.min_level {
            self.events.on_log(message);
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Hex dump of an outgoing or incoming frame, when packet logging is on
    pub fn log_packet(&self, direction: &str, unit_id: Option<SlaveId>, frame: &[u8]) {
        if !self.packet_logging {
            return;
        }
        let hex = format_hex_packet(frame);
        match unit_id {
            Some(id) => debug!("[MODBUS-WS] {} unit:{} {}", direction, id, hex),
            None => debug!("[MODBUS-WS] {} {}", direction, hex),
        }
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("min_level", &self.min_level)
            .field("packet_logging", &self.packet_logging)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelEvents, MonitorEvent};

    #[test]
    fn test_forwards_at_or_above_min_level() {
        let (events, mut rx) = ChannelEvents::new();
        let logger = CallbackLogger::new(Arc::new(events)).with_min_level(LogLevel::Warn);

        logger.info("quiet");
        logger.warn("device 5: timeout");
        logger.error("gateway lost");

        assert_eq!(
            rx.try_recv().unwrap(),
            MonitorEvent::Log("device 5: timeout".to_string())
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            MonitorEvent::Log("gateway lost".to_string())
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_packet_logging_does_not_reach_callback() {
        let (events, mut rx) = ChannelEvents::new();
        let logger = CallbackLogger::new(Arc::new(events)).with_packet_logging(true);
        logger.log_packet("send", Some(4), &[0x00, 0x01]);
        assert!(rx.try_recv().is_err());
    }
}
