//! # Modbus WS Poller - Sensor polling over a Modbus TCP WebSocket gateway
//!
//! Polls Modbus field devices through a gateway that carries Modbus TCP
//! frames inside binary WebSocket messages. Each configured device is read in
//! turn with Read Holding Registers (0x03), the registers are decoded into
//! physical values and the readings are handed to a [`MonitorEvents`]
//! collaborator.
//!
//! ## Features
//!
//! - **Transaction tracking**: 16-bit transaction ids, one outcome per request
//!   (response, exception, timeout or connection loss)
//! - **Reconnection**: bounded retries with exponential backoff
//! - **Sequential polling**: one request in flight, per-device failures never
//!   abort a round
//! - **Sensor decoding**: hygrometer and voltage sensor register layouts
//! - **Bounded history**: per-device readings with moving averages
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client |
//! |------|----------|--------|
//! | 0x03 | Read Holding Registers | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modbus_ws_poller::{ModbusResult, MonitorConfig, NoopEvents, PollScheduler, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = MonitorConfig::with_devices([4, 5]);
//!     let scheduler =
//!         PollScheduler::connect(WebSocketConnector::new(), &config, Arc::new(NoopEvents)).await?;
//!
//!     let summary = scheduler.run_round().await?;
//!     for reading in &summary.readings {
//!         println!("unit {}: {}", reading.unit_id, reading.sample);
//!     }
//!
//!     scheduler.shutdown().await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants and poller defaults
pub mod constants;

/// Modbus request and response types
pub mod protocol;

/// Frame encoding and decoding
pub mod codec;

/// In-flight transaction tracking
pub mod registry;

/// Gateway link abstraction and the WebSocket implementation
pub mod transport;

/// Connection lifecycle and request dispatch
pub mod session;

// ============================================================================
// Polling
// ============================================================================

/// Sensor register decoders
pub mod sensors;

/// Per-device reading history
pub mod history;

/// Sequential device poll loop
pub mod scheduler;

/// Poller configuration
pub mod config;

/// Collaborator callbacks
pub mod events;

/// Logging for the poller
pub mod logging;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{ModbusRequest, ModbusResponse, ResponsePayload, SlaveId};
pub use registry::{PendingHandle, TransactionRegistry};

// === Transport ===
pub use session::{SessionConfig, SessionState, TransportSession, TransportStats};
pub use transport::{Connector, FrameReceiver, FrameSender, GatewayEndpoint};

#[cfg(feature = "websocket")]
pub use transport::WebSocketConnector;

// === Polling ===
pub use config::{parse_device_ids, DeviceConfig, MonitorConfig};
pub use history::DeviceHistory;
pub use scheduler::{PollOptions, PollScheduler, RoundSummary};
pub use sensors::{
    DeviceClass, DeviceReading, HygrometerSample, SampleField, SensorSample, VoltageSample,
};

// === Collaborators ===
pub use events::{ChannelEvents, MonitorEvent, MonitorEvents, NoopEvents};
pub use logging::{CallbackLogger, LogLevel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Modbus WS Poller v{} - Modbus TCP over WebSocket sensor poller",
        VERSION
    )
}
