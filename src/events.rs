//! Collaborator callbacks
//!
//! Display, recording and export layers plug into the poller through
//! [`MonitorEvents`]. All methods have no-op defaults so a consumer only
//! implements what it needs. Callbacks run inline on the poller's tasks and
//! must not block.

use tokio::sync::mpsc;

use crate::protocol::SlaveId;
use crate::sensors::DeviceReading;
use crate::session::SessionState;

/// Callbacks invoked by the protocol core
pub trait MonitorEvents: Send + Sync {
    /// A reading was decoded for `unit_id`
    fn on_reading(&self, unit_id: SlaveId, reading: &DeviceReading) {
        let _ = (unit_id, reading);
    }

    /// A user-facing log line
    fn on_log(&self, message: &str) {
        let _ = message;
    }

    /// The transport session changed state
    fn on_state_change(&self, state: SessionState) {
        let _ = state;
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl MonitorEvents for NoopEvents {}

/// Event forwarded by [`ChannelEvents`]
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Reading(DeviceReading),
    Log(String),
    StateChanged(SessionState),
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl ChannelEvents {
    /// Create the sink and the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MonitorEvents for ChannelEvents {
    fn on_reading(&self, _unit_id: SlaveId, reading: &DeviceReading) {
        let _ = self.tx.send(MonitorEvent::Reading(reading.clone()));
    }

    fn on_log(&self, message: &str) {
        let _ = self.tx.send(MonitorEvent::Log(message.to_string()));
    }

    fn on_state_change(&self, state: SessionState) {
        let _ = self.tx.send(MonitorEvent::StateChanged(state));
    }
}
