//! # Transport session
//!
//! Owns the single gateway link, pairs inbound frames with pending
//! transactions and restores the link after an unexpected close.
//!
//! ## State machine
//!
//! ```text
//! Disconnected ──open──▶ Connecting ──▶ Connected
//!                                          │ link closed while active
//!                                          ▼
//!        Disconnected ◀──budget spent── Reconnecting ◀──┐
//!                                          │            │ attempt failed
//!                                          ▼            │
//!                                      Connecting ──────┘
//!                                          │
//!                                          ▼
//!                                      Connected
//! ```
//!
//! Requests pending when the link closes fail with
//! [`ModbusError::ConnectionLost`]; they are never resent.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec;
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_RECONNECT_DELAY_MS,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_MS, UNIT_ID_OFFSET,
};
use crate::error::{ModbusError, ModbusResult};
use crate::events::MonitorEvents;
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusRequest, SlaveId};
use crate::registry::{PendingHandle, TransactionRegistry};
use crate::transport::{Connector, FrameReceiver, FrameSender, GatewayEndpoint};

/// Connection state of a [`TransportSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Session timing and retry settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Deadline for each request
    pub request_timeout: Duration,
    /// Deadline for each connection attempt
    pub connect_timeout: Duration,
    /// Reconnection attempts after an unexpected close
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt; doubles per attempt
    pub reconnect_delay: Duration,
    /// Upper bound for the reconnection delay
    pub max_reconnect_delay: Duration,
    /// Hex dump every frame at debug level
    pub packet_logging: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(DEFAULT_MAX_RECONNECT_DELAY_MS),
            packet_logging: false,
        }
    }
}

impl SessionConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration, max_delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self.max_reconnect_delay = max_delay;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    /// Frames whose transaction id matched nothing pending
    pub late_frames: u64,
    pub reconnects: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

struct SessionInner<C: Connector> {
    connector: C,
    endpoint: GatewayEndpoint,
    config: SessionConfig,
    registry: TransactionRegistry,
    writer: tokio::sync::Mutex<Option<C::Sender>>,
    state: watch::Sender<SessionState>,
    /// Cleared by `close` and by an exhausted reconnection budget
    active: AtomicBool,
    exhausted: AtomicBool,
    stats: Mutex<TransportStats>,
    logger: CallbackLogger,
    events: Arc<dyn MonitorEvents>,
}

impl<C: Connector> SessionInner<C> {
    fn stats(&self) -> MutexGuard<'_, TransportStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session state {} -> {}", previous, state);
            self.events.on_state_change(state);
        }
    }

    async fn connect_once(&self) -> ModbusResult<(C::Sender, C::Receiver)> {
        match tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&self.endpoint))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ModbusError::connect(format!(
                "Timed out connecting to {} after {}ms",
                self.endpoint,
                self.config.connect_timeout.as_millis()
            ))),
        }
    }

    fn on_message(&self, frame: &[u8]) {
        self.logger
            .log_packet("receive", frame.get(UNIT_ID_OFFSET).copied(), frame);

        let Some(transaction_id) = codec::transaction_id_of(frame) else {
            self.stats().errors += 1;
            self.logger.warn(&format!(
                "Dropping {}-byte frame without transaction id",
                frame.len()
            ));
            return;
        };

        self.stats().bytes_received += frame.len() as u64;

        if self.registry.resolve(transaction_id, frame.to_vec()) {
            self.stats().responses_received += 1;
        } else {
            self.stats().late_frames += 1;
            self.logger.warn(&format!(
                "Received response with unknown TID {}",
                transaction_id
            ));
        }
    }

    /// Handle a closed link. Returns the receiver of a restored link.
    async fn on_close(&self) -> Option<C::Receiver> {
        self.writer.lock().await.take();

        // Leave Connected before waking waiters so none of them sees a
        // usable session without a writer
        let active = self.active.load(Ordering::SeqCst);
        self.set_state(if active {
            SessionState::Reconnecting
        } else {
            SessionState::Disconnected
        });
        let failed = self
            .registry
            .fail_all(|transaction_id| ModbusError::ConnectionLost { transaction_id });
        if !active {
            return None;
        }

        self.logger.warn(&format!(
            "Connection to {} closed ({} request(s) in flight), reconnecting",
            self.endpoint, failed
        ));

        let max_attempts = self.config.max_reconnect_attempts;
        let mut delay = self.config.reconnect_delay;
        for attempt in 1..=max_attempts {
            tokio::time::sleep(delay).await;
            if !self.active.load(Ordering::SeqCst) {
                self.set_state(SessionState::Disconnected);
                return None;
            }

            self.set_state(SessionState::Connecting);
            match self.connect_once().await {
                Ok((sender, receiver)) => {
                    let mut writer = self.writer.lock().await;
                    if !self.active.load(Ordering::SeqCst) {
                        return None;
                    }
                    *writer = Some(sender);
                    self.stats().reconnects += 1;
                    self.set_state(SessionState::Connected);
                    drop(writer);

                    self.logger.info(&format!(
                        "Reconnected to {} (attempt {}/{})",
                        self.endpoint, attempt, max_attempts
                    ));
                    return Some(receiver);
                }
                Err(e) => {
                    self.logger.warn(&format!(
                        "Reconnect attempt {}/{} failed: {}",
                        attempt, max_attempts, e
                    ));
                    self.set_state(SessionState::Reconnecting);
                    delay = (delay * 2).min(self.config.max_reconnect_delay);
                }
            }
        }

        self.exhausted.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Disconnected);
        self.logger.error(&format!(
            "Reconnection to {} abandoned after {} attempts",
            self.endpoint, max_attempts
        ));
        None
    }
}

/// Receive task: dispatch frames until the link closes, then reconnect.
async fn read_loop<C: Connector>(inner: Arc<SessionInner<C>>, mut receiver: C::Receiver) {
    loop {
        loop {
            match receiver.next_frame().await {
                Some(Ok(frame)) => inner.on_message(&frame),
                Some(Err(e)) => {
                    inner.stats().errors += 1;
                    inner.logger.warn(&format!("Receive failed: {}", e));
                    break;
                }
                None => break,
            }
        }

        match inner.on_close().await {
            Some(next) => receiver = next,
            None => return,
        }
    }
}

/// Session over one gateway link
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use modbus_ws_poller::{GatewayEndpoint, NoopEvents, SessionConfig, TransportSession, WebSocketConnector};
///
/// # async fn example() -> modbus_ws_poller::ModbusResult<()> {
/// let session = TransportSession::open(
///     WebSocketConnector::new(),
///     GatewayEndpoint::new("192.168.16.200"),
///     SessionConfig::default(),
///     Arc::new(NoopEvents),
/// )
/// .await?;
///
/// let pending = session.read_holding_registers(5, 0, 1).await?;
/// let frame = pending.wait().await?;
/// println!("{:02X?}", frame);
///
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct TransportSession<C: Connector> {
    inner: Arc<SessionInner<C>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> TransportSession<C> {
    /// Connect to `endpoint` and start the receive task.
    pub async fn open(
        connector: C,
        endpoint: GatewayEndpoint,
        config: SessionConfig,
        events: Arc<dyn MonitorEvents>,
    ) -> ModbusResult<Self> {
        let logger = CallbackLogger::new(events.clone()).with_packet_logging(config.packet_logging);
        let (state, _) = watch::channel(SessionState::Disconnected);
        let inner = Arc::new(SessionInner {
            connector,
            endpoint,
            config,
            registry: TransactionRegistry::new(),
            writer: tokio::sync::Mutex::new(None),
            state,
            active: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            stats: Mutex::new(TransportStats::default()),
            logger,
            events,
        });

        inner.set_state(SessionState::Connecting);
        let receiver = match inner.connect_once().await {
            Ok((sender, receiver)) => {
                *inner.writer.lock().await = Some(sender);
                receiver
            }
            Err(e) => {
                inner.set_state(SessionState::Disconnected);
                inner.logger.error(&format!("Gateway unavailable: {}", e));
                return Err(e);
            }
        };

        inner.active.store(true, Ordering::SeqCst);
        inner.set_state(SessionState::Connected);
        inner
            .logger
            .info(&format!("Connected to gateway at {}", inner.endpoint));

        let reader = tokio::spawn(read_loop(inner.clone(), receiver));
        Ok(Self {
            inner,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Current connection state
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether the session is still meant to be connected
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> &GatewayEndpoint {
        &self.inner.endpoint
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Registry of in-flight transactions
    pub fn registry(&self) -> &TransactionRegistry {
        &self.inner.registry
    }

    /// Snapshot of the transport statistics
    pub fn stats(&self) -> TransportStats {
        let mut stats = self.inner.stats().clone();
        stats.timeouts = self.inner.registry.timeouts();
        stats
    }

    /// Send one raw frame.
    pub async fn send(&self, frame: &[u8]) -> ModbusResult<()> {
        let mut writer = self.inner.writer.lock().await;
        if self.state() != SessionState::Connected {
            return Err(ModbusError::NotConnected);
        }
        let sender = writer.as_mut().ok_or(ModbusError::NotConnected)?;

        self.inner
            .logger
            .log_packet("send", frame.get(UNIT_ID_OFFSET).copied(), frame);
        match sender.send_frame(frame.to_vec()).await {
            Ok(()) => {
                self.inner.stats().bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.inner.stats().errors += 1;
                Err(e)
            }
        }
    }

    /// Register `request` and send it.
    ///
    /// On a failed write the registry entry is withdrawn before the error is
    /// returned, so nothing is left waiting.
    pub async fn send_request(&self, request: &ModbusRequest) -> ModbusResult<PendingHandle> {
        request.validate()?;
        if self.state() != SessionState::Connected {
            return Err(ModbusError::NotConnected);
        }

        let handle = self
            .inner
            .registry
            .register(request.transaction_id, self.inner.config.request_timeout)?;

        if let Err(e) = self.send(&request.encode()).await {
            handle.abandon();
            debug!("Send failed for {}: {}", request, e);
            return Err(e);
        }

        self.inner.stats().requests_sent += 1;
        debug!("Sent {}", request);
        Ok(handle)
    }

    /// Read `quantity` holding registers from `unit_id`, allocating the next
    /// transaction id.
    pub async fn read_holding_registers(
        &self,
        unit_id: SlaveId,
        start_address: u16,
        quantity: u16,
    ) -> ModbusResult<PendingHandle> {
        let transaction_id = self.inner.registry.next_transaction_id();
        let request =
            ModbusRequest::read_holding_registers(transaction_id, unit_id, start_address, quantity);
        self.send_request(&request).await
    }

    /// Wait until the session can carry requests.
    ///
    /// Returns immediately when connected, waits through a reconnection, and
    /// fails once the session is disconnected for good.
    pub async fn wait_until_ready(&self) -> ModbusResult<()> {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                SessionState::Connected => return Ok(()),
                SessionState::Disconnected => return Err(self.terminal_error()),
                SessionState::Connecting | SessionState::Reconnecting => {
                    if rx.changed().await.is_err() {
                        return Err(ModbusError::NotConnected);
                    }
                }
            }
        }
    }

    fn terminal_error(&self) -> ModbusError {
        if self.inner.exhausted.load(Ordering::SeqCst) {
            ModbusError::ReconnectExhausted {
                attempts: self.inner.config.max_reconnect_attempts,
            }
        } else {
            ModbusError::NotConnected
        }
    }

    /// Tear the session down.
    ///
    /// Pending requests fail with [`ModbusError::Cancelled`]; no reconnection
    /// is attempted afterwards.
    pub async fn close(&self) -> ModbusResult<()> {
        self.inner.active.store(false, Ordering::SeqCst);

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reader {
            handle.abort();
            let _ = handle.await;
        }

        let sender = self.inner.writer.lock().await.take();
        let result = match sender {
            Some(mut sender) => sender.close().await,
            None => Ok(()),
        };

        let cancelled = self
            .inner
            .registry
            .fail_all(|transaction_id| ModbusError::Cancelled { transaction_id });
        self.inner.set_state(SessionState::Disconnected);
        self.inner.logger.info(&format!(
            "Session closed ({} request(s) cancelled)",
            cancelled
        ));
        result
    }
}

impl<C: Connector> Drop for TransportSession<C> {
    fn drop(&mut self) {
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reader {
            handle.abort();
        }
    }
}

impl<C: Connector> fmt::Debug for TransportSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("pending", &self.inner.registry.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_response;
    use crate::events::{ChannelEvents, MonitorEvent, NoopEvents};
    use crate::transport::mock::{MockConnector, MockGateway};
    use tokio::sync::mpsc;

    async fn open_mock() -> (TransportSession<MockConnector>, MockGateway) {
        let (connector, gateway) = MockConnector::new();
        let session = TransportSession::open(
            connector,
            GatewayEndpoint::new("127.0.0.1"),
            SessionConfig::default(),
            Arc::new(NoopEvents),
        )
        .await
        .unwrap();
        (session, gateway)
    }

    fn states(rx: &mut mpsc::UnboundedReceiver<MonitorEvent>) -> Vec<SessionState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let MonitorEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        states
    }

    #[tokio::test]
    async fn test_open_reports_state_changes() {
        let (connector, _gateway) = MockConnector::new();
        let (events, mut rx) = ChannelEvents::new();
        let session = TransportSession::open(
            connector,
            GatewayEndpoint::default(),
            SessionConfig::default(),
            Arc::new(events),
        )
        .await
        .unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_active());
        assert_eq!(
            states(&mut rx),
            vec![SessionState::Connecting, SessionState::Connected]
        );
    }

    #[tokio::test]
    async fn test_open_failure_is_connect_error() {
        let (connector, gateway) = MockConnector::new();
        gateway.fail_next_connects(1);

        let result = TransportSession::open(
            connector,
            GatewayEndpoint::default(),
            SessionConfig::default(),
            Arc::new(NoopEvents),
        )
        .await;
        assert!(matches!(result, Err(ModbusError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let (session, mut gateway) = open_mock().await;
        let mut link = gateway.next_link().await;

        let pending = session.read_holding_registers(5, 0, 1).await.unwrap();
        assert_eq!(session.registry().pending_count(), 1);

        let request = link.answer_next(&[0x13, 0x88]).await;
        assert_eq!(
            request,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x05, 0x03, 0x00, 0x00, 0x00, 0x01]
        );

        let frame = pending.wait().await.unwrap();
        let response = decode_response(&frame).unwrap();
        assert_eq!(response.transaction_id, 1);
        assert_eq!(response.data(), &[0x13, 0x88]);
        assert_eq!(session.registry().pending_count(), 0);

        let stats = session.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        assert_eq!(stats.bytes_sent, 12);
    }

    #[tokio::test]
    async fn test_write_failure_withdraws_transaction() {
        let (session, gateway) = open_mock().await;
        gateway.fail_writes(true);

        let result = session.read_holding_registers(5, 0, 1).await;
        assert!(matches!(result, Err(ModbusError::Transport { .. })));
        assert_eq!(session.registry().pending_count(), 0);
        assert_eq!(session.stats().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_late_frame() {
        let (session, mut gateway) = open_mock().await;
        let mut link = gateway.next_link().await;

        let pending = session.read_holding_registers(5, 0, 1).await.unwrap();
        let request = link.requests.recv().await.unwrap();

        assert_eq!(pending.wait().await, Err(ModbusError::timeout(1, 5000)));
        assert!(!session.registry().contains(1));

        // The gateway answers after the deadline
        let tid = codec::transaction_id_of(&request).unwrap();
        link.responses
            .send(Ok(codec::encode_read_response(tid, 5, &[0x00, 0x01])))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stats = session.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.late_frames, 1);
        assert_eq!(stats.responses_received, 0);
        assert_eq!(stats.bytes_received, 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_fails_pending_and_reconnects() {
        let (session, mut gateway) = open_mock().await;
        let link = gateway.next_link().await;

        let pending = session.read_holding_registers(4, 0, 5).await.unwrap();
        drop(link);

        assert_eq!(
            pending.wait().await,
            Err(ModbusError::ConnectionLost { transaction_id: 1 })
        );

        session.wait_until_ready().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(gateway.connect_attempts(), 2);
        assert_eq!(session.stats().reconnects, 1);

        // The restored link carries traffic with a fresh transaction id
        let mut link = gateway.next_link().await;
        let pending = session.read_holding_registers(5, 0, 1).await.unwrap();
        link.answer_next(&[0x00, 0x02]).await;
        let frame = pending.wait().await.unwrap();
        assert_eq!(codec::transaction_id_of(&frame), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_budget_exhausted() {
        let (connector, mut gateway) = MockConnector::new();
        let (events, mut rx) = ChannelEvents::new();
        let session = TransportSession::open(
            connector,
            GatewayEndpoint::default(),
            SessionConfig::default(),
            Arc::new(events),
        )
        .await
        .unwrap();
        let link = gateway.next_link().await;

        gateway.fail_next_connects(3);
        drop(link);

        assert_eq!(
            session.wait_until_ready().await,
            Err(ModbusError::ReconnectExhausted { attempts: 3 })
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_active());

        // No fourth attempt is made on its own
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(gateway.connect_attempts(), 4);

        assert_eq!(
            session.read_holding_registers(5, 0, 1).await.unwrap_err(),
            ModbusError::NotConnected
        );

        let seen = states(&mut rx);
        assert_eq!(seen.last(), Some(&SessionState::Disconnected));
        assert_eq!(
            seen.iter()
                .filter(|s| **s == SessionState::Connecting)
                .count(),
            4
        );
    }

    #[tokio::test]
    async fn test_close_cancels_pending() {
        let (session, mut gateway) = open_mock().await;
        let _link = gateway.next_link().await;

        let pending = session.read_holding_registers(5, 0, 1).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(
            pending.wait().await,
            Err(ModbusError::Cancelled { transaction_id: 1 })
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            session.wait_until_ready().await,
            Err(ModbusError::NotConnected)
        );
        assert_eq!(gateway.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_is_not_connected() {
        let (session, _gateway) = open_mock().await;
        session.close().await.unwrap();
        assert_eq!(
            session.send(&[0x00, 0x01]).await,
            Err(ModbusError::NotConnected)
        );
    }
}
