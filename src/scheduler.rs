//! # Device poll scheduler
//!
//! Polls the configured devices in a fixed round over one
//! [`TransportSession`], one outstanding request at a time.
//!
//! A round takes the round lock, then for each device waits until the
//! session can carry requests, reads the device's registers, decodes them,
//! appends the reading to the device history and reports it through
//! [`MonitorEvents::on_reading`]. A failing device is logged once and the
//! round moves on; a device whose request was lost to a reconnect is simply
//! polled again next round. Between rounds the loop sleeps for the poll
//! interval, and [`PollScheduler::stop`] cuts that sleep short.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::codec;
use crate::config::{DeviceConfig, MonitorConfig};
use crate::constants::{DEFAULT_AVERAGE_WINDOW, DEFAULT_HISTORY_CAPACITY, DEFAULT_POLL_INTERVAL_MS};
use crate::error::{exception_description, ModbusError, ModbusResult};
use crate::events::MonitorEvents;
use crate::history::DeviceHistory;
use crate::logging::CallbackLogger;
use crate::protocol::SlaveId;
use crate::sensors::{DeviceReading, SampleField};
use crate::session::TransportSession;
use crate::transport::Connector;

/// Poll loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between the end of one round and the start of the next
    pub poll_interval: Duration,
    /// Readings kept per device
    pub history_capacity: usize,
    /// Readings averaged by [`PollScheduler::average`]
    pub average_window: usize,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            average_window: DEFAULT_AVERAGE_WINDOW,
        }
    }
}

/// Outcome of one poll round
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    /// Readings decoded this round, in poll order
    pub readings: Vec<DeviceReading>,
    /// Devices that failed this round, in poll order
    pub failures: Vec<(SlaveId, ModbusError)>,
    pub elapsed: Duration,
}

impl RoundSummary {
    pub fn succeeded(&self) -> usize {
        self.readings.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Sequential poller for a fixed device list
pub struct PollScheduler<C: Connector> {
    session: Arc<TransportSession<C>>,
    devices: Vec<DeviceConfig>,
    /// Held for the whole of a round
    round: tokio::sync::Mutex<()>,
    histories: Mutex<HashMap<SlaveId, DeviceHistory>>,
    history_capacity: usize,
    average_window: usize,
    poll_interval_ms: AtomicU64,
    running: AtomicBool,
    stop_signal: Notify,
    logger: CallbackLogger,
    events: Arc<dyn MonitorEvents>,
}

impl<C: Connector> PollScheduler<C> {
    /// Scheduler over an already open session
    pub fn new(
        session: Arc<TransportSession<C>>,
        devices: Vec<DeviceConfig>,
        options: PollOptions,
        events: Arc<dyn MonitorEvents>,
    ) -> Self {
        let histories = devices
            .iter()
            .map(|d| (d.id, DeviceHistory::new(options.history_capacity)))
            .collect();

        Self {
            session,
            devices,
            round: tokio::sync::Mutex::new(()),
            histories: Mutex::new(histories),
            history_capacity: options.history_capacity,
            average_window: options.average_window,
            poll_interval_ms: AtomicU64::new(options.poll_interval.as_millis() as u64),
            running: AtomicBool::new(false),
            stop_signal: Notify::new(),
            logger: CallbackLogger::new(events.clone()),
            events,
        }
    }

    /// Validate `config`, open the session and build the scheduler.
    pub async fn connect(
        connector: C,
        config: &MonitorConfig,
        events: Arc<dyn MonitorEvents>,
    ) -> ModbusResult<Self> {
        config.validate()?;
        let session = TransportSession::open(
            connector,
            config.gateway.clone(),
            config.session_config(),
            events.clone(),
        )
        .await?;

        Ok(Self::new(
            Arc::new(session),
            config.devices.clone(),
            config.poll_options(),
            events,
        ))
    }

    pub fn session(&self) -> &Arc<TransportSession<C>> {
        &self.session
    }

    pub fn devices(&self) -> &[DeviceConfig] {
        &self.devices
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a round currently holds the round lock
    pub fn is_round_in_progress(&self) -> bool {
        self.round.try_lock().is_err()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.load(Ordering::SeqCst))
    }

    /// Change the pause between rounds; takes effect after the current round.
    pub fn set_poll_interval(&self, interval: Duration) {
        self.poll_interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
        debug!("Poll interval set to {}ms", interval.as_millis());
    }

    /// Poll until [`stop`](Self::stop) or a fatal session error.
    ///
    /// Returns `Ok(())` when stopped and the fatal error otherwise. A round
    /// already in progress always completes before the loop exits.
    pub async fn run(&self) -> ModbusResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.logger.warn("Poll loop already running");
            return Ok(());
        }

        self.logger.info(&format!(
            "Polling {} device(s) every {}ms",
            self.devices.len(),
            self.poll_interval().as_millis()
        ));

        let result = loop {
            if !self.is_running() {
                break Ok(());
            }

            match self.run_round().await {
                Ok(summary) => debug!(
                    "Round finished in {}ms: {} ok, {} failed",
                    summary.elapsed.as_millis(),
                    summary.succeeded(),
                    summary.failed()
                ),
                // The session has already reported the cause
                Err(e) => {
                    debug!("Polling stopped: {}", e);
                    break Err(e);
                }
            }

            // Registered before the check so a stop in between still wakes it
            let stopped = self.stop_signal.notified();
            if !self.is_running() {
                break Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval()) => {}
                _ = stopped => {}
            }
        };

        self.running.store(false, Ordering::SeqCst);
        self.logger.info("Poll loop stopped");
        result
    }

    /// Ask the loop to stop after the current round.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Stop requested");
        }
        self.stop_signal.notify_waiters();
    }

    /// Poll every device once.
    ///
    /// Waits for a round already in progress. Per-device failures are logged
    /// and collected in the summary; only a fatal session error aborts the
    /// round.
    pub async fn run_round(&self) -> ModbusResult<RoundSummary> {
        let _round = self.round.lock().await;
        let started = Instant::now();
        let mut readings = Vec::with_capacity(self.devices.len());
        let mut failures = Vec::new();

        for device in &self.devices {
            self.session.wait_until_ready().await?;

            match self.poll_device(device).await {
                Ok(reading) => readings.push(reading),
                // A link lost between the readiness check and the send is
                // recovered by the next wait_until_ready
                Err(e) if e.is_fatal() && !self.lost_to_reconnect(&e) => {
                    return Err(self.fatal_cause(e).await)
                }
                Err(e) => {
                    match &e {
                        ModbusError::Exception { code, .. } => self.logger.warn(&format!(
                            "Device {}: {} ({})",
                            device.id,
                            e,
                            exception_description(*code)
                        )),
                        _ => self.logger.warn(&format!("Device {}: {}", device.id, e)),
                    }
                    failures.push((device.id, e));
                }
            }
        }

        Ok(RoundSummary {
            readings,
            failures,
            elapsed: started.elapsed(),
        })
    }

    fn lost_to_reconnect(&self, error: &ModbusError) -> bool {
        *error == ModbusError::NotConnected && self.session.is_active()
    }

    /// Replace a bare `NotConnected` with the session's terminal error.
    async fn fatal_cause(&self, error: ModbusError) -> ModbusError {
        if error != ModbusError::NotConnected {
            return error;
        }
        self.session.wait_until_ready().await.err().unwrap_or(error)
    }

    async fn poll_device(&self, device: &DeviceConfig) -> ModbusResult<DeviceReading> {
        let class = device.class();
        let pending = self
            .session
            .read_holding_registers(device.id, 0, class.register_count())
            .await?;
        let frame = pending.wait().await?;

        let response = codec::decode_response(&frame).map_err(|e| {
            if e.is_frame_error() {
                debug!(
                    "Malformed frame from unit {}: {}",
                    device.id,
                    codec::format_hex_packet(&frame)
                );
            }
            e
        })?;
        if response.unit_id != device.id {
            debug!(
                "Device {} answered with unit id {}",
                device.id, response.unit_id
            );
        }
        let sample = class.decode(response.data())?;

        let reading = DeviceReading::now(device.id, sample);
        self.histories()
            .entry(device.id)
            .or_insert_with(|| DeviceHistory::new(self.history_capacity))
            .push(reading.clone());
        self.events.on_reading(device.id, &reading);
        Ok(reading)
    }

    fn histories(&self) -> MutexGuard<'_, HashMap<SlaveId, DeviceHistory>> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All stored readings of `unit_id`, oldest first
    pub fn history(&self, unit_id: SlaveId) -> Vec<DeviceReading> {
        self.histories()
            .get(&unit_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Up to `n` most recent readings of `unit_id`, oldest first
    pub fn latest(&self, unit_id: SlaveId, n: usize) -> Vec<DeviceReading> {
        self.histories()
            .get(&unit_id)
            .map(|h| h.latest(n))
            .unwrap_or_default()
    }

    /// Most recent reading of `unit_id`
    pub fn last_reading(&self, unit_id: SlaveId) -> Option<DeviceReading> {
        self.histories()
            .get(&unit_id)
            .and_then(|h| h.last().cloned())
    }

    /// Mean of `field` over the last `window` readings of `unit_id`
    pub fn moving_average(&self, unit_id: SlaveId, field: SampleField, window: usize) -> Option<f64> {
        self.histories()
            .get(&unit_id)
            .and_then(|h| h.moving_average(field, window))
    }

    /// [`moving_average`](Self::moving_average) over the configured window
    pub fn average(&self, unit_id: SlaveId, field: SampleField) -> Option<f64> {
        self.moving_average(unit_id, field, self.average_window)
    }

    pub fn clear_history(&self) {
        for history in self.histories().values_mut() {
            history.clear();
        }
    }

    /// Stop polling and close the session.
    pub async fn shutdown(&self) -> ModbusResult<()> {
        self.stop();
        let _round = self.round.lock().await;
        self.session.close().await
    }
}

impl<C: Connector> std::fmt::Debug for PollScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("devices", &self.devices)
            .field("running", &self.is_running())
            .field("poll_interval", &self.poll_interval())
            .finish()
    }
}
