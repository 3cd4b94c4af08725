//! Transaction registry
//!
//! Pairs outgoing requests with the response frames that arrive on the
//! receive task. Each registered transaction owns a oneshot channel; the
//! entry in the pending map is the single ownership token for that channel:
//! whoever removes the entry (resolve, expiry, teardown, abandon) is the only
//! party allowed to deliver an outcome. Removal and delivery happen under the
//! same lock, so a waiter always observes exactly one outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ModbusError, ModbusResult};

type Outcome = ModbusResult<Vec<u8>>;

struct PendingEntry {
    /// Registration sequence, distinguishes reuse of a TID after wraparound
    seq: u64,
    deadline: Instant,
    responder: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<u16, PendingEntry>,
    last_transaction_id: u16,
    next_seq: u64,
    timeouts: u64,
}

/// Shared map of in-flight transactions
#[derive(Clone, Default)]
pub struct TransactionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TransactionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next transaction id from the shared 16-bit counter.
    ///
    /// Pre-increments, so the first id issued is 1 and 65535 is followed by 0.
    pub fn next_transaction_id(&self) -> u16 {
        let mut state = self.lock();
        state.last_transaction_id = state.last_transaction_id.wrapping_add(1);
        state.last_transaction_id
    }

    /// Register a transaction that must be answered within `timeout`.
    pub fn register(&self, transaction_id: u16, timeout: Duration) -> ModbusResult<PendingHandle> {
        let mut state = self.lock();
        if state.pending.contains_key(&transaction_id) {
            return Err(ModbusError::DuplicateTransaction { transaction_id });
        }

        let (responder, receiver) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert(
            transaction_id,
            PendingEntry {
                seq,
                deadline,
                responder,
            },
        );
        debug!("Registered TID={:04X}, timeout={}ms", transaction_id, timeout.as_millis());

        Ok(PendingHandle {
            registry: self.clone(),
            transaction_id,
            seq,
            deadline,
            timeout,
            receiver,
            finished: false,
        })
    }

    /// Deliver a response frame to the waiter of `transaction_id`.
    ///
    /// Returns `false` when nothing is pending under that id (late or spurious
    /// frame); the caller decides how to report it.
    pub fn resolve(&self, transaction_id: u16, frame: Vec<u8>) -> bool {
        let mut state = self.lock();
        match state.pending.remove(&transaction_id) {
            Some(entry) => {
                // A dropped receiver only means the waiter went away first.
                let _ = entry.responder.send(Ok(frame));
                true
            }
            None => false,
        }
    }

    /// Fail every pending transaction. Returns how many were failed.
    pub fn fail_all<F>(&self, mut make_error: F) -> usize
    where
        F: FnMut(u16) -> ModbusError,
    {
        let mut state = self.lock();
        let failed = state.pending.len();
        for (transaction_id, entry) in state.pending.drain() {
            let _ = entry.responder.send(Err(make_error(transaction_id)));
        }
        if failed > 0 {
            warn!("Failed {} pending transaction(s)", failed);
        }
        failed
    }

    /// Number of transactions awaiting a response
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether `transaction_id` is awaiting a response
    pub fn contains(&self, transaction_id: u16) -> bool {
        self.lock().pending.contains_key(&transaction_id)
    }

    /// Deadline of a pending transaction
    pub fn deadline_of(&self, transaction_id: u16) -> Option<Instant> {
        self.lock().pending.get(&transaction_id).map(|e| e.deadline)
    }

    /// Transactions that expired without a response
    pub fn timeouts(&self) -> u64 {
        self.lock().timeouts
    }

    /// Remove an expired entry if it is still the one registered as `seq`.
    fn expire(&self, transaction_id: u16, seq: u64) -> bool {
        let mut state = self.lock();
        if Self::take_if_current(&mut state, transaction_id, seq).is_some() {
            state.timeouts += 1;
            true
        } else {
            false
        }
    }

    /// Remove an entry whose waiter gave up.
    fn forget(&self, transaction_id: u16, seq: u64) -> bool {
        let mut state = self.lock();
        Self::take_if_current(&mut state, transaction_id, seq).is_some()
    }

    fn take_if_current(
        state: &mut RegistryState,
        transaction_id: u16,
        seq: u64,
    ) -> Option<PendingEntry> {
        match state.pending.get(&transaction_id) {
            Some(entry) if entry.seq == seq => state.pending.remove(&transaction_id),
            _ => None,
        }
    }
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TransactionRegistry")
            .field("pending", &state.pending.len())
            .field("last_transaction_id", &state.last_transaction_id)
            .field("timeouts", &state.timeouts)
            .finish()
    }
}

/// Waiter side of a registered transaction.
///
/// Dropping the handle without calling [`wait`](Self::wait) removes the
/// registry entry, so no transaction is left both pending and unwatched.
#[derive(Debug)]
pub struct PendingHandle {
    registry: TransactionRegistry,
    transaction_id: u16,
    seq: u64,
    deadline: Instant,
    timeout: Duration,
    receiver: oneshot::Receiver<Outcome>,
    finished: bool,
}

impl PendingHandle {
    /// Transaction id this handle waits on
    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Instant at which the transaction times out
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response frame, a failure, or the deadline.
    pub async fn wait(mut self) -> ModbusResult<Vec<u8>> {
        let outcome = match tokio::time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ModbusError::Cancelled {
                transaction_id: self.transaction_id,
            }),
            Err(_) => {
                if self.registry.expire(self.transaction_id, self.seq) {
                    warn!(
                        "Timeout waiting for TID={:04X} ({}ms)",
                        self.transaction_id,
                        self.timeout.as_millis()
                    );
                    Err(ModbusError::timeout(
                        self.transaction_id,
                        self.timeout.as_millis() as u64,
                    ))
                } else {
                    // Someone else removed the entry at the deadline and has
                    // already delivered under the registry lock.
                    self.receiver.try_recv().unwrap_or_else(|_| {
                        Err(ModbusError::Cancelled {
                            transaction_id: self.transaction_id,
                        })
                    })
                }
            }
        };
        self.finished = true;
        outcome
    }

    /// Withdraw the transaction without waiting.
    ///
    /// Returns `true` if the entry was still pending.
    pub fn abandon(mut self) -> bool {
        self.finished = true;
        self.registry.forget(self.transaction_id, self.seq)
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if !self.finished && self.registry.forget(self.transaction_id, self.seq) {
            debug!("Dropped waiter for TID={:04X}", self.transaction_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(5000);

    #[test]
    fn test_transaction_id_wraps() {
        let registry = TransactionRegistry::new();
        assert_eq!(registry.next_transaction_id(), 1);
        assert_eq!(registry.next_transaction_id(), 2);

        registry.lock().last_transaction_id = u16::MAX - 1;
        assert_eq!(registry.next_transaction_id(), u16::MAX);
        assert_eq!(registry.next_transaction_id(), 0);
        assert_eq!(registry.next_transaction_id(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = TransactionRegistry::new();
        let _handle = registry.register(7, TIMEOUT).unwrap();
        assert_eq!(
            registry.register(7, TIMEOUT).unwrap_err(),
            ModbusError::DuplicateTransaction { transaction_id: 7 }
        );
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let registry = TransactionRegistry::new();
        let handle = registry.register(1, TIMEOUT).unwrap();

        assert!(registry.resolve(1, vec![0x00, 0x01]));
        assert!(!registry.resolve(1, vec![0x00, 0x01]));
        assert!(!registry.contains(1));

        assert_eq!(handle.wait().await.unwrap(), vec![0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_wait_is_pending_until_resolved() {
        let registry = TransactionRegistry::new();
        let handle = registry.register(40, TIMEOUT).unwrap();

        let mut wait = tokio_test::task::spawn(handle.wait());
        tokio_test::assert_pending!(wait.poll());

        assert!(registry.resolve(40, vec![0x00, 0x28]));
        assert!(wait.is_woken());
        assert_eq!(tokio_test::assert_ready!(wait.poll()).unwrap(), vec![0x00, 0x28]);
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_noop() {
        let registry = TransactionRegistry::new();
        assert!(!registry.resolve(99, vec![0x00, 0x63]));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let registry = TransactionRegistry::new();
        let handle = registry.register(3, TIMEOUT).unwrap();

        let started = Instant::now();
        let outcome = handle.wait().await;
        assert_eq!(outcome, Err(ModbusError::timeout(3, 5000)));
        assert!(started.elapsed() >= TIMEOUT);
        assert!(!registry.contains(3));
        assert_eq!(registry.timeouts(), 1);

        // A late frame for the expired transaction finds nothing
        assert!(!registry.resolve(3, vec![0x00, 0x03]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_before_deadline_beats_timeout() {
        let registry = TransactionRegistry::new();
        let handle = registry.register(4, TIMEOUT).unwrap();

        let resolver = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4999)).await;
            resolver.resolve(4, vec![0x00, 0x04]);
        });

        assert_eq!(handle.wait().await.unwrap(), vec![0x00, 0x04]);
        assert_eq!(registry.timeouts(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_reaches_every_waiter() {
        let registry = TransactionRegistry::new();
        let first = registry.register(10, TIMEOUT).unwrap();
        let second = registry.register(11, TIMEOUT).unwrap();

        let failed =
            registry.fail_all(|transaction_id| ModbusError::ConnectionLost { transaction_id });
        assert_eq!(failed, 2);
        assert_eq!(registry.pending_count(), 0);

        assert_eq!(
            first.wait().await,
            Err(ModbusError::ConnectionLost { transaction_id: 10 })
        );
        assert_eq!(
            second.wait().await,
            Err(ModbusError::ConnectionLost { transaction_id: 11 })
        );
    }

    #[tokio::test]
    async fn test_abandon_and_drop_remove_entry() {
        let registry = TransactionRegistry::new();

        let handle = registry.register(20, TIMEOUT).unwrap();
        assert!(handle.abandon());
        assert!(!registry.contains(20));

        let handle = registry.register(21, TIMEOUT).unwrap();
        drop(handle);
        assert!(!registry.contains(21));
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_remove_reused_id() {
        let registry = TransactionRegistry::new();
        let stale = registry.register(30, TIMEOUT).unwrap();
        assert!(registry.resolve(30, vec![]));

        // Same TID registered again after the first exchange completed
        let _fresh = registry.register(30, TIMEOUT).unwrap();
        assert!(!stale.abandon());
        assert!(registry.contains(30));
    }
}
