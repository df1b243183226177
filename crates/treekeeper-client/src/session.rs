//! A session-oriented connection to one coordination-service ensemble.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use treekeeper_transport::{Ensemble, EnsembleEvent};
use treekeeper_types::{
    ConnectionConfig, KeeperError, KeeperEvent, KeeperResult, SessionEvent, SessionState,
};

use crate::broadcaster::{EventBroadcaster, Subscription};
use crate::cache::TreeCache;
use crate::retry::RetryPolicy;

/// State shared between the connection handle and its background tasks.
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) ensemble: Arc<dyn Ensemble>,
    pub(crate) config: ConnectionConfig,
    retry: RetryPolicy,
    broadcaster: Arc<EventBroadcaster>,
    cache: Arc<TreeCache>,
    state: watch::Sender<SessionState>,
}

impl SessionShared {
    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Applies a state transition if the machine permits it, publishing a
    /// session event on success. `Closed` accepts nothing further; `Lost`
    /// accepts only `Closed`.
    fn transition(&self, next: SessionState) -> bool {
        let mut moved = false;
        self.state.send_if_modified(|current| {
            let allowed = match *current {
                SessionState::Closed => false,
                SessionState::Lost => next == SessionState::Closed,
                _ => *current != next,
            };
            if allowed {
                *current = next;
                moved = true;
            }
            moved
        });
        if moved {
            self.announce(next);
        }
        moved
    }

    /// Atomically claims the `Disconnected → Connecting` edge.
    ///
    /// Returns `Ok(true)` exactly once per establishment: concurrent callers
    /// racing on a disconnected session see `Ok(false)`, as do callers on a
    /// live one. Terminal states reject.
    fn begin_connecting(&self) -> KeeperResult<bool> {
        let mut outcome = Ok(false);
        self.state.send_if_modified(|current| match *current {
            SessionState::Disconnected => {
                *current = SessionState::Connecting;
                outcome = Ok(true);
                true
            }
            SessionState::Closed => {
                outcome = Err(KeeperError::ConnectionClosed);
                false
            }
            SessionState::Lost => {
                outcome = Err(KeeperError::RetryExhausted {
                    attempts: self.retry.max_retries(),
                });
                false
            }
            _ => false,
        });
        if matches!(outcome, Ok(true)) {
            self.announce(SessionState::Connecting);
        }
        outcome
    }

    fn announce(&self, state: SessionState) {
        info!(
            connection = %self.ensemble.connect_string(),
            state = %state,
            "session state changed"
        );
        self.broadcaster
            .publish(SessionEvent::now(self.ensemble.connect_string(), state));
    }

    /// Dials the ensemble under the retry policy. On success transitions to
    /// `on_success` and returns `true`; on budget exhaustion transitions to
    /// `Lost` and returns `false`.
    async fn dial(&self, on_success: SessionState) -> bool {
        let mut retries: u32 = 0;
        loop {
            let attempt =
                tokio::time::timeout(self.config.connection_timeout, self.ensemble.connect())
                    .await;
            match attempt {
                Ok(Ok(())) => {
                    self.transition(on_success);
                    return true;
                }
                Ok(Err(err)) => {
                    debug!(retries, error = %err, "connection attempt failed");
                }
                Err(_) => {
                    debug!(retries, "connection attempt timed out");
                }
            }
            match self.retry.next_delay(retries) {
                Some(delay) => {
                    retries += 1;
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        connection = %self.ensemble.connect_string(),
                        retries,
                        "retry budget exhausted, session lost"
                    );
                    self.transition(SessionState::Lost);
                    return false;
                }
            }
        }
    }

    /// Consumes ensemble connectivity events until the session ends.
    ///
    /// A transport drop becomes `Suspended` followed by a redial under a fresh
    /// retry budget; recovery within the budget reaches `Reconnected`, never
    /// `Lost`. Session expiry and budget exhaustion are terminal.
    async fn run_event_pump(self: Arc<Self>, mut events: broadcast::Receiver<EnsembleEvent>) {
        loop {
            match events.recv().await {
                Ok(EnsembleEvent::Disconnected { reason }) => {
                    if self.current().is_terminal() {
                        break;
                    }
                    warn!(
                        connection = %self.ensemble.connect_string(),
                        reason = reason.as_deref().unwrap_or("unknown"),
                        "connection suspended"
                    );
                    self.transition(SessionState::Suspended);
                    if !self.dial(SessionState::Reconnected).await {
                        break;
                    }
                }
                Ok(EnsembleEvent::Expired) => {
                    warn!(
                        connection = %self.ensemble.connect_string(),
                        "session expired server-side"
                    );
                    self.transition(SessionState::Lost);
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        if self.current() == SessionState::Lost {
            self.cache.stop();
        }
    }
}

/// One session to a coordination service.
///
/// Owns the transport session, a [`TreeCache`] mirror rooted at `/`, and the
/// event broadcaster subscribers attach to. Establishment is asynchronous:
/// [`SessionConnection::connect`] returns immediately and callers observe
/// completion through [`SessionConnection::wait_connected`], the event stream,
/// or by polling [`SessionConnection::is_connected`].
#[derive(Debug)]
pub struct SessionConnection {
    shared: Arc<SessionShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionConnection {
    /// Creates a connection over an ensemble. No I/O happens until `connect`.
    pub fn new(ensemble: Arc<dyn Ensemble>, config: ConnectionConfig) -> Self {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let cache = Arc::new(TreeCache::new(
            Arc::clone(&ensemble),
            Arc::clone(&broadcaster),
            treekeeper_types::path::ROOT,
        ));
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            shared: Arc::new(SessionShared {
                retry: RetryPolicy::from_config(&config),
                ensemble,
                config,
                broadcaster,
                cache,
                state,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Begins session establishment under the retry policy.
    ///
    /// Returns immediately. Calling again while establishment is in flight or
    /// the session is live is a no-op; a closed connection rejects with
    /// `ConnectionClosed` and a lost one with `RetryExhausted` (create a new
    /// connection instead).
    pub fn connect(&self) -> KeeperResult<()> {
        // The Disconnected → Connecting claim is atomic, so concurrent calls
        // spawn at most one establishment task.
        if !self.shared.begin_connecting()? {
            return Ok(());
        }

        // Subscribe before dialing so no connectivity event is missed.
        let events = self.shared.ensemble.subscribe_events();

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            if !shared.dial(SessionState::Connected).await {
                return;
            }
            if let Err(err) = shared.cache.start().await {
                warn!(error = %err, "tree cache failed to start");
            }
            shared.run_event_pump(events).await;
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Returns the current session state.
    pub fn state(&self) -> SessionState {
        self.shared.current()
    }

    /// Returns `true` only in `Connected` or `Reconnected`.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Waits until the session is live, or fails with the terminal condition.
    pub async fn wait_connected(&self, timeout: Duration) -> KeeperResult<()> {
        let mut rx = self.shared.state.subscribe();
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                let state = *rx.borrow();
                match state {
                    _ if state.is_connected() => return Ok(()),
                    SessionState::Closed => return Err(KeeperError::ConnectionClosed),
                    SessionState::Lost => {
                        return Err(KeeperError::RetryExhausted {
                            attempts: self.shared.retry.max_retries(),
                        })
                    }
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(KeeperError::ConnectionClosed);
                }
            }
        })
        .await;
        outcome.map_err(|_| KeeperError::Timeout {
            operation: "connect".to_string(),
        })?
    }

    /// Subscribes to this connection's session and tree events.
    pub fn subscribe(&self) -> (Subscription, mpsc::Receiver<KeeperEvent>) {
        self.shared.broadcaster.subscribe()
    }

    /// Removes a subscription obtained from [`SessionConnection::subscribe`].
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.shared.broadcaster.unsubscribe(subscription);
    }

    /// The tree mirror owned by this connection.
    pub fn cache(&self) -> &TreeCache {
        &self.shared.cache
    }

    /// The configured connect string.
    pub fn connect_string(&self) -> &str {
        self.shared.ensemble.connect_string()
    }

    /// The configuration this connection was created with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Closes the connection. Idempotent.
    ///
    /// Cancels the establishment/reconnect loop and the watch pump, stops the
    /// cache, emits the final `Closed` event, drops all subscribers, and
    /// releases the transport. Operations in flight fail rather than hang.
    pub async fn close(&self) {
        if self.state() == SessionState::Closed {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.cache.stop();
        self.shared.transition(SessionState::Closed);
        self.shared.broadcaster.clear();
        self.shared.ensemble.disconnect().await;
        debug!(connection = %self.connect_string(), "connection closed");
    }

    pub(crate) fn shared(&self) -> &SessionShared {
        &self.shared
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_test::assert_ok;
    use treekeeper_transport::MemoryEnsemble;

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig::fast()
    }

    fn session_over(ensemble: &Arc<MemoryEnsemble>) -> SessionConnection {
        SessionConnection::new(
            Arc::clone(ensemble) as Arc<dyn Ensemble>,
            fast_config(),
        )
    }

    #[tokio::test]
    async fn test_connect_reaches_connected() {
        let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
        let session = session_over(&ensemble);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());

        session.connect().unwrap();
        assert_ok!(session.wait_connected(Duration::from_secs(2)).await);
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_connected());
        session.close().await;
    }

    #[tokio::test]
    async fn test_connect_emits_transition_events() {
        let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
        let session = session_over(&ensemble);
        let (_sub, mut rx) = session.subscribe();

        session.connect().unwrap();
        session.wait_connected(Duration::from_secs(2)).await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let KeeperEvent::Session(event) = event {
                states.push(event.state);
            }
        }
        assert_eq!(
            states,
            vec![SessionState::Connecting, SessionState::Connected]
        );
        session.close().await;
    }

    #[tokio::test]
    async fn test_retry_exhaustion_reaches_lost() {
        let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
        ensemble.set_connectable(false);
        let session = session_over(&ensemble);

        session.connect().unwrap();
        let err = session.wait_connected(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, KeeperError::RetryExhausted { attempts: 3 });
        assert_eq!(session.state(), SessionState::Lost);

        // A lost session never silently returns to service.
        ensemble.set_connectable(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.state(), SessionState::Lost);
        assert!(session.connect().is_err());
        session.close().await;
    }

    #[tokio::test]
    async fn test_transient_drop_suspends_then_reconnects() {
        let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
        let session = session_over(&ensemble);
        session.connect().unwrap();
        session.wait_connected(Duration::from_secs(2)).await.unwrap();
        let (_sub, mut rx) = session.subscribe();

        ensemble.break_connection("cable pulled");

        // Wait on the event stream, not the state watch: the watch still
        // reads Connected until the pump observes the drop.
        let mut states = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if let KeeperEvent::Session(event) = event {
                    states.push(event.state);
                    if event.state == SessionState::Reconnected {
                        break;
                    }
                }
            }
        })
        .await
        .expect("session never reconnected");

        assert_eq!(
            states,
            vec![SessionState::Suspended, SessionState::Reconnected]
        );
        assert!(session.is_connected());
        session.close().await;
    }

    #[tokio::test]
    async fn test_session_expiry_is_terminal() {
        let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
        let session = session_over(&ensemble);
        session.connect().unwrap();
        session.wait_connected(Duration::from_secs(2)).await.unwrap();

        ensemble.expire_session();
        let lost = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if session.state() == SessionState::Lost {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(lost.is_ok(), "expiry never reached Lost");
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_emits_before_clearing() {
        let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
        let session = session_over(&ensemble);
        session.connect().unwrap();
        session.wait_connected(Duration::from_secs(2)).await.unwrap();
        let (_sub, mut rx) = session.subscribe();

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        let mut saw_closed = false;
        while let Ok(event) = rx.try_recv() {
            if let KeeperEvent::Session(event) = event {
                saw_closed |= event.state == SessionState::Closed;
            }
        }
        assert!(saw_closed, "subscriber missed the Closed event");
    }

    #[tokio::test]
    async fn test_repeated_connect_spawns_one_establishment() {
        let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
        let session = session_over(&ensemble);
        let (_sub, mut rx) = session.subscribe();

        // Only the first call claims the Connecting edge; the rest no-op.
        session.connect().unwrap();
        session.connect().unwrap();
        session.connect().unwrap();
        session.wait_connected(Duration::from_secs(2)).await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let KeeperEvent::Session(event) = event {
                states.push(event.state);
            }
        }
        assert_eq!(
            states,
            vec![SessionState::Connecting, SessionState::Connected],
            "duplicate establishment detected"
        );

        session.close().await;
        assert!(matches!(
            session.connect(),
            Err(KeeperError::ConnectionClosed)
        ));
    }
}
