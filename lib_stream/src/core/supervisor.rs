//! # Session Supervisor
//!
//! Treats the whole session as one long-lived unit of work. Each cycle runs
//! discovery, session creation and subscription, then idles until the session
//! reports a fault. Whatever ends a cycle (an error, a fault, a panic) leads to
//! the same teardown, and the loop starts over without a retry limit.
//!
//! ```text
//! Idle -> Discovering -> SessionOpen -> Subscribing -> Idling
//!             ^                                           |
//!             +-------------- Teardown <------------------+
//! ```
//!
//! Shutdown is requested through a `CancellationToken`; the live session is
//! uninitialized before [`SessionSupervisor::run`] returns. Cancellation is only
//! observed outside session creation: an open that is already in flight is
//! allowed to finish so the session it produces can be uninitialized too.

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::batcher::SubscriptionBatcher;
use crate::core::discovery::{DiscoveryError, EndpointDiscovery};
use crate::core::factory::{SessionCreationError, SessionFactory};
use crate::core::gate::{retire, Registration, RegistrationGate};
use crate::core::instruments::{InstrumentError, InstrumentSource};
use crate::core::restart::RestartPolicy;
use crate::core::session::ConsumerClient;

/// Supervisor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed, `run` not yet called.
    Idle,
    /// Resolving an endpoint.
    Discovering,
    /// A session is installed and logged in.
    SessionOpen,
    /// Registering subscription batches.
    Subscribing,
    /// Subscriptions are registered; waiting for a fault.
    Idling,
    /// Uninitializing the session before the next cycle or shutdown.
    Teardown,
    /// Shutdown completed.
    Stopped,
}

/// Reasons a cycle ended.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No endpoint could be resolved.
    #[error("Endpoint discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The session could not be opened or logged in.
    #[error("Session creation failed: {0}")]
    Creation(#[from] SessionCreationError),

    /// The instrument list could not be loaded.
    #[error("Failed to load instruments: {0}")]
    Instruments(#[from] InstrumentError),

    /// The session surfaced a fatal I/O error.
    #[error("Session reported a fault: {0}")]
    SessionFault(String),

    /// Every fault reporter of the session was dropped.
    #[error("Session dropped its fault reporter")]
    SessionLost,

    /// A panic escaped the cycle; carries the panic message.
    #[error("Supervisor cycle panicked: {0}")]
    Panicked(String),
}

/// Counters for observability and tests.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    cycles: AtomicU64,
    sessions_opened: AtomicU64,
    teardowns: AtomicU64,
    batches_registered: AtomicU64,
    batches_unavailable: AtomicU64,
    batches_failed: AtomicU64,
}

impl SupervisorStats {
    /// Cycles started, including the one in progress.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Sessions that were opened and logged in.
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    /// Sessions taken out of the gate and uninitialized.
    pub fn teardowns(&self) -> u64 {
        self.teardowns.load(Ordering::Relaxed)
    }

    /// Batches the session accepted.
    pub fn batches_registered(&self) -> u64 {
        self.batches_registered.load(Ordering::Relaxed)
    }

    /// Batches skipped because no session was live.
    pub fn batches_unavailable(&self) -> u64 {
        self.batches_unavailable.load(Ordering::Relaxed)
    }

    /// Batches the session rejected. The remaining batches were still attempted.
    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }
}

/// Keeps one streaming session alive and rebuilds it on any failure.
pub struct SessionSupervisor {
    discovery: EndpointDiscovery,
    factory: SessionFactory,
    batcher: SubscriptionBatcher,
    instruments: Arc<dyn InstrumentSource>,
    client: Arc<dyn ConsumerClient>,
    gate: RegistrationGate,
    restart: RestartPolicy,
    state: watch::Sender<SupervisorState>,
    stats: SupervisorStats,
}

impl SessionSupervisor {
    /// Wires the collaborators. The restart policy defaults to [`RestartPolicy::default`].
    pub fn new(
        discovery: EndpointDiscovery,
        factory: SessionFactory,
        batcher: SubscriptionBatcher,
        instruments: Arc<dyn InstrumentSource>,
        client: Arc<dyn ConsumerClient>,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            discovery,
            factory,
            batcher,
            instruments,
            client,
            gate: RegistrationGate::new(),
            restart: RestartPolicy::default(),
            state,
            stats: SupervisorStats::default(),
        }
    }

    /// Replaces the delay policy applied between cycles.
    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// The gate holding the live session.
    pub fn gate(&self) -> &RegistrationGate {
        &self.gate
    }

    /// Counters for the cycles run so far.
    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log::debug!("Transitioning state: {:?} -> {:?}", previous, next);
        }
    }

    /// Runs cycles until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        log::info!("Session supervisor started.");
        let mut attempt: u32 = 0;

        loop {
            self.stats.cycles.fetch_add(1, Ordering::Relaxed);

            let outcome = AssertUnwindSafe(self.run_cycle(&shutdown))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => break,
                Ok(Err(e)) => e,
                Err(panic) => SupervisorError::Panicked(panic_message(panic.as_ref())),
            };

            if self.state() == SupervisorState::Idling {
                attempt = 0;
            }
            log::error!("Session cycle ended: {}. Restarting.", error);
            self.teardown().await;

            attempt = attempt.saturating_add(1);
            let delay = self.restart.delay_for(attempt);
            if !delay.is_zero() {
                log::info!("Next session attempt #{} in {:?}", attempt, delay);
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        log::info!("Shutdown requested, stopping session supervisor.");
        self.teardown().await;
        self.transition(SupervisorState::Stopped);
    }

    /// One pass through the lifecycle. `Ok` means shutdown was requested; a
    /// healthy session otherwise idles until it faults.
    async fn run_cycle(&self, shutdown: &CancellationToken) -> Result<(), SupervisorError> {
        self.transition(SupervisorState::Discovering);
        let endpoint = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            endpoint = self.discovery.discover(self.factory.credentials()) => endpoint?,
        };

        // Not raced against shutdown: the opened session must reach the gate.
        let mut open = self
            .factory
            .create(&endpoint, &self.gate, self.client.clone())
            .await?;
        self.stats.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.transition(SupervisorState::SessionOpen);
        if shutdown.is_cancelled() {
            return Ok(());
        }

        self.transition(SupervisorState::Subscribing);
        self.subscribe(shutdown).await?;

        self.transition(SupervisorState::Idling);
        log::info!("Session [{}] is streaming.", open.name);
        tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            fault = open.faults.recv() => match fault {
                Some(fault) => Err(SupervisorError::SessionFault(fault.reason)),
                None => Err(SupervisorError::SessionLost),
            },
        }
    }

    /// Registers every batch in order. A batch that is unavailable or rejected
    /// is logged and counted, and the next batch is attempted regardless.
    async fn subscribe(&self, shutdown: &CancellationToken) -> Result<(), SupervisorError> {
        let rics = self.instruments.load()?;
        log::info!(
            "Subscribing {} instruments in {} batches of at most {}",
            rics.len(),
            self.batcher.expected_batches(rics.len()),
            self.batcher.max_batch_size()
        );

        for (index, request) in self.batcher.batches(&rics).enumerate() {
            if shutdown.is_cancelled() {
                break;
            }
            match self.gate.register(&request, self.client.clone()).await {
                Ok(Registration::Registered(stream)) => {
                    self.stats.batches_registered.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "Batch {} ({} items) registered on stream {}",
                        index + 1,
                        request.items.len(),
                        stream
                    );
                }
                Ok(Registration::Unavailable) => {
                    self.stats.batches_unavailable.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Batch {} skipped: no live session", index + 1);
                }
                Err(e) => {
                    self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "Batch {} ({} items) failed to register: {}",
                        index + 1,
                        request.items.len(),
                        e
                    );
                }
            }
        }
        Ok(())
    }

    async fn teardown(&self) {
        self.transition(SupervisorState::Teardown);
        if let Some(session) = self.gate.take().await {
            self.stats.teardowns.fetch_add(1, Ordering::Relaxed);
            retire(session).await;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batcher::SubscriptionRequest;
    use crate::core::config_map::ChannelSettings;
    use crate::core::discovery::{ServiceEndpoint, StaticDiscoveryService};
    use crate::core::instruments::StaticInstruments;
    use crate::core::session::{
        ConsumerConfig, FaultReporter, LoginRequest, MessageView, Session, SessionConnector,
        SessionError,
    };
    use crate::core::types::{Credentials, StreamId};
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullClient;

    impl ConsumerClient for NullClient {
        fn on_refresh(&self, _message: &MessageView<'_>) {}
        fn on_update(&self, _message: &MessageView<'_>) {}
    }

    struct FakeSession {
        name: String,
        _faults: FaultReporter,
        registered: Arc<AtomicUsize>,
        uninitialized: Arc<AtomicBool>,
        reject_first_register: bool,
        fail_uninitialize: bool,
    }

    impl Session for FakeSession {
        fn name(&self) -> &str {
            &self.name
        }

        fn register_login(
            &mut self,
            _request: &LoginRequest,
            _client: Arc<dyn ConsumerClient>,
        ) -> Result<StreamId, SessionError> {
            Ok(StreamId(1))
        }

        fn register(
            &mut self,
            _request: &SubscriptionRequest,
            _client: Arc<dyn ConsumerClient>,
        ) -> Result<StreamId, SessionError> {
            let n = self.registered.fetch_add(1, Ordering::SeqCst);
            if self.reject_first_register && n == 0 {
                return Err(SessionError::Registration {
                    session: self.name.clone(),
                    reason: "item list rejected".to_string(),
                });
            }
            Ok(StreamId(n as u64 + 2))
        }

        fn uninitialize(&mut self) -> Result<(), SessionError> {
            self.uninitialized.store(true, Ordering::SeqCst);
            if self.fail_uninitialize {
                return Err(SessionError::Uninitialize {
                    session: self.name.clone(),
                    reason: "socket already closed".to_string(),
                });
            }
            Ok(())
        }
    }

    /// Fails the first `failures` opens, then hands out fake sessions.
    #[derive(Default)]
    struct FlakyConnector {
        failures: usize,
        open_delay: Duration,
        reject_first_register: bool,
        fail_uninitialize: bool,
        attempts: AtomicUsize,
        registered: Arc<AtomicUsize>,
        reporters: Mutex<Vec<FaultReporter>>,
        uninitialized: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl SessionConnector for FlakyConnector {
        fn open(
            &self,
            config: ConsumerConfig,
            faults: FaultReporter,
        ) -> Result<Box<dyn Session>, SessionError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.open_delay);
            if attempt < self.failures {
                return Err(SessionError::Open(format!("attempt {} refused", attempt + 1)));
            }
            let flag = Arc::new(AtomicBool::new(false));
            self.reporters.lock().unwrap().push(faults.clone());
            self.uninitialized.lock().unwrap().push(flag.clone());
            Ok(Box::new(FakeSession {
                name: config.consumer_name,
                _faults: faults,
                registered: self.registered.clone(),
                uninitialized: flag,
                reject_first_register: self.reject_first_register,
                fail_uninitialize: self.fail_uninitialize,
            }))
        }
    }

    struct PanicOnceInstruments {
        calls: AtomicUsize,
    }

    impl InstrumentSource for PanicOnceInstruments {
        fn load(&self) -> Result<Vec<String>, InstrumentError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("instrument file corrupted");
            }
            Ok(vec!["AUD=".to_string()])
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("GE-A-01", "appkey", "pw", "us-east-1", "ELEKTRON_DD")
    }

    fn discovery() -> EndpointDiscovery {
        EndpointDiscovery::new(Arc::new(StaticDiscoveryService::new(vec![ServiceEndpoint {
            endpoint: "us-east-1-aws-1-sm.example.net".to_string(),
            port: 14002,
            locations: vec!["us-east-1a".to_string(), "us-east-1b".to_string()],
            transport: "tcp".to_string(),
        }])))
    }

    fn supervisor(
        connector: Arc<FlakyConnector>,
        instruments: Arc<dyn InstrumentSource>,
    ) -> Arc<SessionSupervisor> {
        let factory = SessionFactory::new(connector, credentials(), ChannelSettings::default());
        let batcher = SubscriptionBatcher::new("ELEKTRON_DD", NonZeroUsize::new(2).unwrap());
        Arc::new(
            SessionSupervisor::new(discovery(), factory, batcher, instruments, Arc::new(NullClient))
                .with_restart_policy(RestartPolicy::immediate()),
        )
    }

    fn five_rics() -> Arc<dyn InstrumentSource> {
        Arc::new(StaticInstruments::new(["A", "B", "C", "D", "E"]))
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn recovers_after_repeated_creation_failures() {
        let connector = Arc::new(FlakyConnector {
            failures: 3,
            ..Default::default()
        });
        let supervisor = supervisor(connector.clone(), five_rics());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(shutdown.clone()));

        let mut state = supervisor.watch_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == SupervisorState::Idling),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
        assert!(supervisor.stats().teardowns() <= 3);
        assert!(supervisor.gate().is_live().await);
        assert_eq!(connector.registered.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.stats().batches_registered(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(supervisor.state(), SupervisorState::Idling);
        assert_eq!(supervisor.stats().sessions_opened(), 1);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(!supervisor.gate().is_live().await);
        let flags = connector.uninitialized.lock().unwrap();
        assert!(flags[0].load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_fault_triggers_a_fresh_session() {
        let connector = Arc::new(FlakyConnector::default());
        let supervisor = supervisor(connector.clone(), five_rics());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(shutdown.clone()));

        eventually(|| supervisor.state() == SupervisorState::Idling).await;
        let first = connector.reporters.lock().unwrap()[0].clone();
        assert!(first.report("connection reset by peer"));

        eventually(|| supervisor.stats().sessions_opened() == 2).await;
        eventually(|| supervisor.state() == SupervisorState::Idling).await;

        assert_eq!(supervisor.stats().teardowns(), 1);
        assert!(connector.uninitialized.lock().unwrap()[0].load(Ordering::SeqCst));
        assert!(!connector.uninitialized.lock().unwrap()[1].load(Ordering::SeqCst));

        shutdown.cancel();
        task.await.unwrap();
        assert!(connector.uninitialized.lock().unwrap()[1].load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_inside_a_cycle_is_a_restart() {
        let connector = Arc::new(FlakyConnector::default());
        let instruments = Arc::new(PanicOnceInstruments {
            calls: AtomicUsize::new(0),
        });
        let supervisor = supervisor(connector.clone(), instruments.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(shutdown.clone()));

        eventually(|| supervisor.state() == SupervisorState::Idling).await;
        assert_eq!(instruments.calls.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.stats().sessions_opened(), 2);
        assert_eq!(supervisor.stats().teardowns(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_during_failing_discovery_stops_cleanly() {
        let connector = Arc::new(FlakyConnector::default());
        let factory = SessionFactory::new(connector.clone(), credentials(), ChannelSettings::default());
        let batcher = SubscriptionBatcher::new("ELEKTRON_DD", NonZeroUsize::new(2).unwrap());
        let supervisor = Arc::new(
            SessionSupervisor::new(
                EndpointDiscovery::new(Arc::new(StaticDiscoveryService::default())),
                factory,
                batcher,
                five_rics(),
                Arc::new(NullClient),
            )
            .with_restart_policy(RestartPolicy::immediate()),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(shutdown.clone()));

        eventually(|| supervisor.stats().cycles() > 3).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(supervisor.stats().teardowns(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejected_batch_does_not_abort_the_rest() {
        let connector = Arc::new(FlakyConnector {
            reject_first_register: true,
            ..Default::default()
        });
        let supervisor = supervisor(connector.clone(), five_rics());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(shutdown.clone()));

        eventually(|| supervisor.state() == SupervisorState::Idling).await;
        assert_eq!(connector.registered.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.stats().batches_failed(), 1);
        assert_eq!(supervisor.stats().batches_registered(), 2);
        assert_eq!(supervisor.stats().teardowns(), 0);
        assert_eq!(supervisor.stats().sessions_opened(), 1);
        assert!(!connector.uninitialized.lock().unwrap()[0].load(Ordering::SeqCst));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_during_open_still_uninitializes_the_session() {
        let connector = Arc::new(FlakyConnector {
            open_delay: Duration::from_millis(300),
            ..Default::default()
        });
        let supervisor = supervisor(connector.clone(), five_rics());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(shutdown.clone()));

        eventually(|| connector.attempts.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(supervisor.stats().sessions_opened(), 1);
        assert_eq!(supervisor.stats().teardowns(), 1);
        assert!(!supervisor.gate().is_live().await);
        let flags = connector.uninitialized.lock().unwrap();
        assert_eq!(flags.len(), 1);
        assert!(flags[0].load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_uninitialize_is_swallowed_and_the_loop_continues() {
        let connector = Arc::new(FlakyConnector {
            fail_uninitialize: true,
            ..Default::default()
        });
        let supervisor = supervisor(connector.clone(), five_rics());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(shutdown.clone()));

        eventually(|| supervisor.state() == SupervisorState::Idling).await;
        let first = connector.reporters.lock().unwrap()[0].clone();
        assert!(first.report("connection reset by peer"));

        eventually(|| supervisor.stats().sessions_opened() == 2).await;
        eventually(|| supervisor.state() == SupervisorState::Idling).await;
        assert_eq!(supervisor.stats().teardowns(), 1);
        assert!(connector.uninitialized.lock().unwrap()[0].load(Ordering::SeqCst));
        assert!(supervisor.gate().is_live().await);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
