//! # Simulated Connector
//!
//! Each opened session owns a delivery thread, like a real transport would.
//! Registrations are queued to that thread, which answers with a refresh per
//! item and then ticks updates for every subscribed item. Messages are handed
//! to clients as borrowed views over a buffer the thread reuses.

use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::core::batcher::SubscriptionRequest;
use crate::core::session::{
    deliver, ConsumerClient, ConsumerConfig, FaultReporter, LoginRequest, MessageKind,
    MessageView, Session, SessionConnector, SessionError,
};
use crate::core::types::StreamId;

/// Behavior knobs for simulated sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedConfig {
    /// Number of opens to refuse before the first success.
    pub fail_first_opens: usize,
    /// Report a connection fault once a session has been up this long.
    pub session_lifetime: Option<Duration>,
    /// Delay between update ticks for every subscribed item.
    pub update_interval: Duration,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            fail_first_opens: 0,
            session_lifetime: None,
            update_interval: Duration::from_secs(1),
        }
    }
}

/// [`SessionConnector`] opening in-process simulated sessions.
pub struct SimulatedConnector {
    config: SimulatedConfig,
    opens: AtomicUsize,
}

impl SimulatedConnector {
    /// Connector applying `config` to every session it opens.
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            opens: AtomicUsize::new(0),
        }
    }

    /// Number of `open` calls so far, refused ones included.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl SessionConnector for SimulatedConnector {
    fn open(
        &self,
        config: ConsumerConfig,
        faults: FaultReporter,
    ) -> Result<Box<dyn Session>, SessionError> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.config.fail_first_opens {
            return Err(SessionError::Open(format!(
                "simulated connection refused (attempt {})",
                attempt
            )));
        }

        let channel = config.config.channel_for(&config.consumer_name).ok_or_else(|| {
            SessionError::Open(format!(
                "no channel configured for consumer [{}]",
                config.consumer_name
            ))
        })?;
        log::info!(
            "Simulated session [{}] connected to {}:{} ({})",
            config.consumer_name,
            channel.host,
            channel.port,
            channel.channel_type
        );

        let session = SimulatedSession::start(config.consumer_name, self.config.clone(), faults)?;
        Ok(Box::new(session))
    }
}

enum Command {
    Open {
        stream: StreamId,
        name: String,
        service: Option<String>,
        client: Arc<dyn ConsumerClient>,
    },
    Stop,
}

struct Subscription {
    stream: StreamId,
    name: String,
    service: Option<String>,
    client: Arc<dyn ConsumerClient>,
}

struct SimulatedSession {
    name: String,
    commands: mpsc::Sender<Command>,
    delivery: Option<JoinHandle<()>>,
    next_stream: AtomicU64,
}

impl SimulatedSession {
    fn start(
        name: String,
        config: SimulatedConfig,
        faults: FaultReporter,
    ) -> Result<Self, SessionError> {
        let (commands, rx) = mpsc::channel();
        let thread_name = name.clone();
        let delivery = std::thread::Builder::new()
            .name(format!("{}-delivery", name))
            .spawn(move || delivery_loop(thread_name, config, faults, rx))
            .map_err(|e| SessionError::Open(format!("failed to spawn delivery thread: {}", e)))?;

        Ok(Self {
            name,
            commands,
            delivery: Some(delivery),
            next_stream: AtomicU64::new(1),
        })
    }

    fn allocate_stream(&self) -> StreamId {
        StreamId(self.next_stream.fetch_add(1, Ordering::Relaxed))
    }

    fn enqueue(&self, command: Command) -> Result<(), SessionError> {
        if self.delivery.is_none() {
            return Err(SessionError::Uninitialized(self.name.clone()));
        }
        self.commands.send(command).map_err(|_| SessionError::Registration {
            session: self.name.clone(),
            reason: "connection is closed".to_string(),
        })
    }
}

impl Session for SimulatedSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_login(
        &mut self,
        request: &LoginRequest,
        client: Arc<dyn ConsumerClient>,
    ) -> Result<StreamId, SessionError> {
        let stream = self.allocate_stream();
        self.enqueue(Command::Open {
            stream,
            name: request.username.clone(),
            service: None,
            client,
        })?;
        Ok(stream)
    }

    fn register(
        &mut self,
        request: &SubscriptionRequest,
        client: Arc<dyn ConsumerClient>,
    ) -> Result<StreamId, SessionError> {
        // The batch itself gets a stream; every item is then opened on its own.
        let batch_stream = self.allocate_stream();
        for item in &request.items {
            let stream = self.allocate_stream();
            self.enqueue(Command::Open {
                stream,
                name: item.clone(),
                service: Some(request.service_name.clone()),
                client: client.clone(),
            })?;
        }
        Ok(batch_stream)
    }

    fn uninitialize(&mut self) -> Result<(), SessionError> {
        let delivery = self
            .delivery
            .take()
            .ok_or_else(|| SessionError::Uninitialized(self.name.clone()))?;
        let _ = self.commands.send(Command::Stop);
        delivery.join().map_err(|_| SessionError::Uninitialize {
            session: self.name.clone(),
            reason: "delivery thread panicked".to_string(),
        })
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        if self.delivery.is_some() {
            let _ = self.commands.send(Command::Stop);
        }
    }
}

fn delivery_loop(
    name: String,
    config: SimulatedConfig,
    faults: FaultReporter,
    commands: mpsc::Receiver<Command>,
) {
    let started = Instant::now();
    let mut subscriptions: Vec<Subscription> = Vec::new();
    let mut buffer: Vec<u8> = Vec::with_capacity(256);
    let mut rng = rand::rng();

    loop {
        let mut wait = config.update_interval;
        if let Some(lifetime) = config.session_lifetime {
            let elapsed = started.elapsed();
            if elapsed >= lifetime {
                log::warn!("Simulated session [{}] dropping its connection", name);
                faults.report(format!("simulated session [{}] lost its connection", name));
                return;
            }
            wait = wait.min(lifetime - elapsed);
        }

        match commands.recv_timeout(wait) {
            Ok(Command::Open {
                stream,
                name: item,
                service,
                client,
            }) => {
                write_quote(&mut buffer, &mut rng);
                let view = MessageView {
                    kind: MessageKind::Refresh,
                    stream_id: Some(stream),
                    name: Some(&item),
                    service_name: service.as_deref(),
                    payload: &buffer,
                };
                deliver(client.as_ref(), &view);
                subscriptions.push(Subscription {
                    stream,
                    name: item,
                    service,
                    client,
                });
            }
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => {
                log::debug!("Simulated session [{}] delivery stopped", name);
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                for sub in subscriptions.iter().filter(|s| s.service.is_some()) {
                    write_quote(&mut buffer, &mut rng);
                    let view = MessageView {
                        kind: MessageKind::Update,
                        stream_id: Some(sub.stream),
                        name: Some(&sub.name),
                        service_name: sub.service.as_deref(),
                        payload: &buffer,
                    };
                    deliver(sub.client.as_ref(), &view);
                }
            }
        }
    }
}

/// Overwrites `buffer` with a random quote.
fn write_quote(buffer: &mut Vec<u8>, rng: &mut impl Rng) {
    let bid: f64 = rng.random_range(0.5..150.0);
    let spread: f64 = rng.random_range(0.001..0.05);
    buffer.clear();
    let quote = json!({ "BID": bid, "ASK": bid + spread });
    // Writing JSON into a Vec cannot fail.
    let _ = serde_json::to_writer(&mut *buffer, &quote);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_map::{ChannelSettings, SessionConfigMap};
    use crate::core::types::Endpoint;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(MessageKind, String)>>,
    }

    impl ConsumerClient for Recorder {
        fn on_refresh(&self, message: &MessageView<'_>) {
            self.seen
                .lock()
                .unwrap()
                .push((message.kind, message.name.unwrap_or_default().to_string()));
        }

        fn on_update(&self, message: &MessageView<'_>) {
            self.on_refresh(message);
        }
    }

    fn consumer_config(name: &str) -> ConsumerConfig {
        ConsumerConfig {
            consumer_name: name.to_string(),
            username: "GE-A-01".to_string(),
            password: "pw".to_string(),
            client_id: "app".to_string(),
            config: SessionConfigMap::for_consumer(
                name,
                &Endpoint::new("localhost", 14002),
                &ChannelSettings::default(),
            ),
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn refuses_the_configured_number_of_opens() {
        let connector = SimulatedConnector::new(SimulatedConfig {
            fail_first_opens: 2,
            ..Default::default()
        });
        for _ in 0..2 {
            let (reporter, _rx) = FaultReporter::channel();
            assert!(matches!(
                connector.open(consumer_config("Consumer_1"), reporter),
                Err(SessionError::Open(_))
            ));
        }
        let (reporter, _rx) = FaultReporter::channel();
        let mut session = connector.open(consumer_config("Consumer_1"), reporter).unwrap();
        assert_eq!(session.name(), "Consumer_1");
        assert_eq!(connector.opens(), 3);
        session.uninitialize().unwrap();
    }

    #[test]
    fn delivers_refreshes_then_updates() {
        let connector = SimulatedConnector::new(SimulatedConfig {
            update_interval: Duration::from_millis(50),
            ..Default::default()
        });
        let (reporter, _rx) = FaultReporter::channel();
        let mut session = connector.open(consumer_config("Consumer_2"), reporter).unwrap();
        let recorder = Arc::new(Recorder::default());

        let login = LoginRequest {
            username: "GE-A-01".to_string(),
            application_id: "app".to_string(),
        };
        session.register_login(&login, recorder.clone()).unwrap();
        let request = SubscriptionRequest {
            service_name: "ELEKTRON_DD".to_string(),
            items: vec!["BHP.AX".to_string(), "CBA.AX".to_string()],
            view: None,
        };
        session.register(&request, recorder.clone()).unwrap();

        assert!(wait_until(|| {
            recorder
                .seen
                .lock()
                .unwrap()
                .iter()
                .any(|(kind, _)| *kind == MessageKind::Update)
        }));
        session.uninitialize().unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0], (MessageKind::Refresh, "GE-A-01".to_string()));
        assert_eq!(seen[1], (MessageKind::Refresh, "BHP.AX".to_string()));
        assert_eq!(seen[2], (MessageKind::Refresh, "CBA.AX".to_string()));
        assert!(seen
            .iter()
            .filter(|(kind, _)| *kind == MessageKind::Update)
            .all(|(_, name)| name != "GE-A-01"));
    }

    #[test]
    fn reports_a_fault_after_its_lifetime() {
        let connector = SimulatedConnector::new(SimulatedConfig {
            session_lifetime: Some(Duration::from_millis(30)),
            update_interval: Duration::from_millis(10),
            ..Default::default()
        });
        let (reporter, mut rx) = FaultReporter::channel();
        let mut session = connector.open(consumer_config("Consumer_3"), reporter).unwrap();

        assert!(wait_until(|| !rx.is_empty()));
        let fault = rx.try_recv().unwrap();
        assert!(fault.reason.contains("Consumer_3"));
        session.uninitialize().unwrap();
    }

    #[test]
    fn second_uninitialize_is_rejected() {
        let connector = SimulatedConnector::new(SimulatedConfig::default());
        let (reporter, _rx) = FaultReporter::channel();
        let mut session = connector.open(consumer_config("Consumer_4"), reporter).unwrap();
        session.uninitialize().unwrap();
        assert!(matches!(session.uninitialize(), Err(SessionError::Uninitialized(_))));

        let request = SubscriptionRequest {
            service_name: "ELEKTRON_DD".to_string(),
            items: vec!["BHP.AX".to_string()],
            view: None,
        };
        assert!(session.register(&request, Arc::new(Recorder::default())).is_err());
    }
}
