//! # Event Sink
//!
//! Receives inbound notifications on the session's delivery thread. The
//! borrowed message is copied first, unnamed copies are dropped with a warning,
//! and named ones are handed to a [`MessageProcessor`] on the tokio runtime so
//! the delivery thread never waits on downstream work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::core::session::{ConsumerClient, FeedMessage, MessageView};

/// Downstream consumer of owned messages.
pub trait MessageProcessor: Send + Sync {
    /// Handles one named message.
    fn process(&self, message: FeedMessage);
}

/// Default processor. Logs each message and leaves the payload alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProcessor;

impl MessageProcessor for LogProcessor {
    fn process(&self, message: FeedMessage) {
        log::debug!(
            "{} for [{}] on stream {} ({} bytes)",
            message.kind,
            message.name.as_deref().unwrap_or_default(),
            message
                .stream_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            message.payload.len()
        );
    }
}

/// [`ConsumerClient`] that copies inbound messages and forwards named ones.
pub struct EventSink {
    runtime: Handle,
    processor: Arc<dyn MessageProcessor>,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

impl EventSink {
    /// `runtime` is where processing tasks are spawned; capture it with
    /// `Handle::current()` while inside the runtime.
    pub fn new(runtime: Handle, processor: Arc<dyn MessageProcessor>) -> Self {
        Self {
            runtime,
            processor,
            dispatched: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Messages handed to the processor.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Messages dropped for lacking a name.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn handle(&self, message: &MessageView<'_>) {
        let owned = message.to_owned_message();
        if !owned.has_name() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("Received {} without a name, dropping: {:?}", owned.kind, owned);
            return;
        }

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let processor = self.processor.clone();
        self.runtime.spawn(async move {
            processor.process(owned);
        });
    }
}

impl ConsumerClient for EventSink {
    fn on_refresh(&self, message: &MessageView<'_>) {
        self.handle(message);
    }

    fn on_update(&self, message: &MessageView<'_>) {
        self.handle(message);
    }

    fn on_status(&self, _message: &MessageView<'_>) {
        // Do nothing
    }

    fn on_generic(&self, _message: &MessageView<'_>) {
        // Do nothing
    }

    fn on_ack(&self, _message: &MessageView<'_>) {
        // Do nothing
    }

    fn on_all(&self, _message: &MessageView<'_>) {
        // Do nothing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{deliver, MessageKind};
    use crate::core::types::StreamId;
    use tokio::sync::mpsc;

    struct ChannelProcessor {
        tx: mpsc::UnboundedSender<FeedMessage>,
    }

    impl MessageProcessor for ChannelProcessor {
        fn process(&self, message: FeedMessage) {
            let _ = self.tx.send(message);
        }
    }

    fn sink() -> (Arc<EventSink>, mpsc::UnboundedReceiver<FeedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Handle::current(), Arc::new(ChannelProcessor { tx }));
        (Arc::new(sink), rx)
    }

    #[tokio::test]
    async fn unnamed_messages_never_reach_the_processor() {
        let (sink, mut rx) = sink();
        for name in [None, Some("")] {
            let view = MessageView {
                kind: MessageKind::Update,
                stream_id: Some(StreamId(3)),
                name,
                service_name: None,
                payload: b"x",
            };
            deliver(sink.as_ref(), &view);
        }
        tokio::task::yield_now().await;

        assert_eq!(sink.dropped(), 2);
        assert_eq!(sink.dispatched(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn named_message_is_dispatched_once_as_an_independent_copy() {
        let (sink, mut rx) = sink();
        let mut buffer = b"BID=0.6612".to_vec();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let view = MessageView {
                    kind: MessageKind::Refresh,
                    stream_id: Some(StreamId(7)),
                    name: Some("AUD="),
                    service_name: Some("ELEKTRON_DD"),
                    payload: &buffer,
                };
                deliver(sink.as_ref(), &view);
            });
        });
        buffer.fill(0);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name.as_deref(), Some("AUD="));
        assert_eq!(&received.payload[..], b"BID=0.6612");
        assert_eq!(sink.dispatched(), 1);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn status_and_ack_are_ignored() {
        let (sink, mut rx) = sink();
        for kind in [MessageKind::Status, MessageKind::Generic, MessageKind::Ack] {
            let view = MessageView {
                kind,
                stream_id: None,
                name: Some("AUD="),
                service_name: None,
                payload: b"",
            };
            deliver(sink.as_ref(), &view);
        }
        tokio::task::yield_now().await;
        assert_eq!(sink.dispatched() + sink.dropped(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn log_processor_accepts_any_message() {
        LogProcessor.process(FeedMessage {
            kind: MessageKind::Update,
            stream_id: None,
            name: Some("EUR=".to_string()),
            service_name: None,
            payload: bytes::Bytes::new(),
        });
    }
}
