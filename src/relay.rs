//! Forwarding of reply increments to a slow client without unbounded buffering.
//!
//! [`RelayWriter`] pulls the next increment only after the previous write completed, so
//! a client that stops reading stalls the vendor stream instead of growing memory.

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LLMError;
use crate::provider::TextStream;

/// The client went away; nothing written afterwards can reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("client disconnected")]
pub struct ClientDisconnected;

/// Outbound half of a client connection.
#[async_trait]
pub trait ClientTransport: Send {
    /// Suspends while the client buffer is full.
    async fn write(&mut self, text: &str) -> Result<(), ClientDisconnected>;

    /// Ends the client stream.
    async fn close(&mut self);
}

/// [`ClientTransport`] over a bounded channel; the receiver is what an HTTP layer turns
/// into a response body.
pub struct ChannelTransport {
    sender: Option<mpsc::Sender<String>>,
}

impl ChannelTransport {
    pub fn new(sender: mpsc::Sender<String>) -> Self {
        Self {
            sender: Some(sender),
        }
    }
}

/// Creates a transport and its receiving end with room for `capacity` increments.
pub fn channel(capacity: usize) -> (ChannelTransport, mpsc::Receiver<String>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ChannelTransport::new(sender), receiver)
}

#[async_trait]
impl ClientTransport for ChannelTransport {
    async fn write(&mut self, text: &str) -> Result<(), ClientDisconnected> {
        let Some(sender) = &self.sender else {
            return Err(ClientDisconnected);
        };
        sender
            .send(text.to_string())
            .await
            .map_err(|_| ClientDisconnected)
    }

    async fn close(&mut self) {
        // Dropping the last sender ends the receiver's stream.
        self.sender = None;
    }
}

/// How a relay ended. Cancellation and disconnects are normal endings, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed { increments: usize },
    Cancelled,
    Disconnected,
}

/// Copies increments from a [`TextStream`] to a [`ClientTransport`], one at a time.
///
/// # Examples
///
/// ```
/// use futures_util::stream;
/// use relay_llm::relay::{RelayOutcome, RelayWriter, channel};
/// use relay_llm::{LLMError, TextStream};
/// use tokio_util::sync::CancellationToken;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let (transport, mut receiver) = channel(4);
/// let source: TextStream = Box::pin(stream::iter(vec![
///     Ok::<_, LLMError>("Hel".to_string()),
///     Ok("lo".to_string()),
/// ]));
/// let outcome = RelayWriter::new(transport, CancellationToken::new())
///     .run(source)
///     .await
///     .unwrap();
/// assert_eq!(outcome, RelayOutcome::Completed { increments: 2 });
/// assert_eq!(receiver.recv().await.as_deref(), Some("Hel"));
/// assert_eq!(receiver.recv().await.as_deref(), Some("lo"));
/// assert_eq!(receiver.recv().await, None);
/// # });
/// ```
pub struct RelayWriter<T> {
    transport: T,
    cancel: CancellationToken,
    closed: bool,
    written: usize,
}

impl<T: ClientTransport> RelayWriter<T> {
    /// `cancel` is observed between increments and while a write is pending.
    pub fn new(transport: T, cancel: CancellationToken) -> Self {
        Self {
            transport,
            cancel,
            closed: false,
            written: 0,
        }
    }

    /// Relays until the stream ends, the token fires or the client disconnects.
    ///
    /// A disconnect or an upstream error cancels the token so the vendor connection is
    /// released. The client stream is closed exactly once on every path and nothing is
    /// written after that.
    pub async fn run(mut self, mut stream: TextStream) -> Result<RelayOutcome, LLMError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(self.cancelled().await),
                item = stream.next() => item,
            };
            let text = match next {
                None => {
                    self.close().await;
                    debug!(increments = self.written, "relay completed");
                    return Ok(RelayOutcome::Completed {
                        increments: self.written,
                    });
                }
                Some(Err(LLMError::Cancelled)) => return Ok(self.cancelled().await),
                Some(Err(err)) => {
                    self.cancel.cancel();
                    self.close().await;
                    return Err(err);
                }
                Some(Ok(text)) => text,
            };

            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(self.cancelled().await),
                result = self.transport.write(&text) => result,
            };
            match written {
                Ok(()) => self.written += 1,
                Err(ClientDisconnected) => {
                    debug!(increments = self.written, "client disconnected, aborting stream");
                    self.cancel.cancel();
                    self.close().await;
                    return Ok(RelayOutcome::Disconnected);
                }
            }
        }
    }

    async fn cancelled(&mut self) -> RelayOutcome {
        debug!(increments = self.written, "relay cancelled");
        self.close().await;
        RelayOutcome::Cancelled
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures_util::stream;

    use super::*;

    fn text_stream(items: Vec<Result<String, LLMError>>) -> TextStream {
        Box::pin(stream::iter(items))
    }

    #[derive(Default)]
    struct Recorded {
        writes: Vec<String>,
        closes: usize,
        writes_after_close: usize,
    }

    /// Records every call; optionally fails once `fail_after` writes succeeded.
    struct RecordingTransport {
        log: Arc<Mutex<Recorded>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl ClientTransport for RecordingTransport {
        async fn write(&mut self, text: &str) -> Result<(), ClientDisconnected> {
            let mut log = self.log.lock().expect("log");
            if log.closes > 0 {
                log.writes_after_close += 1;
            }
            if self.fail_after.is_some_and(|limit| log.writes.len() >= limit) {
                return Err(ClientDisconnected);
            }
            log.writes.push(text.to_string());
            Ok(())
        }

        async fn close(&mut self) {
            self.log.lock().expect("log").closes += 1;
        }
    }

    fn recording(fail_after: Option<usize>) -> (RecordingTransport, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        (
            RecordingTransport {
                log: Arc::clone(&log),
                fail_after,
            },
            log,
        )
    }

    #[tokio::test]
    async fn relays_in_order_and_closes_once() {
        let (transport, log) = recording(None);
        let items = vec![Ok("Hel".to_string()), Ok("lo".to_string())];
        let outcome = RelayWriter::new(transport, CancellationToken::new())
            .run(text_stream(items))
            .await
            .expect("relay");
        assert_eq!(outcome, RelayOutcome::Completed { increments: 2 });
        let log = log.lock().expect("log");
        assert_eq!(log.writes, vec!["Hel", "lo"]);
        assert_eq!(log.closes, 1);
    }

    #[tokio::test]
    async fn disconnect_cancels_upstream_and_stops_writing() {
        let (transport, log) = recording(Some(1));
        let cancel = CancellationToken::new();
        let items = (0..5).map(|i| Ok(format!("part{i}"))).collect();
        let outcome = RelayWriter::new(transport, cancel.clone())
            .run(text_stream(items))
            .await
            .expect("relay");
        assert_eq!(outcome, RelayOutcome::Disconnected);
        assert!(cancel.is_cancelled());
        let log = log.lock().expect("log");
        assert_eq!(log.writes, vec!["part0"]);
        assert_eq!(log.closes, 1);
        assert_eq!(log.writes_after_close, 0);
    }

    #[tokio::test]
    async fn upstream_error_is_returned_after_closing() {
        let (transport, log) = recording(None);
        let cancel = CancellationToken::new();
        let items = vec![
            Ok("a".to_string()),
            Err(LLMError::decode("ollama", "bad line")),
        ];
        let err = RelayWriter::new(transport, cancel.clone())
            .run(text_stream(items))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::Decode { .. }));
        assert!(cancel.is_cancelled());
        assert_eq!(log.lock().expect("log").closes, 1);
    }

    #[tokio::test]
    async fn cancelled_item_ends_relay_quietly() {
        let (transport, log) = recording(None);
        let items = vec![Ok("a".to_string()), Err(LLMError::Cancelled)];
        let outcome = RelayWriter::new(transport, CancellationToken::new())
            .run(text_stream(items))
            .await
            .expect("relay");
        assert_eq!(outcome, RelayOutcome::Cancelled);
        assert_eq!(log.lock().expect("log").closes, 1);
    }

    #[tokio::test]
    async fn cancellation_while_blocked_on_write_stops_relay() {
        let (transport, mut receiver) = channel(1);
        let cancel = CancellationToken::new();
        let items = (0..10).map(|i| Ok(i.to_string())).collect();
        let relay = tokio::spawn(RelayWriter::new(transport, cancel.clone()).run(text_stream(items)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let outcome = relay.await.expect("join").expect("relay");
        assert_eq!(outcome, RelayOutcome::Cancelled);

        assert_eq!(receiver.recv().await.as_deref(), Some("0"));
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn slow_client_applies_backpressure_to_the_source() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulls);
        let source: TextStream = Box::pin(
            stream::iter((0..100).map(|i| Ok::<_, LLMError>(i.to_string()))).inspect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let (transport, mut receiver) = channel(1);
        let relay = tokio::spawn(RelayWriter::new(transport, CancellationToken::new()).run(source));

        tokio::time::sleep(Duration::from_millis(50)).await;
        // One increment sits in the channel and one is waiting to be written.
        assert_eq!(pulls.load(Ordering::SeqCst), 2);

        let mut received = Vec::new();
        while let Some(text) = receiver.recv().await {
            received.push(text);
        }
        let outcome = relay.await.expect("join").expect("relay");
        assert_eq!(outcome, RelayOutcome::Completed { increments: 100 });
        assert_eq!(received.len(), 100);
        assert_eq!(received[99], "99");
    }

    #[tokio::test]
    async fn dropped_receiver_is_a_disconnect() {
        let (transport, receiver) = channel(4);
        drop(receiver);
        let cancel = CancellationToken::new();
        let outcome = RelayWriter::new(transport, cancel.clone())
            .run(text_stream(vec![Ok("x".to_string())]))
            .await
            .expect("relay");
        assert_eq!(outcome, RelayOutcome::Disconnected);
        assert!(cancel.is_cancelled());
    }
}
