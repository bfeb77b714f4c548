use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::LLMError;
use crate::provider::{DynAdapter, TextStream};
use crate::relay::{ChannelTransport, ClientTransport, RelayOutcome, RelayWriter, channel};
use crate::types::{
    CapabilityDescriptor, DispatchOptions, DispatchReply, DispatchRequest, OutputMode,
};

const DEFAULT_RELAY_BUFFER: usize = 32;

/// Dispatch entry point holding one adapter per vendor id.
///
/// Built once at startup and shared read-only afterwards, so concurrent dispatches need
/// no locking.
///
/// # Examples
///
/// ```no_run
/// use futures_util::StreamExt;
/// use relay_llm::http::reqwest::default_dyn_transport;
/// use relay_llm::{
///     DispatchConfig, DispatchReply, DispatchRequest, NeutralMessage, VendorKind,
///     build_dispatcher,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), relay_llm::LLMError> {
/// let config = DispatchConfig::from_env(&[VendorKind::Ollama])?;
/// let dispatcher = build_dispatcher(&config, default_dyn_transport()?)?;
///
/// let request = DispatchRequest::new(
///     "ollama",
///     vec![
///         NeutralMessage::context("Answer briefly."),
///         NeutralMessage::user("What is Rust?"),
///     ],
/// )
/// .streaming();
/// match dispatcher.dispatch(&request, &CancellationToken::new()).await? {
///     DispatchReply::Stream(mut increments) => {
///         while let Some(text) = increments.next().await {
///             print!("{}", text?);
///         }
///     }
///     DispatchReply::Text(text) => println!("{text}"),
///     DispatchReply::Cancelled => {}
/// }
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher {
    adapters: HashMap<String, DynAdapter>,
    relay_buffer: usize,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder {
            adapters: HashMap::new(),
            relay_buffer: DEFAULT_RELAY_BUFFER,
        }
    }

    /// Looks up the adapter for `vendor`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::UnsupportedVendor`] when no adapter is registered under the id.
    pub fn resolve(&self, vendor: &str) -> Result<DynAdapter, LLMError> {
        self.adapters
            .get(&vendor.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| LLMError::UnsupportedVendor {
                vendor: vendor.to_string(),
            })
    }

    /// Registered vendor ids.
    pub fn vendors(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    /// Capabilities advertised by the adapter registered for `vendor`.
    pub fn capabilities(&self, vendor: &str) -> Result<CapabilityDescriptor, LLMError> {
        Ok(self.resolve(vendor)?.capabilities())
    }

    /// Sends one request in the requested [`OutputMode`].
    ///
    /// The wire body, including attachment encoding, is built before any network call.
    /// A cancellation is reported as [`DispatchReply::Cancelled`] rather than an error.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchReply, LLMError> {
        let result = match request.mode {
            OutputMode::Sync => self.send_sync(request, cancel).await.map(DispatchReply::Text),
            OutputMode::Stream => self
                .open_stream(request, cancel)
                .await
                .map(DispatchReply::Stream),
        };
        match result {
            Err(LLMError::Cancelled) => {
                debug!(vendor = %request.vendor, "dispatch cancelled");
                Ok(DispatchReply::Cancelled)
            }
            other => other,
        }
    }

    /// Streams the reply of `request` into `transport`, whatever its output mode.
    ///
    /// The client stream is closed on every path, including failures that happen before
    /// the vendor answered.
    pub async fn dispatch_to<T: ClientTransport>(
        &self,
        request: &DispatchRequest,
        mut transport: T,
        cancel: CancellationToken,
    ) -> Result<RelayOutcome, LLMError> {
        let stream = match self.open_stream(request, &cancel).await {
            Ok(stream) => stream,
            Err(err) => {
                transport.close().await;
                return match err {
                    LLMError::Cancelled => Ok(RelayOutcome::Cancelled),
                    err => Err(err),
                };
            }
        };
        RelayWriter::new(transport, cancel).run(stream).await
    }

    /// Bounded client channel sized from the dispatcher settings.
    pub fn relay_channel(&self) -> (ChannelTransport, mpsc::Receiver<String>) {
        channel(self.relay_buffer)
    }

    async fn send_sync(
        &self,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<String, LLMError> {
        let adapter = self.resolve(&request.vendor)?;
        let options = effective_options(request, adapter.name())?;
        let body = adapter.build_body(&request.messages, &options, false)?;
        info!(
            vendor = adapter.name(),
            model = body.model(),
            mode = "sync",
            messages = request.messages.len(),
            "dispatching request"
        );
        adapter.send_request(&body, cancel).await
    }

    async fn open_stream(
        &self,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<TextStream, LLMError> {
        let adapter = self.resolve(&request.vendor)?;
        let options = effective_options(request, adapter.name())?;
        let body = adapter.build_body(&request.messages, &options, true)?;
        info!(
            vendor = adapter.name(),
            model = body.model(),
            mode = "stream",
            messages = request.messages.len(),
            "dispatching request"
        );
        adapter.send_request_stream(&body, cancel).await
    }
}

/// Validated options; without an explicit target model the newest message tagged
/// `<vendor>/<model>` for this adapter's vendor is used, otherwise the adapter default.
fn effective_options(
    request: &DispatchRequest,
    vendor: &str,
) -> Result<DispatchOptions, LLMError> {
    request.options.validate()?;
    let mut options = request.options.clone();
    let has_target = options
        .target_model
        .as_deref()
        .is_some_and(|model| !model.trim().is_empty());
    if !has_target {
        options.target_model = request
            .messages
            .iter()
            .rev()
            .filter_map(|message| message.model_name.as_deref())
            .find(|tag| tag_belongs_to(tag, vendor))
            .map(str::to_string);
    }
    Ok(options)
}

fn tag_belongs_to(tag: &str, vendor: &str) -> bool {
    tag.trim()
        .split_once('/')
        .is_some_and(|(prefix, model)| prefix.eq_ignore_ascii_case(vendor) && !model.is_empty())
}

/// Registers adapters before the dispatcher is shared.
pub struct DispatcherBuilder {
    adapters: HashMap<String, DynAdapter>,
    relay_buffer: usize,
}

impl DispatcherBuilder {
    /// Registers `adapter` under its lower-case name, replacing any previous one.
    pub fn register(mut self, adapter: DynAdapter) -> Self {
        self.adapters
            .insert(adapter.name().to_ascii_lowercase(), adapter);
        self
    }

    /// Capacity of channels handed out by [`Dispatcher::relay_channel`].
    pub fn relay_buffer(mut self, capacity: usize) -> Self {
        self.relay_buffer = capacity.max(1);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            adapters: self.adapters,
            relay_buffer: self.relay_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures_util::{StreamExt, stream};

    use super::*;
    use crate::provider::VendorAdapter;
    use crate::types::{FileAttachment, NeutralMessage, VendorRequestBody};

    /// Echoes the last message back and counts how often the "network" was reached.
    struct EchoAdapter {
        calls: Arc<AtomicUsize>,
        seen_model: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl VendorAdapter for EchoAdapter {
        fn build_body(
            &self,
            messages: &[NeutralMessage],
            options: &DispatchOptions,
            stream: bool,
        ) -> Result<VendorRequestBody, LLMError> {
            crate::normalize::normalize(
                messages,
                &crate::normalize::RoleTable::CHAT,
                options.supports_vision,
            )?;
            let model = options.target_model.clone().unwrap_or_default();
            *self.seen_model.lock().expect("model") = Some(model.clone());
            let text = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(VendorRequestBody::new(
                "echo",
                model,
                stream,
                serde_json::Value::String(text),
            ))
        }

        async fn send_request(
            &self,
            body: &VendorRequestBody,
            cancel: &CancellationToken,
        ) -> Result<String, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return Err(LLMError::Cancelled);
            }
            Ok(body.payload().as_str().unwrap_or_default().to_string())
        }

        async fn send_request_stream(
            &self,
            body: &VendorRequestBody,
            cancel: &CancellationToken,
        ) -> Result<TextStream, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return Err(LLMError::Cancelled);
            }
            let words: Vec<Result<String, LLMError>> = body
                .payload()
                .as_str()
                .unwrap_or_default()
                .split(' ')
                .map(|word| Ok(word.to_string()))
                .collect();
            Ok(Box::pin(stream::iter(words)))
        }

        fn capabilities(&self) -> CapabilityDescriptor {
            CapabilityDescriptor {
                supports_stream: true,
                supports_vision: true,
            }
        }

        fn name(&self) -> &'static str {
            "Echo"
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<AtomicUsize>, Arc<std::sync::Mutex<Option<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen_model = Arc::new(std::sync::Mutex::new(None));
        let adapter = EchoAdapter {
            calls: Arc::clone(&calls),
            seen_model: Arc::clone(&seen_model),
        };
        let dispatcher = Dispatcher::builder()
            .register(Arc::new(adapter))
            .relay_buffer(2)
            .build();
        (dispatcher, calls, seen_model)
    }

    #[tokio::test]
    async fn resolves_vendor_ids_case_insensitively() {
        let (dispatcher, _, _) = dispatcher();
        assert_eq!(dispatcher.vendors(), vec!["echo"]);
        assert!(dispatcher.resolve("ECHO").is_ok());
        assert!(dispatcher.capabilities("echo").expect("caps").supports_stream);
    }

    #[tokio::test]
    async fn unsupported_vendor_fails_without_network_calls() {
        let (dispatcher, calls, _) = dispatcher();
        let request = DispatchRequest::new("cohere", vec![NeutralMessage::user("hi")]);
        let err = dispatcher
            .dispatch(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::UnsupportedVendor { ref vendor } if vendor == "cohere"));
        assert_eq!(err.client_status(), 400);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sync_dispatch_returns_text() {
        let (dispatcher, calls, _) = dispatcher();
        let request = DispatchRequest::new("echo", vec![NeutralMessage::user("hello there")]);
        let reply = dispatcher
            .dispatch(&request, &CancellationToken::new())
            .await
            .expect("reply");
        assert!(matches!(reply, DispatchReply::Text(ref text) if text == "hello there"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_dispatch_yields_increments() {
        let (dispatcher, _, _) = dispatcher();
        let request =
            DispatchRequest::new("echo", vec![NeutralMessage::user("a b c")]).streaming();
        let reply = dispatcher
            .dispatch(&request, &CancellationToken::new())
            .await
            .expect("reply");
        let DispatchReply::Stream(stream) = reply else {
            panic!("expected a stream");
        };
        let parts: Vec<String> = stream.map(|item| item.expect("increment")).collect().await;
        assert_eq!(parts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancellation_is_not_an_error() {
        let (dispatcher, _, _) = dispatcher();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = DispatchRequest::new("echo", vec![NeutralMessage::user("hi")]);
        let reply = dispatcher.dispatch(&request, &cancel).await.expect("reply");
        assert!(matches!(reply, DispatchReply::Cancelled));
    }

    #[tokio::test]
    async fn invalid_options_fail_before_network() {
        let (dispatcher, calls, _) = dispatcher();
        let request = DispatchRequest::new("echo", vec![NeutralMessage::user("hi")]).with_options(
            DispatchOptions {
                temperature: Some(3.0),
                ..DispatchOptions::default()
            },
        );
        let err = dispatcher
            .dispatch(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::Validation { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreadable_vision_file_fails_before_network() {
        let (dispatcher, calls, _) = dispatcher();
        let message = NeutralMessage::user("look")
            .with_file(FileAttachment::from_path("/no/such/image.png", "image/png"));
        let request = DispatchRequest::new("echo", vec![message]).with_options(DispatchOptions {
            supports_vision: true,
            ..DispatchOptions::default()
        });
        let err = dispatcher
            .dispatch(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::FileEncoding { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn message_model_tag_is_used_without_target_model() {
        let (dispatcher, _, seen_model) = dispatcher();
        let request = DispatchRequest::new(
            "echo",
            vec![
                NeutralMessage::user("first").with_model_name("echo/old"),
                NeutralMessage::bot("reply"),
                NeutralMessage::user("second").with_model_name("echo/new"),
            ],
        );
        dispatcher
            .dispatch(&request, &CancellationToken::new())
            .await
            .expect("reply");
        assert_eq!(
            seen_model.lock().expect("model").as_deref(),
            Some("echo/new")
        );
    }

    #[tokio::test]
    async fn model_tags_of_other_vendors_are_ignored() {
        let (dispatcher, _, seen_model) = dispatcher();
        let request = DispatchRequest::new(
            "echo",
            vec![
                NeutralMessage::user("hi").with_model_name("echo/older"),
                NeutralMessage::bot("hello").with_model_name("claude/claude-3-haiku"),
                NeutralMessage::user("now ask echo"),
            ],
        );
        dispatcher
            .dispatch(&request, &CancellationToken::new())
            .await
            .expect("reply");
        assert_eq!(
            seen_model.lock().expect("model").as_deref(),
            Some("echo/older")
        );
    }

    #[tokio::test]
    async fn foreign_or_bare_tags_fall_back_to_adapter_default() {
        let (dispatcher, _, seen_model) = dispatcher();
        let request = DispatchRequest::new(
            "echo",
            vec![
                NeutralMessage::user("hi").with_model_name("gpt-4o"),
                NeutralMessage::bot("hello").with_model_name("claude/claude-3-haiku"),
                NeutralMessage::user("again"),
            ],
        );
        dispatcher
            .dispatch(&request, &CancellationToken::new())
            .await
            .expect("reply");
        assert_eq!(seen_model.lock().expect("model").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn dispatch_to_relays_through_channel() {
        let (dispatcher, _, _) = dispatcher();
        let (transport, mut receiver) = dispatcher.relay_channel();
        let request = DispatchRequest::new("echo", vec![NeutralMessage::user("x y")]);
        let outcome = dispatcher
            .dispatch_to(&request, transport, CancellationToken::new())
            .await
            .expect("outcome");
        assert_eq!(outcome, RelayOutcome::Completed { increments: 2 });
        assert_eq!(receiver.recv().await.as_deref(), Some("x"));
        assert_eq!(receiver.recv().await.as_deref(), Some("y"));
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn dispatch_to_closes_client_on_early_failure() {
        let (dispatcher, _, _) = dispatcher();
        let (transport, mut receiver) = dispatcher.relay_channel();
        let request = DispatchRequest::new("nope", vec![NeutralMessage::user("hi")]);
        let err = dispatcher
            .dispatch_to(&request, transport, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::UnsupportedVendor { .. }));
        assert_eq!(receiver.recv().await, None);
    }
}
