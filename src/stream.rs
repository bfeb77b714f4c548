//! Decoding of vendor chunk framings into a uniform feed of text increments.
//!
//! [`DecoderState`] is the synchronous state machine: it is fed raw byte chunks whose
//! boundaries have nothing to do with line boundaries and hands back the increments each
//! chunk completes. [`IncrementStream`] drives it from an HTTP body as a pull-based
//! [`Stream`], so consumers decide the pace.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::TextStream;

/// Default upper bound for a partial line held across chunks.
pub const DEFAULT_MAX_CARRYOVER: usize = 1024 * 1024;

/// Chunk framing spoken by a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// `data:`-prefixed lines, optionally ended by a sentinel payload such as `[DONE]`.
    Sse {
        marker: &'static str,
        sentinel: Option<&'static str>,
    },
    /// One JSON object per line; completion is signalled inside the object.
    Ndjson,
    /// A single JSON body delivered as exactly one increment.
    SingleBody,
}

impl StreamFormat {
    /// OpenAI-style SSE terminated by `data: [DONE]`.
    pub const SSE_DONE: StreamFormat = StreamFormat::Sse {
        marker: "data:",
        sentinel: Some("[DONE]"),
    };

    /// SSE without a string sentinel; completion comes from the payload or connection close.
    pub const SSE: StreamFormat = StreamFormat::Sse {
        marker: "data:",
        sentinel: None,
    };
}

/// Text and completion flag extracted from one parsed payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub text: Option<String>,
    pub done: bool,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            text: None,
            done: true,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Vendor-specific extraction of the incremental text field.
///
/// Returning an error (for in-band vendor error payloads) fails the stream.
pub type FragmentExtractor = fn(&'static str, &Value) -> Result<Fragment, LLMError>;

/// Lifecycle of one decoder. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderPhase {
    Reading,
    Done,
    Failed,
}

/// Per-stream decoding state, owned by exactly one in-flight stream.
///
/// # Examples
///
/// ```
/// use relay_llm::LLMError;
/// use relay_llm::stream::{DecoderPhase, DecoderState, Fragment, StreamFormat};
/// use serde_json::Value;
///
/// fn delta(_vendor: &'static str, value: &Value) -> Result<Fragment, LLMError> {
///     Ok(value
///         .pointer("/choices/0/delta/content")
///         .and_then(Value::as_str)
///         .map(Fragment::text)
///         .unwrap_or_default())
/// }
///
/// let mut state = DecoderState::new("groq", StreamFormat::SSE_DONE, delta);
/// let first = state.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\nda")?;
/// assert_eq!(first, vec!["Hel"]);
/// let rest = state.feed(b"ta: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n")?;
/// assert_eq!(rest, vec!["lo"]);
/// assert_eq!(state.phase(), DecoderPhase::Done);
/// # Ok::<(), LLMError>(())
/// ```
pub struct DecoderState {
    vendor: &'static str,
    format: StreamFormat,
    extract: FragmentExtractor,
    carryover: Vec<u8>,
    max_carryover: usize,
    phase: DecoderPhase,
}

impl DecoderState {
    pub fn new(vendor: &'static str, format: StreamFormat, extract: FragmentExtractor) -> Self {
        Self {
            vendor,
            format,
            extract,
            carryover: Vec::new(),
            max_carryover: DEFAULT_MAX_CARRYOVER,
            phase: DecoderPhase::Reading,
        }
    }

    /// Caps the carryover fragment; a line growing past it fails with [`LLMError::Decode`].
    pub fn with_max_carryover(mut self, bytes: usize) -> Self {
        self.max_carryover = bytes.max(1);
        self
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> DecoderPhase {
        self.phase
    }

    /// Decodes one raw chunk and returns the increments it completed, in order.
    ///
    /// After `Done`, further bytes are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, LLMError> {
        let mut out = Vec::new();
        match self.phase {
            DecoderPhase::Done => return Ok(out),
            DecoderPhase::Failed => {
                return Err(LLMError::decode(self.vendor, "decoder already failed"));
            }
            DecoderPhase::Reading => {}
        }

        self.carryover.extend_from_slice(chunk);
        if self.format == StreamFormat::SingleBody {
            self.check_carryover()?;
            return Ok(out);
        }

        while self.phase == DecoderPhase::Reading {
            let Some(pos) = self.carryover.iter().position(|b| *b == b'\n') else {
                break;
            };
            let mut line: Vec<u8> = self.carryover.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.decode_line(&line, &mut out)?;
        }
        if self.phase == DecoderPhase::Done {
            self.carryover.clear();
        } else {
            self.check_carryover()?;
        }
        Ok(out)
    }

    /// Signals transport close and decodes whatever is left as a final line.
    ///
    /// A close without a sentinel is a normal end of stream.
    pub fn finish(&mut self) -> Result<Vec<String>, LLMError> {
        let mut out = Vec::new();
        if self.phase != DecoderPhase::Reading {
            return Ok(out);
        }
        let rest = std::mem::take(&mut self.carryover);
        match self.format {
            StreamFormat::SingleBody => {
                let value = self.parse(&rest)?;
                let fragment = self.extract_fragment(&value)?;
                if let Some(text) = fragment.text.filter(|text| !text.is_empty()) {
                    out.push(text);
                }
            }
            _ => {
                let mut line = rest;
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.decode_line(&line, &mut out)?;
            }
        }
        self.phase = DecoderPhase::Done;
        Ok(out)
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<String>) -> Result<(), LLMError> {
        let payload: &[u8] = match self.format {
            StreamFormat::Sse { marker, sentinel } => {
                let Some(rest) = line.strip_prefix(marker.as_bytes()) else {
                    return Ok(());
                };
                let rest = rest.trim_ascii();
                if rest.is_empty() {
                    return Ok(());
                }
                if sentinel.is_some_and(|sentinel| rest == sentinel.as_bytes()) {
                    self.phase = DecoderPhase::Done;
                    return Ok(());
                }
                rest
            }
            StreamFormat::Ndjson | StreamFormat::SingleBody => {
                let rest = line.trim_ascii();
                if rest.is_empty() {
                    return Ok(());
                }
                rest
            }
        };

        let value = self.parse(payload)?;
        let fragment = self.extract_fragment(&value)?;
        if let Some(text) = fragment.text.filter(|text| !text.is_empty()) {
            out.push(text);
        }
        if fragment.done {
            self.phase = DecoderPhase::Done;
        }
        Ok(())
    }

    fn parse(&mut self, payload: &[u8]) -> Result<Value, LLMError> {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(err) => return Err(self.fail(format!("invalid UTF-8 in stream chunk: {err}"))),
        };
        serde_json::from_str(text)
            .map_err(|err| self.fail(format!("failed to parse stream chunk: {err}")))
    }

    fn extract_fragment(&mut self, value: &Value) -> Result<Fragment, LLMError> {
        (self.extract)(self.vendor, value).inspect_err(|_| {
            self.phase = DecoderPhase::Failed;
        })
    }

    fn check_carryover(&mut self) -> Result<(), LLMError> {
        if self.carryover.len() > self.max_carryover {
            let message = format!(
                "partial line exceeded {} bytes without completing",
                self.max_carryover
            );
            return Err(self.fail(message));
        }
        Ok(())
    }

    fn fail(&mut self, message: String) -> LLMError {
        self.phase = DecoderPhase::Failed;
        self.carryover.clear();
        LLMError::decode(self.vendor, message)
    }
}

/// Pull-based stream of increments decoded from an HTTP body.
///
/// The body is only polled when the consumer asks for the next increment and nothing is
/// pending.
pub struct IncrementStream {
    body: HttpBodyStream,
    state: DecoderState,
    pending: VecDeque<String>,
    finished: bool,
    yielded: usize,
}

impl IncrementStream {
    pub fn new(body: HttpBodyStream, state: DecoderState) -> Self {
        Self {
            body,
            state,
            pending: VecDeque::new(),
            finished: false,
            yielded: 0,
        }
    }

    fn pop(&mut self) -> Option<String> {
        let item = self.pending.pop_front();
        if item.is_some() {
            self.yielded += 1;
        }
        item
    }
}

impl Stream for IncrementStream {
    type Item = Result<String, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(text) = this.pop() {
                return Poll::Ready(Some(Ok(text)));
            }
            if this.finished || this.state.phase() != DecoderPhase::Reading {
                if !this.finished {
                    this.finished = true;
                    debug!(
                        vendor = this.state.vendor,
                        increments = this.yielded,
                        "stream reached completion marker"
                    );
                }
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => match this.state.feed(&bytes) {
                    Ok(texts) => this.pending.extend(texts),
                    Err(err) => {
                        this.finished = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                },
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    match this.state.finish() {
                        Ok(texts) => this.pending.extend(texts),
                        Err(err) => return Poll::Ready(Some(Err(err))),
                    }
                    debug!(
                        vendor = this.state.vendor,
                        increments = this.yielded + this.pending.len(),
                        "stream closed by transport"
                    );
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Wraps a raw body into a cancellable [`TextStream`] of increments.
pub fn decode_increments(
    body: HttpBodyStream,
    state: DecoderState,
    cancel: CancellationToken,
) -> TextStream {
    with_cancellation(Box::pin(IncrementStream::new(body, state)), cancel)
}

/// Ends `stream` with a single [`LLMError::Cancelled`] item once `cancel` fires.
///
/// Dropping the inner stream drops the HTTP body, which closes the vendor connection.
/// Nothing is yielded after the first error.
pub fn with_cancellation(stream: TextStream, cancel: CancellationToken) -> TextStream {
    Box::pin(async_stream::stream! {
        let mut inner = stream;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = inner.next() => Some(item),
            };
            match next {
                None => {
                    debug!("stream cancelled");
                    yield Err(LLMError::Cancelled);
                    break;
                }
                Some(None) => break,
                Some(Some(item)) => {
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        break;
                    }
                }
            }
        }
    })
}

/// Collects an entire body, used to read error payloads of failed stream requests.
pub(crate) async fn collect_body_text(
    mut body: HttpBodyStream,
    cancel: &CancellationToken,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LLMError::Cancelled),
            chunk = body.next() => chunk,
        };
        match next {
            Some(chunk) => bytes.extend_from_slice(&chunk?),
            None => break,
        }
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Chunk-boundary checks shared by the vendor response tests.
#[cfg(test)]
pub(crate) mod split_check {
    use super::{DecoderPhase, DecoderState};

    fn decode(mut state: DecoderState, bytes: &[u8], cuts: &[usize]) -> Vec<String> {
        let mut out = Vec::new();
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
            out.extend(state.feed(&bytes[start..cut]).expect("feed"));
            start = cut;
        }
        out.extend(state.finish().expect("finish"));
        assert_eq!(state.phase(), DecoderPhase::Done);
        out
    }

    /// Decodes `bytes` unsplit, at every two-way split, in 3 to 5 chunks at shifting
    /// offsets and byte by byte, and asserts the increments always equal `expected`.
    pub(crate) fn assert_split_invariant(
        new_state: impl Fn() -> DecoderState,
        bytes: &[u8],
        expected: &[&str],
    ) {
        let len = bytes.len();
        assert_eq!(decode(new_state(), bytes, &[]), expected);
        for cut in 0..=len {
            assert_eq!(decode(new_state(), bytes, &[cut]), expected, "split at {cut}");
        }
        for parts in 3..=5 {
            for shift in (0..len).step_by(7) {
                let mut cuts: Vec<usize> = (1..parts)
                    .map(|k| (k * len / parts + shift) % len)
                    .collect();
                cuts.sort_unstable();
                assert_eq!(
                    decode(new_state(), bytes, &cuts),
                    expected,
                    "{parts} chunks cut at {cuts:?}"
                );
            }
        }
        let singles: Vec<usize> = (1..len).collect();
        assert_eq!(decode(new_state(), bytes, &singles), expected, "byte by byte");
    }
}
