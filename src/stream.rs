//! Token stream chunks and lifecycle filtering.
//!
//! Backends emit [`StreamChunk`]s: JSON objects keyed by a `type`
//! discriminant. Two of those types, `step-start` and `step-finish`, only mark
//! internal step boundaries; [`filter_lifecycle`] strips them from a stream
//! while passing every other element through untouched.
//!
//! # Example
//!
//! ```rust
//! use futures::{StreamExt, stream};
//! use memloom::stream::{StreamChunk, filter_lifecycle};
//!
//! let source = stream::iter(vec![
//!     Ok::<_, std::convert::Infallible>(StreamChunk::step_start()),
//!     Ok(StreamChunk::text_delta("a")),
//!     Ok(StreamChunk::step_finish("stop", None)),
//! ]);
//! let filtered: Vec<_> = futures::executor::block_on(filter_lifecycle(source).collect());
//! assert_eq!(filtered.len(), 1);
//! ```

use std::borrow::Cow;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// `type` of the chunk opening a generation step.
pub const STEP_START: &str = "step-start";
/// `type` of the chunk closing a generation step.
pub const STEP_FINISH: &str = "step-finish";

/// Whether a `type` value marks a step boundary.
pub fn is_lifecycle_type(kind: &str) -> bool {
    kind == STEP_START || kind == STEP_FINISH
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One element of a token stream.
///
/// Only `type` is interpreted; the remaining fields are payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl StreamChunk {
    /// A chunk with the given type and payload fields.
    ///
    /// A `type` key in the payload is discarded.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(mut map) => {
                // `type` always comes from `kind`.
                map.remove("type");
                map
            }
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn step_start() -> Self {
        Self::new(STEP_START, Value::Null)
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::new("text-delta", json!({ "textDelta": text.into() }))
    }

    pub fn step_finish(finish_reason: &str, usage: Option<Usage>) -> Self {
        Self::new(STEP_FINISH, finish_payload(finish_reason, usage))
    }

    pub fn finish(finish_reason: &str, usage: Option<Usage>) -> Self {
        Self::new("finish", finish_payload(finish_reason, usage))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("error", json!({ "error": message.into() }))
    }

    /// The text carried by a `text-delta` chunk.
    pub fn text(&self) -> Option<&str> {
        if self.kind != "text-delta" {
            return None;
        }
        self.payload.get("textDelta").and_then(Value::as_str)
    }
}

fn finish_payload(finish_reason: &str, usage: Option<Usage>) -> Value {
    let mut payload = json!({ "finishReason": finish_reason });
    if let Some(usage) = usage {
        payload["usage"] = json!(usage);
    }
    payload
}

/// Result of interpreting a stream element structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation<'a> {
    /// The element is structured; carries its `type`, if it has one.
    Typed(Option<Cow<'a, str>>),
    /// The element could not be interpreted.
    Opaque,
}

/// Access to the `type` discriminant of a stream element.
pub trait LifecycleMarker {
    /// Interpret the element structurally.
    fn interpret(&self) -> Interpretation<'_>;

    /// A `type` exposed by the raw element itself, consulted when
    /// interpretation fails.
    fn raw_type(&self) -> Option<&str> {
        None
    }

    /// Whether the element is a step boundary marker and must be dropped.
    fn is_lifecycle_marker(&self) -> bool {
        match self.interpret() {
            Interpretation::Typed(kind) => kind.is_some_and(|k| is_lifecycle_type(&k)),
            Interpretation::Opaque => self.raw_type().is_some_and(is_lifecycle_type),
        }
    }
}

impl LifecycleMarker for StreamChunk {
    fn interpret(&self) -> Interpretation<'_> {
        Interpretation::Typed(Some(Cow::Borrowed(self.kind.as_str())))
    }
}

/// Serialized chunks, e.g. lines of an upstream feed.
impl LifecycleMarker for String {
    fn interpret(&self) -> Interpretation<'_> {
        parse_type(self)
    }
}

/// Loosely typed elements. Strings are parsed as serialized chunks; any other
/// value is not serialized text and falls back to its own `type` field.
impl LifecycleMarker for Value {
    fn interpret(&self) -> Interpretation<'_> {
        match self {
            Value::String(s) => parse_type(s),
            _ => Interpretation::Opaque,
        }
    }

    fn raw_type(&self) -> Option<&str> {
        self.get("type").and_then(Value::as_str)
    }
}

fn parse_type(raw: &str) -> Interpretation<'static> {
    match serde_json::from_str::<Value>(raw) {
        Ok(parsed) => Interpretation::Typed(
            parsed
                .get("type")
                .and_then(Value::as_str)
                .map(|s| Cow::Owned(s.to_string())),
        ),
        Err(_) => Interpretation::Opaque,
    }
}

/// Strip step boundary markers from a stream.
///
/// Pull-based and order-preserving: the source is polled only when the
/// consumer asks for the next element. The first source error is forwarded
/// and ends the stream. Completion is signalled once.
pub fn filter_lifecycle<S, T, E>(source: S) -> impl Stream<Item = Result<T, E>> + Send
where
    S: Stream<Item = Result<T, E>> + Send,
    T: LifecycleMarker + Send,
    E: Send,
{
    async_stream::stream! {
        futures::pin_mut!(source);
        while let Some(item) = source.next().await {
            match item {
                Ok(element) if element.is_lifecycle_marker() => {
                    tracing::trace!("Dropped lifecycle marker chunk");
                }
                Ok(element) => yield Ok(element),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

/// Render a chunk as a Server-Sent Event.
///
/// # Example
///
/// ```rust
/// use memloom::stream::{StreamChunk, sse_event};
///
/// let sse = sse_event(&StreamChunk::text_delta("hi"));
/// assert!(sse.starts_with("event: text-delta\n"));
/// ```
pub fn sse_event(chunk: &StreamChunk) -> String {
    let json = serde_json::to_string(chunk).unwrap_or_else(|e| {
        json!({ "type": "error", "error": e.to_string() }).to_string()
    });
    format!("event: {}\ndata: {json}\n\n", chunk.kind)
}
