//! # Completion Client Adapter
//!
//! Turns a streamed completion into a single string. The transport that talks
//! to the remote service sits behind [`CompletionTransport`]; this module only
//! consumes its chunk stream, concatenates the deltas in arrival order and,
//! when asked to, mirrors every delta to a diagnostic writer as it arrives.

use crate::models::{CompletionRequest, StreamChunk};
use futures_util::{
    StreamExt,
    future::BoxFuture,
    stream::BoxStream,
};
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Completion request failed: {0}")]
    Network(String),
    #[error("Completion service returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Malformed completion chunk: {0}")]
    MalformedChunk(String),
    #[error("No API key found in environment variable '{0}'.")]
    MissingApiKey(String),
    #[error("Completion task failed to finish: {0}")]
    TaskFailed(String),
    #[error("Failed to write completion progress: {0}")]
    Mirror(#[from] std::io::Error),
}

/// The stream of increments a transport yields for one request.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, CompletionError>>;

/// An outbound connection to a completion service.
pub trait CompletionTransport: Send + Sync + std::fmt::Debug {
    /// Issues `request` and returns the stream of response chunks.
    fn open(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<ChunkStream, CompletionError>>;
}

/// Issues completion requests and accumulates their streamed responses.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    transport: Arc<dyn CompletionTransport>,
}

impl CompletionClient {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self { transport }
    }

    /// Runs one request to completion and returns the full response text.
    ///
    /// With `mirror` set, each delta is also written to stderr and flushed
    /// immediately. The mirrored text is never part of the return value.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        mirror: bool,
    ) -> Result<String, CompletionError> {
        log::debug!("Requesting completion from model '{}'", request.model);
        let stream = self.transport.open(request).await?;
        if mirror {
            let mut stderr = std::io::stderr();
            collect_stream(stream, Some(&mut stderr)).await
        } else {
            collect_stream(stream, None).await
        }
    }
}

/// Concatenates a chunk stream until it ends, a `Done` chunk arrives, or a delta is empty.
pub async fn collect_stream(
    mut stream: ChunkStream,
    mut mirror: Option<&mut (dyn Write + Send)>,
) -> Result<String, CompletionError> {
    let mut message = String::new();
    while let Some(chunk) = stream.next().await {
        let delta = match chunk? {
            StreamChunk::Text(delta) if !delta.is_empty() => delta,
            StreamChunk::Text(_) | StreamChunk::Done => break,
        };
        if let Some(out) = mirror.as_deref_mut() {
            out.write_all(delta.as_bytes())?;
            out.flush()?;
        }
        message.push_str(&delta);
    }
    log::trace!("Collected {} bytes of completion text", message.len());
    Ok(message)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::{FutureExt, stream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A transport that answers from memory and counts how often it was opened.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        /// The reply text; `None` echoes the prompt back as `re: <prompt>`.
        reply: Option<String>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub(crate) fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                ..Self::default()
            }
        }

        pub(crate) fn echoing() -> Self {
            Self::default()
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CompletionTransport for ScriptedTransport {
        fn open(
            &self,
            request: CompletionRequest,
        ) -> BoxFuture<'_, Result<ChunkStream, CompletionError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .reply
                .clone()
                .unwrap_or_else(|| format!("re: {}", request.prompt));
            let fail = self.fail;
            async move {
                if fail {
                    return Err(CompletionError::Network("connection refused".into()));
                }
                Ok(chunks(vec![Ok(StreamChunk::Text(reply)), Ok(StreamChunk::Done)]))
            }
            .boxed()
        }
    }

    fn chunks(items: Vec<Result<StreamChunk, CompletionError>>) -> ChunkStream {
        stream::iter(items).boxed()
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_collect_concatenates_in_order() {
        let stream = chunks(vec![
            Ok(StreamChunk::Text("Hel".into())),
            Ok(StreamChunk::Text("lo".into())),
            Ok(StreamChunk::Text(", world".into())),
        ]);
        assert_eq!(block_on(collect_stream(stream, None)).unwrap(), "Hello, world");
    }

    #[test]
    fn test_collect_stops_at_empty_delta_or_done() {
        let stream = chunks(vec![
            Ok(StreamChunk::Text("kept".into())),
            Ok(StreamChunk::Text(String::new())),
            Ok(StreamChunk::Text("dropped".into())),
        ]);
        assert_eq!(block_on(collect_stream(stream, None)).unwrap(), "kept");

        let stream = chunks(vec![
            Ok(StreamChunk::Text("a".into())),
            Ok(StreamChunk::Done),
            Ok(StreamChunk::Text("b".into())),
        ]);
        assert_eq!(block_on(collect_stream(stream, None)).unwrap(), "a");
    }

    #[test]
    fn test_mirror_receives_every_delta() {
        let stream = chunks(vec![
            Ok(StreamChunk::Text("one ".into())),
            Ok(StreamChunk::Text("two".into())),
        ]);
        let mut mirror: Vec<u8> = Vec::new();

        let text = block_on(collect_stream(stream, Some(&mut mirror))).unwrap();

        assert_eq!(text, "one two");
        assert_eq!(String::from_utf8(mirror).unwrap(), "one two");
    }

    #[test]
    fn test_stream_error_propagates() {
        let stream = chunks(vec![
            Ok(StreamChunk::Text("partial".into())),
            Err(CompletionError::MalformedChunk("{oops".into())),
        ]);
        let err = block_on(collect_stream(stream, None)).unwrap_err();
        assert!(matches!(err, CompletionError::MalformedChunk(_)));
    }

    #[test]
    fn test_client_collects_transport_stream() {
        let transport = Arc::new(ScriptedTransport::echoing());
        let client = CompletionClient::new(transport.clone());

        let text = block_on(client.complete(CompletionRequest::new("m", "hi"), false)).unwrap();

        assert_eq!(text, "re: hi");
        assert_eq!(transport.call_count(), 1);
    }
}
