//! OpenAI-compatible streaming transport.
//!
//! Works with OpenAI and any server exposing `/chat/completions` with
//! server-sent events (vLLM, Ollama, LiteLLM proxies, ...).

use crate::{
    models::{CompletionConfig, CompletionRequest, StreamChunk},
    system::completion::{ChunkStream, CompletionError, CompletionTransport},
};
use futures_util::{StreamExt, future::BoxFuture};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streams chat completions over HTTP.
#[derive(Debug)]
pub struct OpenAiTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl OpenAiTransport {
    /// Builds the transport. The key is looked up once; a missing key only fails
    /// when a request is made.
    pub fn new(
        config: &CompletionConfig,
        api_key: Option<String>,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            api_key_env: config.api_key_env.clone(),
        })
    }

    async fn open_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| CompletionError::MissingApiKey(self.api_key_env.clone()))?;

        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            stream: true,
            extra: &request.options,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, message });
        }

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(item) = bytes.next().await {
                match item {
                    Ok(chunk) => {
                        for event in parser.feed(&chunk) {
                            let done = matches!(event, Ok(StreamChunk::Done));
                            yield event;
                            if done {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(CompletionError::Network(e.to_string()));
                        return;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

impl CompletionTransport for OpenAiTransport {
    fn open(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<ChunkStream, CompletionError>> {
        Box::pin(self.open_stream(request))
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Incremental decoder for the `data: {...}` event stream.
///
/// Network chunks respect neither event boundaries nor UTF-8 boundaries, so raw
/// bytes are buffered until an event's terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feeds raw bytes and returns the chunks of every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, CompletionError>> {
        // `\r` never occurs inside a multi-byte UTF-8 sequence, so dropping it is safe.
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            for line in String::from_utf8_lossy(&event).lines() {
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    out.push(Ok(StreamChunk::Done));
                    continue;
                }
                out.extend(decode_event(data));
            }
        }
        out
    }
}

fn decode_event(data: &str) -> Option<Result<StreamChunk, CompletionError>> {
    let chunk: StreamEvent = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return Some(Err(CompletionError::MalformedChunk(format!("{}: {}", e, data)))),
    };
    let choice = chunk.choices.into_iter().next()?;
    match choice.delta.content {
        Some(content) if !content.is_empty() => Some(Ok(StreamChunk::Text(content))),
        // Role-only or empty deltas carry no text; a finish reason ends the response.
        _ if choice.finish_reason.is_some() => Some(Ok(StreamChunk::Done)),
        _ => None,
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(flatten)]
    extra: &'a crate::models::Options,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(events: Vec<Result<StreamChunk, CompletionError>>) -> Vec<StreamChunk> {
        events.into_iter().map(|e| e.unwrap()).collect()
    }

    #[test]
    fn test_parser_decodes_complete_events() {
        let mut parser = SseParser::default();
        let events = parser.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\" there\"},\"finish_reason\":null}]}\n\n\
             data: [DONE]\n\n",
        );
        assert_eq!(
            texts(events),
            vec![
                StreamChunk::Text("Hi".into()),
                StreamChunk::Text(" there".into()),
                StreamChunk::Done,
            ]
        );
    }

    #[test]
    fn test_parser_buffers_split_events() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let events = parser.feed(b"tent\":\"abc\"}}]}\r\n\r\n");
        assert_eq!(texts(events), vec![StreamChunk::Text("abc".into())]);
    }

    #[test]
    fn test_role_only_delta_is_skipped_and_finish_reason_ends() {
        let mut parser = SseParser::default();
        let events = parser.feed(
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        );
        assert_eq!(texts(events), vec![StreamChunk::Done]);
    }

    #[test]
    fn test_malformed_event_is_an_error() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"data: {not json\n\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events.into_iter().next(),
            Some(Err(CompletionError::MalformedChunk(_)))
        ));
    }

    #[test]
    fn test_request_body_flattens_options() {
        let mut options = crate::models::Options::new();
        options.insert("temperature".into(), serde_json::json!(0.5));
        let body = ChatRequest {
            model: "gpt-4o",
            messages: vec![ChatMessage {
                role: "user",
                content: "hello",
            }],
            stream: true,
            extra: &options,
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["stream"], true);
        assert_eq!(value["temperature"], 0.5);
        assert_eq!(value["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_missing_api_key_fails_on_request() {
        let transport = OpenAiTransport::new(&CompletionConfig::default(), None).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(transport.open(CompletionRequest::new("m", "p")));
        assert!(matches!(result, Err(CompletionError::MissingApiKey(_))));
    }
}
