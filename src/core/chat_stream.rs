//! Completion provider seam and the HTTP/SSE implementation.
//!
//! A provider turns a [`CompletionRequest`] into a stream of raw JSON
//! envelopes. Sessions treat it as a black box and normalize each envelope
//! themselves, so fakes in tests only need to yield `serde_json::Value`s.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use memchr::memchr;
use serde_json::Value;
use tracing::debug;

use crate::api::{ChatMessage, ChatRequest};
use crate::core::catalog::ModelCatalog;
use crate::core::keyring::ApiKeys;
use crate::utils::auth::add_auth_headers;
use crate::utils::url::{construct_api_url, effective_base_url};

/// What a session asks the provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<Value, ProviderError>> + Send>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a streaming completion. Errors returned here happen before the
    /// first envelope; errors yielded by the stream happen mid-response.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<EnvelopeStream, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    Status {
        status: u16,
        reason: String,
        summary: String,
    },
    Connection(String),
    Timeout(String),
    Api(String),
    Stream(String),
    MissingApiKey(String),
    NoProvider(String),
}

impl ProviderError {
    fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let summary = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| extract_error_summary(&value))
            .unwrap_or_else(|| collapse_whitespace(body));
        ProviderError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            summary,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Status {
                status,
                reason,
                summary,
            } => {
                write!(f, "HTTP {status}")?;
                if !reason.is_empty() {
                    write!(f, " {reason}")?;
                }
                if !summary.is_empty() {
                    write!(f, ": {summary}")?;
                }
                Ok(())
            }
            ProviderError::Connection(msg) => write!(f, "Connection error: {msg}"),
            ProviderError::Timeout(msg) => write!(f, "Request timeout: {msg}"),
            ProviderError::Api(msg) => write!(f, "API error: {msg}"),
            ProviderError::Stream(msg) => write!(f, "Stream error: {msg}"),
            ProviderError::MissingApiKey(provider) => {
                write!(f, "No API key configured for {provider} (authentication)")
            }
            ProviderError::NoProvider(model) => {
                write!(f, "Invalid model: no provider serves '{model}'")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_body() || err.is_decode() {
            ProviderError::Stream(err.to_string())
        } else {
            ProviderError::Connection(err.to_string())
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| collapse_whitespace(&text))
        .filter(|text| !text.is_empty())
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

enum SseEvent {
    Envelope(Value),
    Done,
    Failed(ProviderError),
    Skip,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let Some(payload) = extract_data_payload(line) else {
        return SseEvent::Skip;
    };
    if payload.is_empty() {
        return SseEvent::Skip;
    }
    if payload == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) if value.get("error").is_some() => {
            let summary =
                extract_error_summary(&value).unwrap_or_else(|| collapse_whitespace(payload));
            SseEvent::Failed(ProviderError::Api(summary))
        }
        Ok(value) => SseEvent::Envelope(value),
        Err(err) => SseEvent::Failed(ProviderError::Stream(format!(
            "malformed event payload ({err}): {}",
            collapse_whitespace(payload)
        ))),
    }
}

struct SseDecoder<S> {
    inner: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S, B, E> SseDecoder<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    fn next_line(&mut self) -> Option<String> {
        let newline_pos = memchr(b'\n', &self.buffer)?;
        let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    fn finish_with(&mut self, event: SseEvent) -> Option<Result<Value, ProviderError>> {
        match event {
            SseEvent::Envelope(value) => Some(Ok(value)),
            SseEvent::Failed(err) => {
                self.finished = true;
                Some(Err(err))
            }
            SseEvent::Done => {
                self.finished = true;
                None
            }
            SseEvent::Skip => None,
        }
    }

    async fn next_item(&mut self) -> Option<Result<Value, ProviderError>> {
        if self.finished {
            return None;
        }
        loop {
            while let Some(line) = self.next_line() {
                let event = parse_sse_line(&line);
                if matches!(event, SseEvent::Skip) {
                    continue;
                }
                return self.finish_with(event);
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(ProviderError::Stream(err.to_string())));
                }
                None => {
                    // A final line may arrive without its newline.
                    self.finished = true;
                    let rest = std::mem::take(&mut self.buffer);
                    let line = String::from_utf8_lossy(&rest).trim().to_string();
                    return self.finish_with(parse_sse_line(&line));
                }
            }
        }
    }
}

/// Decode a server-sent-events byte stream into raw JSON envelopes.
///
/// The stream ends at `data: [DONE]` or when the body ends; an `error`
/// payload or a transport failure is yielded once as the last item.
pub fn decode_sse_stream<S, B, E>(bytes: S) -> EnvelopeStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let decoder = SseDecoder {
        inner: bytes,
        buffer: Vec::new(),
        finished: false,
    };
    Box::pin(stream::unfold(decoder, |mut decoder| async move {
        let item = decoder.next_item().await?;
        Some((item, decoder))
    }))
}

/// Talks to OpenAI-compatible `chat/completions` endpoints over HTTP.
pub struct HttpCompletionProvider {
    client: reqwest::Client,
    catalog: ModelCatalog,
    keys: ApiKeys,
    api_base_url: String,
}

impl HttpCompletionProvider {
    pub fn new(catalog: ModelCatalog, keys: ApiKeys, api_base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            catalog,
            keys,
            api_base_url: api_base_url.into(),
        }
    }

    fn has_base_override(&self) -> bool {
        !self.api_base_url.trim().is_empty()
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<EnvelopeStream, ProviderError> {
        let route = self
            .catalog
            .route(&request.model)
            .ok_or_else(|| ProviderError::NoProvider(request.model.clone()))?;
        let provider = route.provider;

        let api_key = self.keys.resolve(provider);
        if api_key.is_none() && provider.requires_api_key() && !self.has_base_override() {
            return Err(ProviderError::MissingApiKey(provider.display_name.clone()));
        }

        let base_url = effective_base_url(&self.api_base_url, &provider.base_url);
        let chat_url = construct_api_url(base_url, "chat/completions");
        let body = ChatRequest {
            model: route.wire_model.to_string(),
            messages: request.messages.clone(),
            stream: true,
            max_tokens: request.max_tokens,
        };

        debug!(
            provider = %provider.id,
            model = %body.model,
            url = %chat_url,
            messages = body.messages.len(),
            "Opening completion stream"
        );

        let mut http_request = self
            .client
            .post(chat_url)
            .header("Content-Type", "application/json");
        if let Some(key) = api_key.as_deref() {
            http_request = add_auth_headers(http_request, provider, key);
        }

        let response = http_request.json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            debug!(status = status.as_u16(), "Completion request rejected");
            return Err(ProviderError::from_status(status, &error_text));
        }

        Ok(decode_sse_stream(Box::pin(response.bytes_stream())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream_errors::{ClassifiedError, ErrorKind};

    fn byte_stream(
        parts: &[&'static str],
    ) -> impl Stream<Item = Result<&'static [u8], String>> + Send + Unpin + 'static {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok::<_, String>(part.as_bytes()))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(stream: EnvelopeStream) -> Vec<Result<Value, ProviderError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn decoder_reassembles_lines_split_across_reads() {
        let bytes = byte_stream(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
            ": keep-alive\n\ndata:{\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ]);

        let items = collect(decode_sse_stream(bytes)).await;
        let values: Vec<Value> = items.into_iter().map(|item| item.expect("envelope")).collect();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0]["choices"][0]["delta"]["content"], "Hel");
        assert_eq!(values[1]["choices"][0]["delta"]["content"], "lo");
        assert_eq!(values[2]["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn decoder_accepts_a_final_line_without_newline() {
        let bytes = byte_stream(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"]);
        let items = collect(decode_sse_stream(bytes)).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[tokio::test]
    async fn error_payload_ends_the_stream_with_its_summary() {
        let bytes = byte_stream(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n",
            "data: {\"error\":{\"message\":\"internal   server\\nerror\"}}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        ]);

        let items = collect(decode_sse_stream(bytes)).await;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1].as_ref().unwrap_err(),
            &ProviderError::Api("internal server error".into())
        );
    }

    #[tokio::test]
    async fn transport_failures_surface_as_stream_errors() {
        let bytes = stream::iter(vec![
            Ok::<&'static [u8], String>(b"data: {\"choices\":[]}\n"),
            Err("connection reset by peer".to_string()),
        ]);
        let items = collect(decode_sse_stream(bytes)).await;
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.to_string(), "Stream error: connection reset by peer");
        assert_eq!(
            ClassifiedError::classify(err.to_string(), "m").kind,
            ErrorKind::Network
        );
    }

    #[test]
    fn status_errors_carry_code_reason_and_summary() {
        let err = ProviderError::from_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"Rate limit reached for requests","type":"requests"}}"#,
        );
        assert_eq!(
            err.to_string(),
            "HTTP 429 Too Many Requests: Rate limit reached for requests"
        );
        assert_eq!(
            ClassifiedError::classify(err.to_string(), "gpt-4o").kind,
            ErrorKind::RateLimit
        );

        let err = ProviderError::from_status(reqwest::StatusCode::BAD_GATEWAY, "  <html>\n</html> ");
        assert_eq!(err.to_string(), "HTTP 502 Bad Gateway: <html> </html>");
    }

    #[test]
    fn missing_key_is_classified_as_auth() {
        let err = ProviderError::MissingApiKey("OpenAI".into());
        assert_eq!(
            ClassifiedError::classify(err.to_string(), "gpt-4o").kind,
            ErrorKind::Auth
        );
    }

    #[test]
    fn error_summary_prefers_nested_message() {
        let value: Value =
            serde_json::from_str(r#"{"error":{"message":"model overloaded"},"message":"x"}"#)
                .unwrap();
        assert_eq!(extract_error_summary(&value).as_deref(), Some("model overloaded"));

        let value: Value = serde_json::from_str(r#"{"error":"plain failure"}"#).unwrap();
        assert_eq!(extract_error_summary(&value).as_deref(), Some("plain failure"));

        let value: Value = serde_json::from_str(r#"{"status":"failed"}"#).unwrap();
        assert_eq!(extract_error_summary(&value), None);
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        std::env::remove_var("TOGETHER_API_KEY");
        let provider =
            HttpCompletionProvider::new(ModelCatalog::default(), ApiKeys::env_only(), "");
        let request = CompletionRequest {
            model: "together_ai/meta-llama/Llama-2-7b-chat-hf".into(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: Some(16),
        };
        let err = match provider.stream_completion(&request).await {
            Err(err) => err,
            Ok(_) => panic!("expected a missing key error"),
        };
        assert_eq!(err, ProviderError::MissingApiKey("Together AI".into()));
    }
}
