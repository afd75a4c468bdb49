//! Completion gateway: the only path to the text-generation service.
//!
//! The [`Completion`] trait decouples the orchestrator from the concrete
//! backend. [`OpenAiGateway`] talks to any OpenAI-compatible chat completions
//! API; tests use scripted gateways that return canned completions.
//!
//! Failures never surface as errors. One-shot calls return a sentinel
//! ([`EMPTY_STRUCTURED`] or an `Error: ...` string) and streams end with
//! [`StreamEvent::Failed`], so callers branch on values instead of handling
//! errors.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::normalize::truncate_chars;
use crate::core::types::Message;
use crate::io::config::GatewayConfig;

/// Sampling temperature for calls that do not pick their own.
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Sentinel returned by a failed structured call.
pub const EMPTY_STRUCTURED: &str = "{}";

const ERROR_PREFIX: &str = "Error: ";

/// Build the sentinel returned by a failed free-text call.
pub fn error_sentinel(reason: &str) -> String {
    format!("{ERROR_PREFIX}{reason}")
}

/// Whether `text` is a free-text failure sentinel rather than a completion.
pub fn is_error_sentinel(text: &str) -> bool {
    text.starts_with(ERROR_PREFIX)
}

/// One item of a streamed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A new token and the text accumulated so far.
    Delta { token: String, accumulated: String },
    /// Stream completed; carries the full text.
    Finished { text: String },
    /// Stream could not start or broke off; nothing further follows.
    Failed { reason: String },
}

/// Abstraction over text-generation backends.
pub trait Completion: Send + Sync {
    /// One-shot completion of `content` under `system_prompt`.
    ///
    /// With `structured`, the backend is asked for a JSON object and a
    /// failure yields [`EMPTY_STRUCTURED`]; otherwise a failure yields an
    /// [`error_sentinel`].
    fn complete(
        &self,
        system_prompt: &str,
        content: &str,
        structured: bool,
        temperature: f32,
    ) -> impl Future<Output = String> + Send;

    /// Stream a completion over the full conversational `history`.
    fn complete_stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        temperature: f32,
    ) -> BoxStream<'static, StreamEvent>;
}

/// Gateway for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiGateway {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGateway {
    /// Build a gateway from config, reading the API key from the configured
    /// environment variable.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build http client")?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "api key not set; requests will be unauthenticated");
        }
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
            request_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn request_body(&self, messages: &[Message], temperature: f32, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "stream": stream,
        })
    }

    /// POST `body`. `total` bounds the whole exchange; streams pass `None`
    /// and rely on the client's idle read timeout instead.
    async fn send(&self, body: &Value, total: Option<Duration>) -> Result<reqwest::Response> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(total) = total {
            request = request.timeout(total);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("send completion request")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "completion service returned {status}: {}",
                truncate_chars(&body, 320)
            ));
        }
        Ok(response)
    }

    async fn complete_once(&self, body: &Value) -> Result<String> {
        let response = self.send(body, Some(self.request_timeout)).await?;
        let parsed: ChatResponse = response.json().await.context("decode completion")?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("completion had no choices"))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

impl Completion for OpenAiGateway {
    #[instrument(skip_all, fields(model = %self.model, structured, temperature))]
    async fn complete(
        &self,
        system_prompt: &str,
        content: &str,
        structured: bool,
        temperature: f32,
    ) -> String {
        let messages = [Message::system(system_prompt), Message::user(content)];
        let mut body = self.request_body(&messages, temperature, false);
        if structured {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.complete_once(&body).await {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "completion received");
                    return text;
                }
                Err(err) => {
                    warn!(attempt, err = %format!("{err:#}"), "completion failed");
                    last_error = Some(err);
                }
            }
        }

        let reason = last_error
            .map(|err| format!("{err:#}"))
            .unwrap_or_else(|| "no attempt made".to_string());
        if structured {
            EMPTY_STRUCTURED.to_string()
        } else {
            error_sentinel(&reason)
        }
    }

    fn complete_stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        temperature: f32,
    ) -> BoxStream<'static, StreamEvent> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend_from_slice(history);
        let body = self.request_body(&messages, temperature, true);
        let gateway = self.clone();

        Box::pin(async_stream::stream! {
            let mut response = None;
            let mut reason = String::new();
            for attempt in 0..=gateway.max_retries {
                match gateway.send(&body, None).await {
                    Ok(ok) => {
                        response = Some(ok);
                        break;
                    }
                    Err(err) => {
                        warn!(attempt, err = %format!("{err:#}"), "stream request failed");
                        reason = format!("{err:#}");
                    }
                }
            }
            let Some(response) = response else {
                yield StreamEvent::Failed { reason };
                return;
            };

            let mut bytes = response.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();
            let mut accumulated = String::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(err = %err, "stream broke off");
                        yield StreamEvent::Failed { reason: err.to_string() };
                        return;
                    }
                };
                pending.extend_from_slice(&chunk);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        SseLine::Token(token) => {
                            accumulated.push_str(&token);
                            yield StreamEvent::Delta { token, accumulated: accumulated.clone() };
                        }
                        SseLine::Done => break 'read,
                        SseLine::Skip => {}
                    }
                }
            }
            debug!(chars = accumulated.len(), "stream finished");
            yield StreamEvent::Finished { text: accumulated };
        })
    }
}

/// A decoded server-sent-events line from a streaming completion.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        debug!(line = %truncate_chars(data, 80), "skipping undecodable stream line");
        return SseLine::Skip;
    };
    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(token) if !token.is_empty() => SseLine::Token(token.to_string()),
        _ => SseLine::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> GatewayConfig {
        GatewayConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key_env: "FORGE_TEST_UNSET_KEY".to_string(),
            timeout_secs: 2,
            max_retries: 0,
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn sse_tokens_are_decoded() {
        let line = r#"data: {"choices":[{"delta":{"content":"int "}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Token("int ".to_string()));
    }

    #[test]
    fn sse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line("data: {not json"), SseLine::Skip);
    }

    #[test]
    fn sentinel_helpers() {
        let sentinel = error_sentinel("boom");
        assert!(is_error_sentinel(&sentinel));
        assert!(!is_error_sentinel("int main() {}"));
    }

    #[tokio::test]
    async fn transport_failure_becomes_sentinels() {
        let gateway = OpenAiGateway::new(&unreachable_config()).expect("gateway");
        let structured = gateway.complete("sys", "hello", true, 0.0).await;
        assert_eq!(structured, EMPTY_STRUCTURED);
        let text = gateway.complete("sys", "hello", false, 0.0).await;
        assert!(is_error_sentinel(&text), "{text}");
    }

    /// Serve one chat request as an SSE stream that drips `tokens` with
    /// `gap` between them, then `[DONE]`.
    fn slow_sse_server(tokens: &'static [&'static str], gap: Duration) -> String {
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read header");
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().expect("length");
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).expect("read body");

            let mut stream = stream;
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .expect("write head");
            for token in tokens {
                std::thread::sleep(gap);
                let event = json!({ "choices": [{ "delta": { "content": token } }] });
                stream
                    .write_all(format!("data: {event}\n\n").as_bytes())
                    .expect("write token");
                stream.flush().expect("flush");
            }
            stream.write_all(b"data: [DONE]\n\n").expect("write done");
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn long_stream_outlives_the_request_timeout() {
        const TOKENS: &[&str] = &["a", "b", "c", "d", "e", "f"];
        let config = GatewayConfig {
            base_url: slow_sse_server(TOKENS, Duration::from_millis(500)),
            api_key_env: "FORGE_TEST_UNSET_KEY".to_string(),
            timeout_secs: 1,
            max_retries: 0,
            ..GatewayConfig::default()
        };
        let gateway = OpenAiGateway::new(&config).expect("gateway");
        let events: Vec<StreamEvent> = gateway
            .complete_stream("sys", &[Message::user("hello")], 0.0)
            .collect()
            .await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Finished {
                text: "abcdef".to_string()
            })
        );
        let deltas = events
            .iter()
            .filter(|event| matches!(event, StreamEvent::Delta { .. }))
            .count();
        assert_eq!(deltas, TOKENS.len());
    }

    #[tokio::test]
    async fn transport_failure_ends_stream_with_failed() {
        let gateway = OpenAiGateway::new(&unreachable_config()).expect("gateway");
        let events: Vec<StreamEvent> = gateway
            .complete_stream("sys", &[Message::user("hello")], 0.0)
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Failed { .. }));
    }
}
