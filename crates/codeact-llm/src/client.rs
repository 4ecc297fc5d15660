use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::LlmError;
use crate::options::ChatOptions;
use crate::sse::{SseDecoder, SsePayload};

/// One entry of the chat history sent to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Per-token callback invoked synchronously as chunks arrive.
pub type TokenSink<'a> = Option<&'a (dyn Fn(&str) + Send + Sync)>;

/// Abstraction the control loop calls; implemented by [`LlmClient`] and by
/// the scripted mock.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        options: &ChatOptions,
        on_token: TokenSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>;
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// Full chat-completions endpoint URL.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Message delimiter on the wire.
    pub message_delimiter: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1/chat/completions".into(),
            model: "default".into(),
            api_key: None,
            message_delimiter: "\n\n".into(),
        }
    }
}

/// Provider-specific auth headers, keyed by URL fragment. Configuration,
/// not business logic: extending support means adding a row.
pub fn provider_headers(endpoint: &str, api_key: Option<&str>) -> Vec<(&'static str, String)> {
    let mut headers = Vec::new();
    if endpoint.contains("openrouter.ai") {
        if let Some(key) = api_key {
            headers.push(("Authorization", format!("Bearer {key}")));
        }
        headers.push((
            "HTTP-Referer",
            "https://github.com/codeact-dev/codeact".to_owned(),
        ));
        headers.push(("X-Title", "codeact".to_owned()));
    } else if endpoint.contains("azure.com") {
        if let Some(key) = api_key {
            headers.push(("api-key", key.to_owned()));
        }
    } else if let Some(key) = api_key {
        headers.push(("Authorization", format!("Bearer {key}")));
    }
    headers
}

/// Streaming chat client over an OpenAI-compatible endpoint.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn build_body(&self, prompt: &str, history: &[ChatMessage], options: &ChatOptions) -> Value {
        let mut messages: Vec<ChatMessage> = history.to_vec();
        messages.push(ChatMessage::new("user", prompt));

        let mut body = Map::new();
        body.insert("model".into(), Value::String(self.config.model.clone()));
        body.insert(
            "messages".into(),
            serde_json::to_value(&messages).unwrap_or(Value::Array(Vec::new())),
        );
        options.apply(&mut body);
        // Streaming is required by this client regardless of caller options.
        body.insert("stream".into(), Value::Bool(true));
        Value::Object(body)
    }
}

#[async_trait]
impl ChatCompletion for LlmClient {
    async fn complete(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        options: &ChatOptions,
        on_token: TokenSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let body = self.build_body(prompt, history, options);

        let mut request = self.http.post(&self.config.endpoint).json(&body);
        for (name, value) in provider_headers(&self.config.endpoint, self.config.api_key.as_deref())
        {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body));
        }

        let mut decoder = SseDecoder::with_delimiter(&self.config.message_delimiter);
        let mut stream = response.bytes_stream();

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut reasoning_first = false;

        let mut handle = |payload: SsePayload, text: &mut String, reasoning: &mut String| -> bool {
            match payload {
                SsePayload::Text(t) => {
                    if let Some(sink) = on_token {
                        sink(&t);
                    }
                    text.push_str(&t);
                    false
                }
                SsePayload::Reasoning(r) => {
                    if text.is_empty() {
                        reasoning_first = true;
                    }
                    reasoning.push_str(&r);
                    false
                }
                SsePayload::Done => true,
            }
        };

        let mut done = false;
        while !done {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("chat cancelled; resolving with partial content");
                    break;
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            let chunk = String::from_utf8_lossy(&bytes);
                            for payload in decoder.feed(&chunk) {
                                if handle(payload, &mut text, &mut reasoning) {
                                    done = true;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            // Tolerate teardown mid-stream; deliver the
                            // accumulated content.
                            warn!(error = %e, "response stream interrupted");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        for payload in decoder.flush() {
            handle(payload, &mut text, &mut reasoning);
        }

        let full = if !reasoning.is_empty() && (reasoning_first || text.is_empty()) {
            format!("<think>{reasoning}</think>{text}")
        } else {
            text
        };

        if full.is_empty() {
            warn!(
                endpoint = %self.config.endpoint,
                model = %self.config.model,
                "chat completed with empty content"
            );
        }

        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_contains_model_messages_and_stream() {
        let client = LlmClient::new(LlmConfig {
            model: "m1".into(),
            ..LlmConfig::default()
        });
        let history = vec![ChatMessage::new("assistant", "prev")];
        let body = client.build_body("hi", &history, &ChatOptions::default());

        assert_eq!(body["model"], "m1");
        assert_eq!(body["stream"], true);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "assistant");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hi");
    }

    #[test]
    fn stream_cannot_be_disabled_by_options() {
        let client = LlmClient::new(LlmConfig::default());
        let opts = ChatOptions {
            stream: Some(false),
            ..ChatOptions::default()
        };
        let body = client.build_body("hi", &[], &opts);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn options_merged_into_body() {
        let client = LlmClient::new(LlmConfig::default());
        let opts = ChatOptions {
            temperature: Some(0.3),
            max_tokens: Some(2048),
            ..ChatOptions::default()
        };
        let body = client.build_body("hi", &[], &opts);
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["max_tokens"], 2048);
    }

    #[test]
    fn openrouter_quirk_headers() {
        let headers = provider_headers("https://openrouter.ai/api/v1/chat/completions", Some("k"));
        let names: Vec<&str> = headers.iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"Authorization"));
        assert!(names.contains(&"HTTP-Referer"));
        assert!(names.contains(&"X-Title"));
    }

    #[test]
    fn azure_quirk_uses_api_key_header() {
        let headers = provider_headers("https://acme.openai.azure.com/deployments/x", Some("k"));
        assert_eq!(headers, vec![("api-key", "k".to_owned())]);
    }

    #[test]
    fn default_is_bearer_auth() {
        let headers = provider_headers("https://api.example.com/v1/chat/completions", Some("k"));
        assert_eq!(headers, vec![("Authorization", "Bearer k".to_owned())]);
    }

    #[test]
    fn no_key_no_auth_headers() {
        let headers = provider_headers("https://api.example.com/v1", None);
        assert!(headers.is_empty());
    }
}
