//! OpenAI-compatible HTTP provider: chat completions, SSE streaming, and
//! batch embeddings.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use kari_observability::HealthReport;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ProviderError;
use crate::provider::{ChatProvider, ChunkStream, GenerationParams, ProviderCapability};

const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Registry name this provider answers to
    pub name: String,
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Model sent with every request
    pub model: String,
    /// Bearer token, when the endpoint requires one
    pub api_key: Option<String>,
    /// Per-request deadline
    pub timeout: Duration,
    /// Declared capability set
    pub capabilities: Vec<ProviderCapability>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

/// HTTP provider speaking the OpenAI wire format.
pub struct OpenAiCompatibleProvider {
    config: OpenAiCompatibleConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Build the provider; fails only on an unusable TLS/client setup.
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| {
                ProviderError::MissingConfiguration(format!("http client build failed: {error}"))
            })?;
        Ok(Self { config, client })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{path}", self.config.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(url);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send_chat(
        &self,
        prompt: &str,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream,
        };
        let response = self
            .request("chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        check_status(response).await
    }
}

fn classify_transport(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(error.to_string())
    } else if error.is_connect() {
        ProviderError::Network(error.to_string())
    } else {
        ProviderError::from_message(error.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimited(format!("{status}: {body}")));
    }
    Err(ProviderError::from_message(format!("{status}: {body}")))
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, ProviderError>>,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

fn parse_sse_lines(state: &mut SseState) {
    while let Some(newline) = state.buffer.find('\n') {
        let line = state.buffer[..newline].trim().to_string();
        state.buffer.drain(..=newline);
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            state.done = true;
            return;
        }
        if let Ok(delta) = serde_json::from_str::<StreamDelta>(data)
            && let Some(content) = delta
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
            && !content.is_empty()
        {
            state.pending.push_back(content);
        }
    }
}

fn sse_chunk_stream(response: reqwest::Response) -> ChunkStream {
    let bytes = response
        .bytes_stream()
        .map(|result| {
            result
                .map(|bytes| bytes.to_vec())
                .map_err(|error| ProviderError::Network(error.to_string()))
        })
        .boxed();
    let state = SseState {
        bytes,
        buffer: String::new(),
        pending: VecDeque::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    parse_sse_lines(&mut state);
                }
                Some(Err(error)) => {
                    state.done = true;
                    return Some((Err(error), state));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> &[ProviderCapability] {
        &self.config.capabilities
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let response = self.send_chat(prompt, params, false).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Other(format!("response parse failed: {error}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Other("response has no choices".to_string()))
    }

    async fn stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ChunkStream, ProviderError> {
        let response = self.send_chat(prompt, params, true).await?;
        Ok(sse_chunk_stream(response))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingsRequest {
            model: &self.config.model,
            input: texts,
        };
        let response = self
            .request("embeddings")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let response = check_status(response).await?;
        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Other(format!("embeddings parse failed: {error}")))?;
        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }

    async fn health_check(&self) -> HealthReport {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        let mut builder = self.client.get(url).timeout(DEFAULT_HEALTH_TIMEOUT);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let started = Instant::now();
        match builder.send().await {
            Ok(response) if response.status().is_success() => {
                HealthReport::healthy(started.elapsed().as_millis() as u64)
            }
            Ok(response) => HealthReport::unhealthy(format!("status {}", response.status())),
            Err(error) => HealthReport::unhealthy(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_accumulate_content_and_stop_at_done() {
        let mut state = SseState {
            bytes: futures::stream::empty().boxed(),
            buffer: String::from(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\
                 data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\
                 data: [DONE]\n",
            ),
            pending: VecDeque::new(),
            done: false,
        };
        parse_sse_lines(&mut state);
        assert_eq!(state.pending, VecDeque::from(["Hel".to_string(), "lo".to_string()]));
        assert!(state.done);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut state = SseState {
            bytes: futures::stream::empty().boxed(),
            buffer: String::from(": keepalive\n\nevent: ping\ndata: not json\n"),
            pending: VecDeque::new(),
            done: false,
        };
        parse_sse_lines(&mut state);
        assert!(state.pending.is_empty());
        assert!(!state.done);
    }
}
