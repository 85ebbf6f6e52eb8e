use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use feedsift_core::ClassificationError;
use serde::{Deserialize, Serialize};

/// A message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

/// Request to an LLM.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub messages: Vec<LlmMessage>,
    /// Image attached to the last user message as a second input.
    pub image_url: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Response from an LLM.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
}

/// Facade trait for LLM providers.
///
/// Implementations call an OpenAI-compatible endpoint or return scripted
/// responses for testing. A single call is one attempt; retrying is the
/// caller's concern.
pub trait LlmClient: Send + Sync {
    fn chat<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, ClassificationError>> + Send + 'a>>;
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            model,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Bound each HTTP request. Keeps the default client if the builder fails.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        match reqwest::Client::builder().timeout(timeout).build() {
            Ok(http) => self.http = http,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build HTTP client with timeout, using default");
            }
        }
        self
    }

    fn request_body(&self, request: &LlmRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": request.system_prompt,
            }));
        }

        let last = request.messages.len().saturating_sub(1);
        for (i, msg) in request.messages.iter().enumerate() {
            let content = match &request.image_url {
                Some(url) if i == last && msg.role == "user" => serde_json::json!([
                    { "type": "text", "text": msg.content },
                    { "type": "image_url", "image_url": { "url": url } },
                ]),
                _ => serde_json::json!(msg.content),
            };
            messages.push(serde_json::json!({
                "role": msg.role,
                "content": content,
            }));
        }

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }
}

impl LlmClient for OpenAiCompatibleClient {
    fn chat<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, ClassificationError>> + Send + 'a>> {
        Box::pin(async move {
            let Some(key) = &self.api_key else {
                return Err(ClassificationError::AuthError(
                    "no API key configured: set FEEDSIFT_API_KEY or classifier.api_key".into(),
                ));
            };

            let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
            let body = self.request_body(request);

            let resp = self
                .http
                .post(&url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    ClassificationError::TransportError(format!("HTTP request failed: {e}"))
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(ClassificationError::TransportError(format!(
                    "classification API returned {status}: {body}"
                )));
            }

            let json: serde_json::Value = resp.json().await.map_err(|e| {
                ClassificationError::TransportError(format!("unreadable response body: {e}"))
            })?;

            let content = json["choices"][0]["message"]["content"]
                .as_str()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    ClassificationError::ParseError(format!(
                        "no completion in response: {}",
                        serde_json::to_string(&json).unwrap_or_default()
                    ))
                })?
                .to_string();

            Ok(LlmResponse { content })
        })
    }
}

/// Stub LLM client that replays scripted outcomes for testing.
pub struct StubLlmClient {
    responses: Vec<Result<String, ClassificationError>>,
    latency: Option<Duration>,
    call_count: AtomicUsize,
    call_times: Mutex<Vec<tokio::time::Instant>>,
}

impl StubLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Replay a mix of successes and failures, cycling when exhausted.
    pub fn scripted(responses: Vec<Result<String, ClassificationError>>) -> Self {
        Self {
            responses,
            latency: None,
            call_count: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// Create a stub that always returns the given response.
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Create a stub whose every call fails with `error`.
    pub fn failing(error: ClassificationError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    /// Sleep before answering, to hold calls in flight.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Clock readings taken at the start of each call.
    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.call_times
            .lock()
            .map(|times| times.clone())
            .unwrap_or_default()
    }
}

impl LlmClient for StubLlmClient {
    fn chat<'a>(
        &'a self,
        _request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, ClassificationError>> + Send + 'a>> {
        Box::pin(async move {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut times) = self.call_times.lock() {
                times.push(tokio::time::Instant::now());
            }
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if self.responses.is_empty() {
                return Ok(LlmResponse {
                    content: "stub response".into(),
                });
            }
            self.responses[idx % self.responses.len()]
                .clone()
                .map(|content| LlmResponse { content })
        })
    }
}
