//! Model backends and the fallback-aware invoker.
//!
//! A [`ModelBackend`] turns a prompt string into generated text plus usage
//! metadata, or fails with a transport/timeout error. The [`ModelInvoker`]
//! drives the state machine
//! `Idle -> CallingPrimary -> {Succeeded | CallingSecondary} -> {Succeeded | Failed}`:
//! on a transport-class failure of the primary backend it tries the
//! secondary once; if that also fails the call fails terminally. Every
//! attempt — including a failed primary — is written to the usage store.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::{ModelUsageRecord, UsageStore};

/// Default per-request timeout for backend calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Connect timeout for backend calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from a model backend call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Backend configuration invalid: {0}")]
    Configuration(String),

    #[error("Request to {provider} timed out")]
    Timeout { provider: String },

    #[error("Failed to connect to {provider}: {detail}")]
    Connect { provider: String, detail: String },

    #[error("{provider} returned error status {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse {provider} response: {detail}")]
    InvalidResponse { provider: String, detail: String },

    #[error("{provider} returned no completion choices")]
    EmptyResponse { provider: String },
}

impl ModelError {
    /// Transport-class failures trigger fallback to the secondary backend;
    /// anything else (auth, malformed response) fails the call outright.
    pub fn is_transport(&self) -> bool {
        match self {
            ModelError::Timeout { .. } | ModelError::Connect { .. } => true,
            ModelError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Generated text plus usage metadata from one backend call.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A model backend: one operation, prompt in, generated text plus usage out.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Provider label used in logs and usage records.
    fn provider(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<BackendResponse, ModelError>;
}

/// Settings for one OpenAI-compatible HTTP backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Provider label, e.g. "primary" or the vendor name.
    pub provider: String,
    /// Router base URL, e.g. "http://localhost:4000".
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

// -- OpenAI-compatible wire types --

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// OpenAI-compatible chat completions backend over HTTP.
pub struct HttpChatBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpChatBackend {
    pub fn new(config: BackendConfig) -> Result<Self, ModelError> {
        let cleaned_url = config.base_url.trim_end_matches('/');
        let parsed = reqwest::Url::parse(cleaned_url).map_err(|e| {
            ModelError::Configuration(format!("Invalid backend URL '{}': {}", cleaned_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ModelError::Configuration(format!(
                "Backend URL must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Model backend '{}' created for {} (model {})",
            config.provider, cleaned_url, config.model
        );

        Ok(Self {
            client,
            config: BackendConfig {
                base_url: cleaned_url.to_string(),
                ..config
            },
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.config.api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                    .unwrap_or_else(|_| HeaderValue::from_static("")),
            );
        }
        headers
    }
}

#[async_trait]
impl ModelBackend for HttpChatBackend {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    async fn generate(&self, prompt: &str) -> Result<BackendResponse, ModelError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
        };

        debug!(
            "Calling backend '{}' with prompt of {} chars",
            self.config.provider,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        provider: self.config.provider.clone(),
                    }
                } else {
                    ModelError::Connect {
                        provider: self.config.provider.clone(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(200).collect();
            return Err(ModelError::Api {
                provider: self.config.provider.clone(),
                status: status.as_u16(),
                body: truncated,
            });
        }

        let chat_response: ChatCompletionResponse =
            response.json().await.map_err(|e| ModelError::InvalidResponse {
                provider: self.config.provider.clone(),
                detail: e.to_string(),
            })?;

        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ModelError::EmptyResponse {
                provider: self.config.provider.clone(),
            })?;

        let usage = chat_response.usage.unwrap_or_default();
        Ok(BackendResponse {
            content,
            model: chat_response.model.unwrap_or_else(|| self.config.model.clone()),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
    }
}

/// What the invoker hands back on success.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub latency_ms: u64,
}

/// Per-backend reachability, reported by [`ModelInvoker::check_status`].
#[derive(Debug, Clone, Serialize)]
pub struct InvokerStatus {
    pub primary_reachable: bool,
    pub fallback_reachable: Option<bool>,
}

/// Calls the primary backend, falling over to the secondary once on
/// transport failure.
pub struct ModelInvoker {
    primary: Arc<dyn ModelBackend>,
    fallback: Option<Arc<dyn ModelBackend>>,
    usage_store: Arc<dyn UsageStore>,
}

impl ModelInvoker {
    pub fn new(
        primary: Arc<dyn ModelBackend>,
        fallback: Option<Arc<dyn ModelBackend>>,
        usage_store: Arc<dyn UsageStore>,
    ) -> Self {
        Self {
            primary,
            fallback,
            usage_store,
        }
    }

    /// Send the prompt, trying the secondary backend once if the primary
    /// fails at the transport level. Terminal failure propagates.
    pub async fn invoke(&self, prompt: &str) -> Result<ModelReply, ModelError> {
        // CallingPrimary
        match self.call_backend(self.primary.as_ref(), prompt).await {
            Ok(reply) => Ok(reply),
            Err(primary_err) if primary_err.is_transport() => {
                let Some(fallback) = &self.fallback else {
                    error!("Primary backend failed with no fallback configured: {}", primary_err);
                    return Err(primary_err);
                };
                // CallingSecondary
                warn!(
                    "Primary backend '{}' failed ({}), falling back to '{}'",
                    self.primary.provider(),
                    primary_err,
                    fallback.provider()
                );
                match self.call_backend(fallback.as_ref(), prompt).await {
                    Ok(reply) => Ok(reply),
                    Err(fallback_err) => {
                        error!(
                            "Fallback backend '{}' also failed: {}",
                            fallback.provider(),
                            fallback_err
                        );
                        Err(fallback_err)
                    }
                }
            }
            Err(e) => {
                error!("Primary backend '{}' failed terminally: {}", self.primary.provider(), e);
                Err(e)
            }
        }
    }

    /// Probe both backends with a minimal prompt. Reachability only — never
    /// fails the caller.
    pub async fn check_status(&self) -> InvokerStatus {
        let primary_reachable = self.primary.generate("Say OK").await.is_ok();
        let fallback_reachable = match &self.fallback {
            Some(backend) => Some(backend.generate("Say OK").await.is_ok()),
            None => None,
        };
        InvokerStatus {
            primary_reachable,
            fallback_reachable,
        }
    }

    async fn call_backend(
        &self,
        backend: &dyn ModelBackend,
        prompt: &str,
    ) -> Result<ModelReply, ModelError> {
        let start = Instant::now();
        let result = backend.generate(prompt).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                info!(
                    "Backend '{}' answered in {}ms ({} total tokens)",
                    backend.provider(),
                    latency_ms,
                    response.total_tokens
                );
                self.record_usage(
                    backend.provider(),
                    &response.model,
                    Some(&response),
                    latency_ms,
                )
                .await;
                Ok(ModelReply {
                    content: response.content,
                    provider: backend.provider().to_string(),
                    model: response.model,
                    prompt_tokens: response.prompt_tokens,
                    completion_tokens: response.completion_tokens,
                    total_tokens: response.total_tokens,
                    latency_ms,
                })
            }
            Err(e) => {
                self.record_usage(backend.provider(), "unknown", None, latency_ms)
                    .await;
                Err(e)
            }
        }
    }

    /// Usage accounting is observability, not correctness: a write failure
    /// is logged and swallowed.
    async fn record_usage(
        &self,
        provider: &str,
        model: &str,
        response: Option<&BackendResponse>,
        latency_ms: u64,
    ) {
        let record = ModelUsageRecord {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_tokens: response.map(|r| r.prompt_tokens).unwrap_or(0),
            completion_tokens: response.map(|r| r.completion_tokens).unwrap_or(0),
            total_tokens: response.map(|r| r.total_tokens).unwrap_or(0),
            latency_ms,
            succeeded: response.is_some(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.usage_store.record_usage(record).await {
            warn!("Failed to record model usage: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryUsageStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend scripted to fail a fixed number of times before succeeding.
    struct ScriptedBackend {
        provider: String,
        failures: AtomicU32,
        failure: fn(&str) -> ModelError,
        content: String,
    }

    impl ScriptedBackend {
        fn ok(provider: &str, content: &str) -> Self {
            Self {
                provider: provider.to_string(),
                failures: AtomicU32::new(0),
                failure: |_| unreachable!(),
                content: content.to_string(),
            }
        }

        fn failing(provider: &str, failure: fn(&str) -> ModelError) -> Self {
            Self {
                provider: provider.to_string(),
                failures: AtomicU32::new(u32::MAX),
                failure,
                content: String::new(),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn provider(&self) -> &str {
            &self.provider
        }

        async fn generate(&self, _prompt: &str) -> Result<BackendResponse, ModelError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err((self.failure)(&self.provider));
            }
            Ok(BackendResponse {
                content: self.content.clone(),
                model: "test-model".to_string(),
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            })
        }
    }

    fn timeout_error(provider: &str) -> ModelError {
        ModelError::Timeout {
            provider: provider.to_string(),
        }
    }

    fn auth_error(provider: &str) -> ModelError {
        ModelError::Api {
            provider: provider.to_string(),
            status: 401,
            body: "unauthorized".to_string(),
        }
    }

    #[tokio::test]
    async fn test_primary_success_no_fallback_needed() {
        let usage = Arc::new(InMemoryUsageStore::default());
        let invoker = ModelInvoker::new(
            Arc::new(ScriptedBackend::ok("primary", "hello")),
            Some(Arc::new(ScriptedBackend::ok("secondary", "unused"))),
            usage.clone(),
        );
        let reply = invoker.invoke("prompt").await.unwrap();
        assert_eq!(reply.content, "hello");
        assert_eq!(reply.provider, "primary");
        assert_eq!(reply.total_tokens, 120);

        let records = usage.records().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].succeeded);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_secondary() {
        let usage = Arc::new(InMemoryUsageStore::default());
        let invoker = ModelInvoker::new(
            Arc::new(ScriptedBackend::failing("primary", timeout_error)),
            Some(Arc::new(ScriptedBackend::ok("secondary", "from fallback"))),
            usage.clone(),
        );
        let reply = invoker.invoke("prompt").await.unwrap();
        assert_eq!(reply.content, "from fallback");
        assert_eq!(reply.provider, "secondary");

        // Both attempts observable as separate usage records
        let records = usage.records().await;
        assert_eq!(records.len(), 2);
        assert!(!records[0].succeeded);
        assert_eq!(records[0].provider, "primary");
        assert!(records[1].succeeded);
        assert_eq!(records[1].provider, "secondary");
    }

    #[tokio::test]
    async fn test_both_backends_failing_is_terminal() {
        let usage = Arc::new(InMemoryUsageStore::default());
        let invoker = ModelInvoker::new(
            Arc::new(ScriptedBackend::failing("primary", timeout_error)),
            Some(Arc::new(ScriptedBackend::failing("secondary", timeout_error))),
            usage.clone(),
        );
        let err = invoker.invoke("prompt").await.unwrap_err();
        assert!(matches!(err, ModelError::Timeout { .. }));
        assert_eq!(usage.records().await.len(), 2);
    }

    #[tokio::test]
    async fn test_non_transport_error_skips_fallback() {
        let usage = Arc::new(InMemoryUsageStore::default());
        let invoker = ModelInvoker::new(
            Arc::new(ScriptedBackend::failing("primary", auth_error)),
            Some(Arc::new(ScriptedBackend::ok("secondary", "unused"))),
            usage.clone(),
        );
        let err = invoker.invoke("prompt").await.unwrap_err();
        assert!(matches!(err, ModelError::Api { status: 401, .. }));
        assert_eq!(usage.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_fallback_configured_fails_on_transport_error() {
        let usage = Arc::new(InMemoryUsageStore::default());
        let invoker = ModelInvoker::new(
            Arc::new(ScriptedBackend::failing("primary", timeout_error)),
            None,
            usage.clone(),
        );
        let err = invoker.invoke("prompt").await.unwrap_err();
        assert!(matches!(err, ModelError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_check_status_reports_reachability() {
        let usage = Arc::new(InMemoryUsageStore::default());
        let invoker = ModelInvoker::new(
            Arc::new(ScriptedBackend::ok("primary", "ok")),
            Some(Arc::new(ScriptedBackend::failing("secondary", timeout_error))),
            usage,
        );
        let status = invoker.check_status().await;
        assert!(status.primary_reachable);
        assert_eq!(status.fallback_reachable, Some(false));
    }

    #[test]
    fn test_transport_classification() {
        assert!(timeout_error("p").is_transport());
        assert!(ModelError::Connect {
            provider: "p".to_string(),
            detail: "refused".to_string()
        }
        .is_transport());
        assert!(ModelError::Api {
            provider: "p".to_string(),
            status: 503,
            body: String::new()
        }
        .is_transport());
        assert!(ModelError::Api {
            provider: "p".to_string(),
            status: 429,
            body: String::new()
        }
        .is_transport());
        assert!(!auth_error("p").is_transport());
        assert!(!ModelError::EmptyResponse {
            provider: "p".to_string()
        }
        .is_transport());
    }

    #[test]
    fn test_http_backend_rejects_bad_urls() {
        let config = BackendConfig {
            provider: "primary".to_string(),
            base_url: "not-a-url".to_string(),
            api_key: String::new(),
            model: "cds-large".to_string(),
            timeout_secs: 60,
        };
        assert!(matches!(
            HttpChatBackend::new(config),
            Err(ModelError::Configuration(_))
        ));

        let config = BackendConfig {
            provider: "primary".to_string(),
            base_url: "ftp://localhost:4000".to_string(),
            api_key: String::new(),
            model: "cds-large".to_string(),
            timeout_secs: 60,
        };
        assert!(matches!(
            HttpChatBackend::new(config),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn test_http_backend_trims_trailing_slash() {
        let backend = HttpChatBackend::new(BackendConfig {
            provider: "primary".to_string(),
            base_url: "http://localhost:4000/".to_string(),
            api_key: "key".to_string(),
            model: "cds-large".to_string(),
            timeout_secs: 60,
        })
        .unwrap();
        assert_eq!(backend.config.base_url, "http://localhost:4000");
    }
}
