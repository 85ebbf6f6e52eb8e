use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use feedsift_core::Policy;
use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_RESERVATION_TIMEOUT, ResultCache};
use crate::classifier::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, LlmClassifier};
use crate::error::PipelineError;
use crate::llm::{LlmClient, OpenAiCompatibleClient, StubLlmClient};
use crate::retry::{DEFAULT_BACKOFF_STEP, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

/// Environment variables consulted for the API key, in order, before the file.
pub const API_KEY_ENV_VARS: [&str; 2] = ["FEEDSIFT_API_KEY", "GROQ_API_KEY"];

/// Completion the stub provider answers every request with.
const STUB_COMPLETION: &str = r#"{"excludesAllExcluded": true, "includesAnyOfIncluded": true, "sentimentScore": 10, "reason": "stub provider"}"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedsiftConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub policy: PolicySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub provider: ClassifierProvider,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_model() -> String {
    "mixtral-8x7b-32768".into()
}
fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: ClassifierProvider::default(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierProvider {
    #[default]
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
    #[serde(rename = "stub")]
    Stub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_step_secs")]
    pub backoff_step_secs: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_backoff_step_secs() -> u64 {
    DEFAULT_BACKOFF_STEP.as_secs()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_secs: default_backoff_step_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_reservation_timeout_secs")]
    pub reservation_timeout_secs: u64,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_reservation_timeout_secs() -> u64 {
    DEFAULT_RESERVATION_TIMEOUT.as_secs()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            reservation_timeout_secs: default_reservation_timeout_secs(),
        }
    }
}

/// Initial filtering policy, in the comma-separated form a settings UI
/// stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_include_beliefs")]
    pub include_beliefs: String,
    #[serde(default)]
    pub exclude_beliefs: String,
    #[serde(default = "default_min_sentiment")]
    pub min_sentiment: f64,
    /// Presentation hint passed through on hidden verdicts.
    #[serde(default = "default_minimize_posts")]
    pub minimize_posts: bool,
}

fn default_include_beliefs() -> String {
    "Iskon,Hindu,Islam".into()
}
fn default_min_sentiment() -> f64 {
    5.0
}
fn default_minimize_posts() -> bool {
    true
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            include_beliefs: default_include_beliefs(),
            exclude_beliefs: String::new(),
            min_sentiment: default_min_sentiment(),
            minimize_posts: default_minimize_posts(),
        }
    }
}

impl PolicySettings {
    pub fn to_policy(&self) -> Policy {
        Policy::from_lists(&self.include_beliefs, &self.exclude_beliefs, self.min_sentiment)
    }
}

impl FeedsiftConfig {
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, PipelineError> {
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading config");
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// `~/.feedsift/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".feedsift").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::ConfigError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(PipelineError::ConfigError(
                "cache.capacity must be at least 1".into(),
            ));
        }
        if !self.classifier.temperature.is_finite() || self.classifier.temperature < 0.0 {
            return Err(PipelineError::ConfigError(format!(
                "classifier.temperature must be a non-negative number, got {}",
                self.classifier.temperature
            )));
        }

        let budget = self.retry_budget();
        let reservation = Duration::from_secs(self.cache.reservation_timeout_secs);
        if reservation <= budget {
            return Err(PipelineError::ConfigError(format!(
                "cache.reservation_timeout_secs ({}) must exceed the worst-case classification time of {}s \
                 (retry.max_attempts x classifier.request_timeout_secs plus backoff)",
                self.cache.reservation_timeout_secs,
                budget.as_secs()
            )));
        }
        Ok(())
    }

    /// Worst-case time one classification can hold its reservation.
    pub fn retry_budget(&self) -> Duration {
        self.retry_policy()
            .worst_case_duration(Duration::from_secs(self.classifier.request_timeout_secs))
    }

    pub fn to_toml_string(&self) -> Result<String, PipelineError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the config to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    /// Environment first, then the file. Blank values are ignored.
    pub fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .chain(self.classifier.api_key.clone())
            .find(|key| !key.trim().is_empty())
    }

    pub fn build_llm_client(&self) -> Arc<dyn LlmClient> {
        match self.classifier.provider {
            ClassifierProvider::OpenAiCompatible => {
                let api_key = self.resolve_api_key();
                if api_key.is_none() {
                    tracing::warn!(
                        "No API key configured; classification will fail and items will be shown unfiltered"
                    );
                }
                Arc::new(
                    OpenAiCompatibleClient::new(
                        self.classifier.base_url.clone(),
                        self.classifier.model.clone(),
                        api_key,
                    )
                    .with_request_timeout(Duration::from_secs(self.classifier.request_timeout_secs)),
                )
            }
            ClassifierProvider::Stub => Arc::new(StubLlmClient::constant(STUB_COMPLETION)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.backoff_step_secs),
        )
    }

    pub fn build_classifier(&self) -> LlmClassifier {
        LlmClassifier::new(self.build_llm_client())
            .with_retry(self.retry_policy())
            .with_sampling(self.classifier.temperature, self.classifier.max_tokens)
    }

    pub fn build_cache(&self) -> ResultCache {
        ResultCache::with_reservation_timeout(
            self.cache.capacity,
            Duration::from_secs(self.cache.reservation_timeout_secs),
        )
    }
}
