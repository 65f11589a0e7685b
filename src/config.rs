//! Configuration types.
//!
//! Every struct has a `Default` carrying the documented baseline and a
//! `from_env()` that overlays `MAILPRESS_*` variables. Values that fail to
//! parse fall back to the default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::publish::retry::RetryPolicy;

/// Read and parse an env var, returning `None` when unset or unparsable.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Settings for analysis aggregation and article assembly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Analyses below this confidence are dropped with a warning.
    pub min_confidence: f32,
    /// Maximum AI requests in flight at once.
    pub ai_concurrency: usize,
    /// Emails per AI request.
    pub ai_batch_size: usize,
    /// Reading speed used for `estimated_read_time`.
    pub words_per_minute: usize,
    /// Timeout for every AI call.
    pub ai_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            ai_concurrency: 4,
            ai_batch_size: 5,
            words_per_minute: 200,
            ai_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_confidence: env_parse::<f32>("MAILPRESS_MIN_CONFIDENCE")
                .filter(|c| (0.0..=1.0).contains(c))
                .unwrap_or(defaults.min_confidence),
            ai_concurrency: env_parse::<usize>("MAILPRESS_AI_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.ai_concurrency),
            ai_batch_size: env_parse::<usize>("MAILPRESS_AI_BATCH_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.ai_batch_size),
            words_per_minute: env_parse::<usize>("MAILPRESS_WORDS_PER_MINUTE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.words_per_minute),
            ai_timeout: env_parse::<u64>("MAILPRESS_NETWORK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ai_timeout),
        }
    }
}

/// CMS post status requested on submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Publish,
    Draft,
    Private,
    Pending,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Draft => "draft",
            Self::Private => "private",
            Self::Pending => "pending",
        }
    }
}

impl FromStr for PostStatus {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "publish" => Ok(Self::Publish),
            "draft" => Ok(Self::Draft),
            "private" => Ok(Self::Private),
            "pending" => Ok(Self::Pending),
            other => Err(ConfigError::InvalidValue {
                key: "MAILPRESS_POST_STATUS".into(),
                message: format!("unknown post status '{other}'"),
            }),
        }
    }
}

/// Settings for the publish orchestrator.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Timeout applied to every CMS call.
    pub call_timeout: Duration,
    /// How long an idempotency entry survives without being resolved.
    pub cache_ttl: Duration,
    /// Optional file the idempotency cache is mirrored to.
    pub cache_path: Option<PathBuf>,
    /// Status the post is created with.
    pub post_status: PostStatus,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(3600), // 1 hour
            cache_path: None,
            post_status: PostStatus::Publish,
        }
    }
}

impl PublishConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut retry = defaults.retry.clone();
        if let Some(n) = env_parse::<u32>("MAILPRESS_PUBLISH_MAX_ATTEMPTS").filter(|n| *n > 0) {
            retry.max_attempts = n;
        }

        let post_status = match std::env::var("MAILPRESS_POST_STATUS") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: ConfigError| {
                tracing::warn!(error = %e, "Falling back to default post status");
                defaults.post_status
            }),
            Err(_) => defaults.post_status,
        };

        Self {
            retry,
            call_timeout: env_parse::<u64>("MAILPRESS_NETWORK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            cache_ttl: env_parse::<u64>("MAILPRESS_IDEMPOTENCY_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_path: std::env::var("MAILPRESS_IDEMPOTENCY_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            post_status,
        }
    }
}

/// AI provider credentials and model selection.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

impl AiConfig {
    /// Returns `None` when no API key is configured.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        Some(Self {
            api_key: SecretString::from(api_key),
            model: std::env::var("MAILPRESS_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
        })
    }
}

/// WordPress site credentials.
#[derive(Debug, Clone)]
pub struct CmsConfig {
    pub url: String,
    pub username: String,
    pub password: SecretString,
}

impl CmsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("WORDPRESS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("WORDPRESS_URL".into()))?;
        let username = std::env::var("WORDPRESS_USERNAME")
            .map_err(|_| ConfigError::MissingEnvVar("WORDPRESS_USERNAME".into()))?;
        let password = std::env::var("WORDPRESS_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("WORDPRESS_PASSWORD".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "WORDPRESS_URL".into(),
                message: format!("'{url}' is not an http(s) URL"),
            });
        }

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            username,
            password: SecretString::from(password),
        })
    }
}
