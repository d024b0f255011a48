//! Configuration types for SOW extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The downstream milestone sync has its
//! own [`SyncConfig`], loaded from the environment because the credentials
//! belong to the deployment, not the request.
//!
//! # Design choice: builder over constructor
//! Most callers only touch the provider and maybe the concurrency; the
//! builder lets them set exactly that and rely on documented defaults for
//! the remaining knobs.

use crate::error::SowError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on oracle attempts per call (first try included).
pub const MAX_ATTEMPTS_CEILING: u32 = 3;

/// How sections are classified before structured extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceStrategy {
    /// One classification oracle call per section. (default)
    #[default]
    Oracle,
    /// Offline keyword matching, no oracle calls.
    Keywords,
}

impl std::str::FromStr for RelevanceStrategy {
    type Err = SowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oracle" | "llm" => Ok(RelevanceStrategy::Oracle),
            "keywords" | "keyword" => Ok(RelevanceStrategy::Keywords),
            other => Err(SowError::InvalidConfig(format!(
                "unknown relevance strategy '{other}' (expected 'oracle' or 'keywords')"
            ))),
        }
    }
}

/// Configuration for one extraction pipeline.
///
/// Built via [`ExtractionConfig::builder()`] or [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use sow_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .concurrency(4)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 3);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Classification and extraction must be repeatable; any creativity here
    /// shows up as invented milestones.
    pub temperature: f32,

    /// Maximum tokens the oracle may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Concurrent oracle calls within one document. Default: 8.
    pub concurrency: usize,

    /// Attempts per oracle call, first try included. Range 1–3. Default: 3.
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per oracle call budget in seconds. Default: 60.
    pub oracle_timeout_secs: u64,

    /// Whole-document budget in seconds. Default: 600.
    ///
    /// Sized for a 50-page SOW with OCR on every page.
    pub document_timeout_secs: u64,

    /// Token bucket refill rate shared by all pipelines. Default: 120.
    pub requests_per_minute: u32,

    /// Maximum number of oracle calls in flight at once. Default: 16.
    pub max_in_flight: usize,

    /// How long a call may wait for quota before failing as rate-limited. Default: 30.
    pub limiter_wait_secs: u64,

    /// Pages with fewer native characters than this go through OCR. Default: 20.
    pub min_native_chars: usize,

    /// Longest rendered edge in pixels for OCR rasterisation. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Section classification strategy. Default: [`RelevanceStrategy::Oracle`].
    pub relevance: RelevanceStrategy,

    /// Confidence at or above which a clean result is reported as `success`. Default: 0.5.
    pub review_threshold: f64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Optional progress callback; receives stage and unit events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            concurrency: 8,
            max_attempts: MAX_ATTEMPTS_CEILING,
            retry_backoff_ms: 500,
            oracle_timeout_secs: 60,
            document_timeout_secs: 600,
            requests_per_minute: 120,
            max_in_flight: 16,
            limiter_wait_secs: 30,
            min_native_chars: 20,
            max_rendered_pixels: 2000,
            relevance: RelevanceStrategy::default(),
            review_threshold: 0.5,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("concurrency", &self.concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("oracle_timeout_secs", &self.oracle_timeout_secs)
            .field("document_timeout_secs", &self.document_timeout_secs)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("relevance", &self.relevance)
            .field("review_threshold", &self.review_threshold)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtractionConfigBuilder")
            .field(&self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn oracle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.oracle_timeout_secs = secs;
        self
    }

    pub fn document_timeout_secs(mut self, secs: u64) -> Self {
        self.config.document_timeout_secs = secs;
        self
    }

    pub fn requests_per_minute(mut self, n: u32) -> Self {
        self.config.requests_per_minute = n;
        self
    }

    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.config.max_in_flight = n.max(1);
        self
    }

    pub fn limiter_wait_secs(mut self, secs: u64) -> Self {
        self.config.limiter_wait_secs = secs;
        self
    }

    pub fn min_native_chars(mut self, n: usize) -> Self {
        self.config.min_native_chars = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn relevance(mut self, strategy: RelevanceStrategy) -> Self {
        self.config.relevance = strategy;
        self
    }

    pub fn review_threshold(mut self, t: f64) -> Self {
        self.config.review_threshold = t;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, SowError> {
        let c = &self.config;
        if c.max_attempts == 0 || c.max_attempts > MAX_ATTEMPTS_CEILING {
            return Err(SowError::InvalidConfig(format!(
                "max_attempts must be 1–{MAX_ATTEMPTS_CEILING}, got {}",
                c.max_attempts
            )));
        }
        if c.oracle_timeout_secs == 0 || c.document_timeout_secs == 0 {
            return Err(SowError::InvalidConfig(
                "timeouts must be at least one second".into(),
            ));
        }
        if c.oracle_timeout_secs > c.document_timeout_secs {
            return Err(SowError::InvalidConfig(format!(
                "oracle timeout ({}s) exceeds document timeout ({}s)",
                c.oracle_timeout_secs, c.document_timeout_secs
            )));
        }
        if c.requests_per_minute == 0 {
            return Err(SowError::InvalidConfig(
                "requests_per_minute must be ≥ 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.review_threshold) {
            return Err(SowError::InvalidConfig(format!(
                "review_threshold must be within 0–1, got {}",
                c.review_threshold
            )));
        }
        Ok(self.config)
    }
}

// ── Downstream sync ──────────────────────────────────────────────────────

/// Credentials and endpoint for the project-tracking milestone sync.
#[derive(Clone)]
pub struct SyncConfig {
    /// Base URL, e.g. `https://acme.tpondemand.com`. No trailing slash.
    pub domain: String,
    pub access_token: String,
    pub timeout: Duration,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("domain", &self.domain)
            .field("access_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SyncConfig {
    pub const DOMAIN_VAR: &'static str = "TARGETPROCESS_DOMAIN";
    pub const TOKEN_VAR: &'static str = "TARGETPROCESS_ACCESS_TOKEN";

    pub fn new(domain: impl Into<String>, access_token: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            domain: domain.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Read credentials from the environment.
    ///
    /// Returns `None` when either variable is missing or blank; the
    /// orchestrator then reports the sync as `skipped`.
    pub fn from_env() -> Option<Self> {
        let domain = std::env::var(Self::DOMAIN_VAR).ok()?;
        let token = std::env::var(Self::TOKEN_VAR).ok()?;
        Self::from_parts(&domain, &token)
    }

    fn from_parts(domain: &str, token: &str) -> Option<Self> {
        if domain.trim().is_empty() || token.trim().is_empty() {
            return None;
        }
        Some(Self::new(domain.trim(), token.trim()))
    }

    /// Endpoint that receives one POST per milestone.
    pub fn milestones_url(&self) -> String {
        format!("{}/api/v1/KeyMilestones", self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = ExtractionConfig::builder().build().unwrap();
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.oracle_timeout_secs, 60);
        assert_eq!(c.document_timeout_secs, 600);
        assert_eq!(c.relevance, RelevanceStrategy::Oracle);
    }

    #[test]
    fn rejects_more_than_three_attempts() {
        let err = ExtractionConfig::builder().max_attempts(5).build().unwrap_err();
        assert!(matches!(err, SowError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_oracle_timeout_longer_than_document() {
        let err = ExtractionConfig::builder()
            .oracle_timeout_secs(900)
            .document_timeout_secs(600)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn concurrency_is_clamped_to_one() {
        let c = ExtractionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn strategy_parses() {
        assert_eq!(
            "Keywords".parse::<RelevanceStrategy>().unwrap(),
            RelevanceStrategy::Keywords
        );
        assert!("magic".parse::<RelevanceStrategy>().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = ExtractionConfig::builder().password("hunter2").build().unwrap();
        assert!(!format!("{c:?}").contains("hunter2"));
        let s = SyncConfig::new("https://acme.tpondemand.com/", "tok-123");
        assert!(!format!("{s:?}").contains("tok-123"));
    }

    #[test]
    fn sync_config_requires_both_parts() {
        assert!(SyncConfig::from_parts("", "tok").is_none());
        assert!(SyncConfig::from_parts("https://x", "  ").is_none());
        let s = SyncConfig::from_parts("https://x.tpondemand.com/", "tok").unwrap();
        assert_eq!(
            s.milestones_url(),
            "https://x.tpondemand.com/api/v1/KeyMilestones"
        );
    }
}
