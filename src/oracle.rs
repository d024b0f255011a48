//! Oracle access: the language-model calls behind fixed prompts.
//!
//! Three pieces live here:
//!
//! * the [`Oracle`] and [`OcrEngine`] traits, the only seams through which
//!   the pipeline talks to a model, plus their `edgequake-llm`
//!   implementations [`LlmOracle`] and [`VisionOcr`];
//! * the [`OracleLimiter`], one token bucket plus an in-flight cap shared by
//!   every pipeline in the process (passed around as `Arc`, never global);
//! * [`with_retries`], the retry loop every call site goes through.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx / timeouts from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! with at most three attempts keeps the worst case bounded: with a 500 ms
//! base the waits are 500 ms → 1 s. Authentication failures are returned
//! immediately.

use crate::config::{ExtractionConfig, MAX_ATTEMPTS_CEILING};
use crate::error::{OracleError, SowError};
use crate::model::{Category, Section};
use crate::prompts::{
    relevance_user_prompt, ExtractionTemplate, EXTRACTION_SYSTEM_PROMPT, OCR_SYSTEM_PROMPT,
    RELEVANCE_SYSTEM_PROMPT,
};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

// ── Traits ───────────────────────────────────────────────────────────────

/// Text classification / extraction oracle. Returns the raw model answer;
/// parsing is the caller's job.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn classify(
        &self,
        section: &Section,
        categories: &[Category],
    ) -> Result<String, OracleError>;

    async fn extract(
        &self,
        section: &Section,
        category: Category,
        template: &ExtractionTemplate,
        correction: bool,
    ) -> Result<String, OracleError>;
}

/// Transcribes a rasterised page into markdown.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn transcribe(&self, page_index: usize, image: ImageData) -> Result<String, OracleError>;
}

// ── edgequake-llm implementations ────────────────────────────────────────

/// [`Oracle`] backed by any `edgequake-llm` provider.
pub struct LlmOracle {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    async fn chat(&self, label: &str, messages: Vec<ChatMessage>) -> Result<String, OracleError> {
        let options = build_options(self.temperature, self.max_tokens);
        chat(&self.provider, label, &messages, &options).await
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn classify(
        &self,
        section: &Section,
        categories: &[Category],
    ) -> Result<String, OracleError> {
        let messages = vec![
            ChatMessage::system(RELEVANCE_SYSTEM_PROMPT),
            ChatMessage::user(relevance_user_prompt(section, categories)),
        ];
        self.chat("classify", messages).await
    }

    async fn extract(
        &self,
        section: &Section,
        _category: Category,
        template: &ExtractionTemplate,
        correction: bool,
    ) -> Result<String, OracleError> {
        let messages = vec![
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(template.render(section, correction)),
        ];
        self.chat("extract", messages).await
    }
}

/// [`OcrEngine`] that sends the page image to a vision-capable provider.
pub struct VisionOcr {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
}

impl VisionOcr {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    async fn transcribe(&self, page_index: usize, image: ImageData) -> Result<String, OracleError> {
        // The image carries the content; the user text only has to exist.
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images(
                format!("Transcribe page {}.", page_index + 1),
                vec![image],
            ),
        ];
        let options = build_options(0.0, self.max_tokens);
        chat(&self.provider, "ocr", &messages, &options).await
    }
}

async fn chat(
    provider: &Arc<dyn LLMProvider>,
    label: &str,
    messages: &[ChatMessage],
    options: &CompletionOptions,
) -> Result<String, OracleError> {
    let start = Instant::now();
    let response = provider
        .chat(messages, Some(options))
        .await
        .map_err(|e| classify_provider_error(&e.to_string()))?;
    debug!(
        "{}: {} input tokens, {} output tokens, {:?}",
        label,
        response.prompt_tokens,
        response.completion_tokens,
        start.elapsed()
    );
    Ok(response.content)
}

/// Build `CompletionOptions` for one oracle call.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

/// Map a provider error message onto the retry taxonomy.
///
/// Providers surface HTTP failures as formatted strings, so the status code
/// or its usual wording is matched.
pub fn classify_provider_error(message: &str) -> OracleError {
    let lower = message.to_ascii_lowercase();
    let detail = message.to_string();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        OracleError::RateLimited { detail }
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
    {
        OracleError::Auth { detail }
    } else {
        OracleError::Transport { detail }
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, SowError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        SowError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set, so users holding several keys
///    get a predictable default.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, SowError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| SowError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

// ── Limiter ──────────────────────────────────────────────────────────────

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Process-wide oracle quota: requests per minute plus an in-flight cap.
pub struct OracleLimiter {
    bucket: DirectLimiter,
    in_flight: Semaphore,
    max_wait: Duration,
}

impl std::fmt::Debug for OracleLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleLimiter")
            .field("available_permits", &self.in_flight.available_permits())
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

impl OracleLimiter {
    pub fn new(requests_per_minute: u32, max_in_flight: usize, max_wait: Duration) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            bucket: RateLimiter::direct(Quota::per_minute(rpm)),
            in_flight: Semaphore::new(max_in_flight.max(1)),
            max_wait,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            config.requests_per_minute,
            config.max_in_flight,
            Duration::from_secs(config.limiter_wait_secs),
        )
    }

    /// Wait for an in-flight slot and a token.
    ///
    /// Waiting longer than `max_wait` is reported as
    /// [`OracleError::RateLimited`], which callers retry.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, OracleError> {
        let wait = async {
            let permit = self.in_flight.acquire().await.map_err(|_| OracleError::Transport {
                detail: "oracle limiter closed".into(),
            })?;
            self.bucket.until_ready().await;
            Ok(permit)
        };
        timeout(self.max_wait, wait)
            .await
            .map_err(|_| OracleError::RateLimited {
                detail: format!("no oracle quota within {:?}", self.max_wait),
            })?
    }
}

// ── Retry loop ───────────────────────────────────────────────────────────

/// Attempt count, backoff and per-call budget for one oracle call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            call_timeout: config.oracle_timeout(),
        }
    }
}

/// Run `call` under the limiter, with a per-attempt timeout and bounded
/// exponential backoff between transient failures.
pub async fn with_retries<F, Fut>(
    label: &str,
    policy: RetryPolicy,
    limiter: &OracleLimiter,
    mut call: F,
) -> Result<String, OracleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, OracleError>>,
{
    let attempts = policy.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING);
    let mut attempt = 1;
    loop {
        let result = match limiter.acquire().await {
            Ok(_permit) => match timeout(policy.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout {
                    secs: policy.call_timeout.as_secs(),
                }),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => return Ok(text),
            Err(e) if !e.is_transient() || attempt >= attempts => {
                warn!("{}: giving up after attempt {}: {}", label, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let backoff = policy.backoff * 2u32.pow(attempt - 1);
                warn!(
                    "{}: attempt {}/{} failed: {}; retrying after {:?}",
                    label, attempt, attempts, e, backoff
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Everything a fan-out stage needs to call the oracle.
#[derive(Clone)]
pub struct OracleContext {
    pub oracle: Arc<dyn Oracle>,
    pub limiter: Arc<OracleLimiter>,
    pub policy: RetryPolicy,
    /// Maximum concurrent units per stage.
    pub concurrency: usize,
    pub progress: Option<crate::progress::ProgressCallback>,
}

impl OracleContext {
    pub fn units_start(&self, label: &str, total: usize) {
        if let Some(ref cb) = self.progress {
            cb.on_units_start(label, total);
        }
    }

    pub fn unit_complete(&self, label: &str, ok: bool) {
        if let Some(ref cb) = self.progress {
            cb.on_unit_complete(label, ok);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(max_attempts: u32, call_timeout_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
            call_timeout: Duration::from_millis(call_timeout_ms),
        }
    }

    fn limiter() -> OracleLimiter {
        OracleLimiter::new(6_000, 4, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let out = with_retries("test", policy(3, 1_000), &limiter(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(OracleError::Transport {
                        detail: "503".into(),
                    })
                } else {
                    Ok("ok".to_string())
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let out = with_retries("test", policy(3, 1_000), &limiter(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(OracleError::Auth {
                    detail: "401".into(),
                })
            }
        })
        .await;
        assert!(matches!(out, Err(OracleError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let out = with_retries("test", policy(2, 20), &limiter(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                sleep(Duration::from_millis(500)).await;
                Ok("late".to_string())
            }
        })
        .await;
        assert!(matches!(out, Err(OracleError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_limiter_reports_rate_limited() {
        let limiter = OracleLimiter::new(6_000, 1, Duration::from_millis(20));
        let _held = limiter.acquire().await.unwrap();
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, OracleError::RateLimited { .. }));
    }

    #[test]
    fn provider_errors_map_to_taxonomy() {
        assert!(matches!(
            classify_provider_error("HTTP 429 Too Many Requests"),
            OracleError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_provider_error("401 Unauthorized: invalid api key"),
            OracleError::Auth { .. }
        ));
        assert!(matches!(
            classify_provider_error("connection reset by peer"),
            OracleError::Transport { .. }
        ));
    }

    #[test]
    fn build_options_carries_config() {
        let opts = build_options(0.0, 4096);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(4096));
    }
}
