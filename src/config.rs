//! Configuration types for staging and OCR.
//!
//! Staging behaviour is controlled through [`StageConfig`] and OCR behaviour
//! through [`OcrConfig`], each built via its builder. Every knob has a
//! documented default, so callers set only what they care about.

use crate::error::DocDeskError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default budget for a single payload in the size-limited facility: 4 MiB.
pub const DEFAULT_STORAGE_BUDGET: usize = 4 * 1024 * 1024;

/// Default per-file upload ceiling: 10 MiB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Configuration for the staged file store and upload step.
///
/// # Example
/// ```rust
/// use docdesk::StageConfig;
///
/// let config = StageConfig::builder()
///     .storage_budget_bytes(2 * 1024 * 1024)
///     .max_edge(1600)
///     .build()
///     .unwrap();
/// assert_eq!(config.compression.max_edge, 1600);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Largest data URL placed in the size-limited facility. Default: 4 MiB.
    ///
    /// Kept below the facility's real capacity (5 MiB for session storage)
    /// so the manifest and option keys still fit next to a maximal payload.
    pub storage_budget_bytes: usize,

    /// Per-file ceiling enforced by the upload step. Default: 10 MiB.
    ///
    /// `save` itself never rejects a file for size; anything too large for
    /// the facility ends up in the in-process fallback.
    pub max_file_bytes: u64,

    /// Key prefix in the size-limited facility. Default: `docdesk`.
    pub namespace: String,

    /// Timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Image compression pass parameters.
    pub compression: CompressionSettings,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            storage_budget_bytes: DEFAULT_STORAGE_BUDGET,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            namespace: "docdesk".to_string(),
            download_timeout_secs: 120,
            compression: CompressionSettings::default(),
        }
    }
}

impl StageConfig {
    pub fn builder() -> StageConfigBuilder {
        StageConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Parameters of the image compression pass.
///
/// Quality is an integer percentage so the descending sequence is exact:
/// 90, 80, …, 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Longest edge after downscaling, in pixels. Default: 2048.
    pub max_edge: u32,
    /// First JPEG quality tried. Default: 90.
    pub initial_quality: u8,
    /// Lowest JPEG quality tried. Default: 10.
    pub min_quality: u8,
    /// Quality decrement between attempts. Default: 10.
    pub quality_step: u8,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            max_edge: 2048,
            initial_quality: 90,
            min_quality: 10,
            quality_step: 10,
        }
    }
}

/// Builder for [`StageConfig`].
#[derive(Debug)]
pub struct StageConfigBuilder {
    config: StageConfig,
}

impl StageConfigBuilder {
    pub fn storage_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.storage_budget_bytes = bytes;
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.config.namespace = ns.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_edge(mut self, px: u32) -> Self {
        self.config.compression.max_edge = px;
        self
    }

    pub fn quality_range(mut self, initial: u8, min: u8, step: u8) -> Self {
        self.config.compression.initial_quality = initial;
        self.config.compression.min_quality = min;
        self.config.compression.quality_step = step;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StageConfig, DocDeskError> {
        let c = &self.config;
        if c.storage_budget_bytes == 0 {
            return Err(DocDeskError::InvalidConfig(
                "storage budget must be > 0".into(),
            ));
        }
        if c.namespace.is_empty() || c.namespace.contains(char::is_whitespace) {
            return Err(DocDeskError::InvalidConfig(format!(
                "namespace must be non-empty without whitespace, got '{}'",
                c.namespace
            )));
        }
        let q = &c.compression;
        if q.max_edge == 0 {
            return Err(DocDeskError::InvalidConfig("max edge must be > 0".into()));
        }
        if q.quality_step == 0 {
            return Err(DocDeskError::InvalidConfig(
                "quality step must be ≥ 1".into(),
            ));
        }
        if q.min_quality == 0 || q.min_quality > q.initial_quality || q.initial_quality > 100 {
            return Err(DocDeskError::InvalidConfig(format!(
                "quality range must satisfy 1 ≤ min ≤ initial ≤ 100, got {}..{}",
                q.min_quality, q.initial_quality
            )));
        }
        Ok(self.config)
    }
}

/// Configuration for the vision-LLM OCR engine.
#[derive(Clone)]
pub struct OcrConfig {
    /// LLM model identifier. If None, uses `gpt-4.1-nano`.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Recognition language hint passed in the prompt. Default: `eng`.
    pub language: String,

    /// Sampling temperature. Default: 0.0 (transcription, not generation).
    pub temperature: f32,

    /// Maximum tokens generated for one image. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts on a failed provider call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses the built-in transcription prompt.
    pub system_prompt: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            language: "eng".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("language", &self.language)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl OcrConfig {
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
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

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
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

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn build(self) -> Result<OcrConfig, DocDeskError> {
        if self.config.max_tokens == 0 {
            return Err(DocDeskError::InvalidConfig("max tokens must be ≥ 1".into()));
        }
        if self.config.language.trim().is_empty() {
            return Err(DocDeskError::InvalidConfig("language must not be empty".into()));
        }
        Ok(self.config)
    }
}
