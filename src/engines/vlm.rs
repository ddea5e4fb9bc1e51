//! OCR through a vision LLM.
//!
//! The staged image is sent as-is: its data URL already holds the base64
//! payload and mime type the provider wants, so no re-encoding happens here.
//!
//! ## Retry Strategy
//!
//! Provider calls that fail are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base and 3 retries the
//! waits are 500 ms → 1 s → 2 s.

use super::{OcrEngine, OcrOutput};
use crate::config::OcrConfig;
use crate::error::DocDeskError;
use crate::progress::ProcessingProgressCallback;
use crate::prompts::{language_hint, DEFAULT_OCR_PROMPT};
use crate::stage::payload::split_data_url;
use crate::stage::record::StagedFile;
use crate::tools::ToolId;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// [`OcrEngine`] backed by an `edgequake-llm` vision provider.
pub struct VlmOcrEngine {
    provider: Arc<dyn LLMProvider>,
    config: OcrConfig,
}

impl VlmOcrEngine {
    pub fn new(provider: Arc<dyn LLMProvider>, config: OcrConfig) -> Self {
        Self { provider, config }
    }

    /// Build an engine, resolving the provider from `config` and the environment.
    pub fn from_config(config: OcrConfig) -> Result<Self, DocDeskError> {
        let provider = resolve_provider(&config)?;
        Ok(Self::new(provider, config))
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DocDeskError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocDeskError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a pre-built provider (`config.provider`);
/// 2. a named provider plus optional model (`config.provider_name`);
/// 3. the `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` pair, when both are set;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &OcrConfig) -> Result<Arc<dyn LLMProvider>, DocDeskError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DocDeskError::ProviderNotConfigured {
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

fn build_options(config: &OcrConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn build_messages(system_prompt: &str, language: &str, image: ImageData) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::system(language_hint(language)),
        ChatMessage::user_with_images("", vec![image]),
    ]
}

/// Delay before retry `attempt` (1-based).
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Progress to report when attempt `attempt` (0-based) starts: 20..80.
fn attempt_progress(attempt: u32, max_retries: u32) -> u8 {
    let span = 60 * attempt / (max_retries + 1);
    (20 + span).min(80) as u8
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\n(.*?)\n?```\s*$").unwrap());

/// Trim the transcription and drop a fence wrapped around all of it.
fn clean_transcription(raw: &str) -> String {
    let trimmed = raw.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl OcrEngine for VlmOcrEngine {
    fn name(&self) -> &str {
        "vlm"
    }

    async fn recognize(
        &self,
        image: &StagedFile,
        language: &str,
        progress: &dyn ProcessingProgressCallback,
    ) -> Result<OcrOutput, DocDeskError> {
        let start = Instant::now();
        progress.on_progress(5);

        let (mime, b64) = split_data_url(&image.payload)?;
        if !mime.starts_with("image/") {
            return Err(DocDeskError::TransformationFailed {
                tool: ToolId::Ocr,
                detail: format!("'{}' is not an image ({mime})", image.name),
            });
        }

        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_OCR_PROMPT);
        let image_data = ImageData::new(b64.to_string(), mime).with_detail("high");
        let messages = build_messages(system_prompt, language, image_data);
        let options = build_options(&self.config);

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay_ms(self.config.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    image.name, attempt, self.config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            progress.on_progress(attempt_progress(attempt, self.config.max_retries));

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    let duration = start.elapsed();
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        image.name, response.prompt_tokens, response.completion_tokens, duration
                    );
                    let text = clean_transcription(&response.content);
                    info!("Recognised {} chars in {}", text.len(), image.name);
                    progress.on_progress(95);
                    return Ok(OcrOutput {
                        text,
                        input_tokens: response.prompt_tokens,
                        output_tokens: response.completion_tokens,
                        duration_ms: duration.as_millis() as u64,
                        retries: attempt,
                    });
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("{}: attempt {} failed: {}", image.name, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(DocDeskError::TransformationFailed {
            tool: ToolId::Ocr,
            detail: format!(
                "{} (after {} retries)",
                last_err.unwrap_or_else(|| "Unknown error".to_string()),
                self.config.max_retries
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let config = OcrConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn message_layout() {
        let msgs = build_messages("sys", "eng", ImageData::new("AAAA".to_string(), "image/png"));
        assert_eq!(msgs.len(), 3);
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay_ms(500, 1), 500);
        assert_eq!(backoff_delay_ms(500, 2), 1000);
        assert_eq!(backoff_delay_ms(500, 3), 2000);
        assert_eq!(backoff_delay_ms(u64::MAX, 40), u64::MAX);
    }

    #[test]
    fn attempt_progress_stays_in_band() {
        assert_eq!(attempt_progress(0, 3), 20);
        assert_eq!(attempt_progress(3, 3), 65);
        assert_eq!(attempt_progress(0, 0), 20);
        assert!((0..=10).all(|a| attempt_progress(a, 10) <= 80));
    }

    #[test]
    fn strips_wrapping_fences() {
        assert_eq!(clean_transcription("```\nHello\nWorld\n```"), "Hello\nWorld");
        assert_eq!(clean_transcription("```text\nInvoice 42\n```  "), "Invoice 42");
        assert_eq!(clean_transcription("  plain text \n"), "plain text");
        assert_eq!(
            clean_transcription("a\n```\ncode\n```\nb"),
            "a\n```\ncode\n```\nb"
        );
    }
}
