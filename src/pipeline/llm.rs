//! Analysis engine: page images in, Markdown fragments out.
//!
//! The controller only sees the [`AnalysisEngine`] trait: an ordered list of
//! pages becomes a lazy, forward-only [`FragmentStream`]. Tests plug in
//! scripted engines; production uses [`LlmAnalysisEngine`], which sends one
//! vision request through `edgequake-llm` and replays the completion line by
//! line so partial sections reach the UI as they are parsed.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient. Exponential backoff
//! (`retry_backoff_ms * 2^attempt`) with 500 ms base and 3 retries waits
//! 500 ms → 1 s → 2 s before the scan is failed.

use crate::config::ScanConfig;
use crate::document::PageAsset;
use crate::error::ScanError;
use crate::pipeline::encode::page_image_data;
use crate::prompts::{analysis_prompt, DEFAULT_SYSTEM_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Ordered, finite stream of response fragments. An `Err` item ends the scan.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ScanError>> + Send>>;

/// Produces the Markdown analysis of a document's pages.
pub trait AnalysisEngine: Send + Sync {
    fn analyze(&self, pages: Vec<PageAsset>) -> FragmentStream;
}

/// [`AnalysisEngine`] backed by a vision-capable `edgequake-llm` provider.
#[derive(Debug, Clone)]
pub struct LlmAnalysisEngine {
    config: ScanConfig,
}

impl LlmAnalysisEngine {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }
}

impl AnalysisEngine for LlmAnalysisEngine {
    fn analyze(&self, pages: Vec<PageAsset>) -> FragmentStream {
        let config = self.config.clone();
        let response = async move {
            let provider = resolve_provider(&config)?;
            analyze_pages(&provider, &pages, &config).await
        };

        stream::once(response)
            .flat_map(|result| match result {
                Ok(text) => stream::iter(split_fragments(&text).into_iter().map(Ok)).boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }
}

/// Send every page in one request and return the completion text.
///
/// Message layout:
/// 1. System message: the scanner instruction (or the configured override)
/// 2. User message: the analysis prompt with all pages attached, in order
pub async fn analyze_pages(
    provider: &Arc<dyn LLMProvider>,
    pages: &[PageAsset],
    config: &ScanConfig,
) -> Result<String, ScanError> {
    let start = Instant::now();
    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);

    let images = pages.iter().map(page_image_data).collect();
    let prompt = analysis_prompt(pages.len());
    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_with_images(prompt.as_str(), images),
    ];
    let options = build_options(config);

    info!("Analyzing {} page(s)", pages.len());

    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Analysis: retry {}/{} after {}ms",
                attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "Analysis: {} input tokens, {} output tokens, {:?}",
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                return Ok(response.content);
            }
            Err(e) => {
                let err_msg = e.to_string();
                warn!("Analysis: attempt {} failed: {}", attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(ScanError::LlmApiError {
        message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Line-sized fragments; concatenating them restores `text` exactly.
fn split_fragments(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

fn build_options(config: &ScanConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ScanError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ScanError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model`,
///    defaulting to [`DEFAULT_MODEL`].
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **Auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &ScanConfig) -> Result<Arc<dyn LLMProvider>, ScanError> {
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

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ScanError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
