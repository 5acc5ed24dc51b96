//! External translation and judgment services.
//!
//! The pipeline only talks to these through the two capability traits, so a
//! deterministic stub can stand in for the network clients in tests and in
//! offline runs.

mod deepl;
mod openai;
mod stub;

pub use deepl::DeepLClient;
pub use openai::OpenAiClient;
pub use stub::{StubJudge, StubTranslator};

use crate::config::{Config, TranslationBackend};
use crate::error::ServiceResult;
use crate::language::Language;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Machine translation of a single text.
#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Translate `text` into `target`. `source` is `None` when the caller
    /// wants the service to auto-detect.
    async fn translate(
        &self,
        text: &str,
        source: Option<Language>,
        target: Language,
    ) -> ServiceResult<String>;
}

/// Free-form language-model judgment used for idiom and glossary decisions.
#[async_trait]
pub trait JudgmentService: Send + Sync {
    async fn judge(&self, system_instruction: &str, user_prompt: &str) -> ServiceResult<String>;
}

/// Build the translation and judgment services the configuration asks for.
///
/// Without credentials the unavailable stubs are used, so every message
/// degrades to the untranslatable marker instead of failing startup.
pub fn from_config(
    config: &Config,
    http: reqwest::Client,
) -> (Arc<dyn TranslationService>, Arc<dyn JudgmentService>) {
    let openai = config.openai_api_key.as_ref().map(|key| {
        Arc::new(OpenAiClient::new(
            http.clone(),
            &config.openai_api_url,
            key,
            &config.openai_model,
            &config.judge_model,
            config.external_call_timeout,
        ))
    });

    let judge: Arc<dyn JudgmentService> = match &openai {
        Some(client) => Arc::clone(client) as Arc<dyn JudgmentService>,
        None => {
            warn!("OPENAI_API_KEY not set, idiom and glossary judgments are disabled");
            Arc::new(StubJudge::unavailable())
        }
    };

    let translator: Arc<dyn TranslationService> = match (config.translation_backend, &openai) {
        (TranslationBackend::DeepL, _) => match &config.deepl_api_key {
            Some(key) => {
                info!("Translating with DeepL");
                Arc::new(DeepLClient::new(http, &config.deepl_api_url, key, config.external_call_timeout))
            }
            None => Arc::new(StubTranslator::unavailable()),
        },
        (TranslationBackend::OpenAi, Some(client)) => {
            info!("Translating with {}", config.openai_model);
            Arc::clone(client) as Arc<dyn TranslationService>
        }
        (TranslationBackend::OpenAi, None) => {
            warn!("No translation service configured, messages will not be translated");
            Arc::new(StubTranslator::unavailable())
        }
    };

    (translator, judge)
}
