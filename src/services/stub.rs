//! Deterministic stand-ins for the network services.
//!
//! Used by tests, by the preview binary, and by the server when no API key is
//! configured (every call then fails as `Unconfigured`, which the pipeline
//! turns into its usual degrade path).

use crate::error::{ServiceError, ServiceResult};
use crate::language::Language;
use crate::services::{JudgmentService, TranslationService};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

type TranslateFn = dyn Fn(&str, Option<Language>, Language) -> ServiceResult<String> + Send + Sync;
type JudgeFn = dyn Fn(&str, &str) -> ServiceResult<String> + Send + Sync;

/// Translator whose behaviour is a plain function of its input.
pub struct StubTranslator {
    respond: Box<TranslateFn>,
    calls: Mutex<Vec<String>>,
}

impl StubTranslator {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, Option<Language>, Language) -> ServiceResult<String> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the input unchanged.
    pub fn echo() -> Self {
        Self::new(|text, _, _| Ok(text.to_string()))
    }

    /// Looks the whole input up in a table; unknown inputs are echoed.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let table: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(move |text, _, _| Ok(table.get(text).cloned().unwrap_or_else(|| text.to_string())))
    }

    /// Every call fails as if the service were not configured.
    pub fn unavailable() -> Self {
        Self::new(|_, _, _| Err(ServiceError::Unconfigured("translation service")))
    }

    /// Inputs seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TranslationService for StubTranslator {
    async fn translate(
        &self,
        text: &str,
        source: Option<Language>,
        target: Language,
    ) -> ServiceResult<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }
        (self.respond)(text, source, target)
    }
}

/// Judge whose answer is a plain function of its prompts.
pub struct StubJudge {
    respond: Box<JudgeFn>,
    calls: Mutex<Vec<String>>,
}

impl StubJudge {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> ServiceResult<String> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answers `reply`.
    pub fn always(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    pub fn unavailable() -> Self {
        Self::new(|_, _| Err(ServiceError::Unconfigured("judgment service")))
    }

    /// User prompts seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl JudgmentService for StubJudge {
    async fn judge(&self, system_instruction: &str, user_prompt: &str) -> ServiceResult<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(user_prompt.to_string());
        }
        (self.respond)(system_instruction, user_prompt)
    }
}
