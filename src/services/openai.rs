use crate::error::{ServiceError, ServiceResult};
use crate::language::Language;
use crate::retry::{with_retry_if, RetryPolicy};
use crate::services::{JudgmentService, TranslationService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SERVICE: &str = "OpenAI";

/// OpenAI Chat Completion request
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

/// Check if a model is a reasoning model that doesn't support temperature
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// System prompt that keeps the model a strict translation engine.
fn build_translation_system_prompt(target: Language) -> &'static str {
    match target {
        Language::Chinese => {
            "你是一个严格的翻译引擎。只输出译文本身，不要解释、不要引号、不要添加多余词语。\
             保留形如 ⟦E0⟧ 和 __GLS_xxx__ 的占位符原样不动。\
             逐行翻译，输出的行数必须与原文相同。\
             如果确实无法翻译，请只输出一个斜杠\"/\"。"
        }
        Language::English => {
            "You are a strict translation engine. Output only the translated text with no quotes or extra words. \
             Keep placeholders such as ⟦E0⟧ and __GLS_xxx__ exactly as they are. \
             Translate line by line and keep the same number of lines as the input. \
             If translation is impossible, output exactly a single slash (/)."
        }
    }
}

fn build_translation_user_prompt(text: &str, source: Option<Language>, target: Language) -> String {
    let source_name = source.map(|l| l.prompt_name()).unwrap_or("auto-detect");
    format!(
        "Source language: {}\nTarget language: {}\nText between <text> tags:\n<text>{}</text>",
        source_name,
        target.prompt_name(),
        text
    )
}

/// Chat-completions client serving both translation and judgment calls.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    translation_model: String,
    judge_model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        translation_model: impl Into<String>,
        judge_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
            translation_model: translation_model.into(),
            judge_model: judge_model.into(),
            timeout,
        }
    }

    fn build_request(&self, model: &str, system: &str, user: &str, temperature: f32) -> ChatRequest {
        // Reasoning models don't support temperature - use reasoning_effort instead
        let is_reasoning = is_reasoning_model(model);
        ChatRequest {
            model: model.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: Some(system.to_string()),
                },
                Message {
                    role: "user".to_string(),
                    content: Some(user.to_string()),
                },
            ],
            temperature: if is_reasoning { None } else { Some(temperature) },
            reasoning_effort: if is_reasoning {
                Some("low".to_string())
            } else {
                None
            },
        }
    }

    async fn complete(&self, request: &ChatRequest, policy: &RetryPolicy, operation: &str) -> ServiceResult<String> {
        with_retry_if(
            policy,
            operation,
            || async {
                match tokio::time::timeout(self.timeout, self.send_once(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ServiceError::Timeout {
                        service: SERVICE,
                        elapsed: self.timeout,
                    }),
                }
            },
            ServiceError::is_retryable,
        )
        .await
    }

    async fn send_once(&self, request: &ChatRequest) -> ServiceResult<String> {
        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|source| ServiceError::Transport {
                service: SERVICE,
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(ServiceError::Status {
                service: SERVICE,
                status,
                body,
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| ServiceError::Decode {
                service: SERVICE,
                message: e.to_string(),
            })?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ServiceError::Empty { service: SERVICE });
        }
        Ok(content)
    }
}

#[async_trait]
impl TranslationService for OpenAiClient {
    async fn translate(
        &self,
        text: &str,
        source: Option<Language>,
        target: Language,
    ) -> ServiceResult<String> {
        let request = self.build_request(
            &self.translation_model,
            build_translation_system_prompt(target),
            &build_translation_user_prompt(text, source, target),
            0.2,
        );
        self.complete(
            &request,
            &RetryPolicy::translation(),
            &format!("Translation to {}", target.prompt_name()),
        )
        .await
    }
}

#[async_trait]
impl JudgmentService for OpenAiClient {
    async fn judge(&self, system_instruction: &str, user_prompt: &str) -> ServiceResult<String> {
        let request = self.build_request(&self.judge_model, system_instruction, user_prompt, 0.0);
        self.complete(&request, &RetryPolicy::judgment(), "Judgment").await
    }
}
