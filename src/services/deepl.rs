use crate::error::{ServiceError, ServiceResult};
use crate::language::Language;
use crate::retry::{with_retry_if, RetryPolicy};
use crate::services::TranslationService;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const SERVICE: &str = "DeepL";

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

fn source_code(language: Language) -> &'static str {
    match language {
        Language::Chinese => "ZH",
        Language::English => "EN",
    }
}

fn target_code(language: Language) -> &'static str {
    match language {
        Language::Chinese => "ZH",
        Language::English => "EN-US",
    }
}

/// DeepL REST translation client.
#[derive(Debug, Clone)]
pub struct DeepLClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    timeout: Duration,
}

impl DeepLClient {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    async fn send_once(&self, params: &[(&str, &str)]) -> ServiceResult<String> {
        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .form(params)
            .send()
            .await
            .map_err(|source| ServiceError::Transport {
                service: SERVICE,
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: SERVICE,
                status,
                body,
            });
        }

        let parsed: DeepLResponse = response.json().await.map_err(|e| ServiceError::Decode {
            service: SERVICE,
            message: e.to_string(),
        })?;

        let text = parsed
            .translations
            .into_iter()
            .next()
            .map(|t| t.text.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ServiceError::Empty { service: SERVICE });
        }
        Ok(text)
    }
}

#[async_trait]
impl TranslationService for DeepLClient {
    async fn translate(
        &self,
        text: &str,
        source: Option<Language>,
        target: Language,
    ) -> ServiceResult<String> {
        let mut params = vec![("text", text), ("target_lang", target_code(target))];
        if let Some(source) = source {
            params.push(("source_lang", source_code(source)));
        }

        with_retry_if(
            &RetryPolicy::translation(),
            &format!("DeepL translation to {}", target.prompt_name()),
            || async {
                match tokio::time::timeout(self.timeout, self.send_once(&params)).await {
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
}
