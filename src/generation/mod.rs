//! 생성 모듈 - LLM 답변 생성
//!
//! OpenAI 호환 `/chat/completions` 엔드포인트(기본: Groq)를 호출합니다.
//! 전체 응답 모드만 사용하며, 코어는 최종 텍스트만 필요로 합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::retry::{is_retryable_status, AttemptError, RetryPolicy};

// ============================================================================
// Generator Trait
// ============================================================================

/// 텍스트 생성 트레이트
#[async_trait]
pub trait Generator: Send + Sync {
    /// 프롬프트로 답변 생성
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// ChatCompletionsGenerator
// ============================================================================

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// 생성 파라미터
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl GenerationConfig {
    /// 설정에서 생성 (GROQ_API_KEY 필수)
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.groq_api_key.clone().context(
            "GROQ_API_KEY not set.\n\
             Set: export GROQ_API_KEY=your-api-key\n\
             Get your API key at: https://console.groq.com/keys",
        )?;

        Ok(Self {
            base_url: settings.groq_base_url.clone(),
            api_key,
            model: settings.model_name.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            retry: settings.retry_policy(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI 호환 Chat Completions 클라이언트
#[derive(Debug, Clone)]
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    endpoint: String,
    config: GenerationConfig,
}

impl ChatCompletionsGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(GenerationConfig::from_settings(settings)?)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        }
    }

    async fn send_once(&self, body: &ChatRequest<'_>) -> std::result::Result<String, AttemptError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AttemptError::Retryable(anyhow::anyhow!("Failed to send chat request: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = anyhow::anyhow!("Chat completion error ({}): {}", status, text);
            return Err(if is_retryable_status(status) {
                AttemptError::Retryable(error)
            } else {
                AttemptError::Fatal(error)
            });
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|e| {
                AttemptError::Fatal(anyhow::anyhow!("Failed to parse chat response: {}", e))
            })?;

        payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| {
                AttemptError::Fatal(anyhow::anyhow!("Chat response contained no choices"))
            })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = self.request(prompt);
        let body = &body;

        let answer = self
            .config
            .retry
            .run("Chat request", move || async move { self.send_once(body).await })
            .await?;

        tracing::debug!("Generated {} chars with {}", answer.len(), self.config.model);
        Ok(answer)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> GenerationConfig {
        GenerationConfig {
            base_url: base_url.to_string(),
            api_key: "gsk_test".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            retry: RetryPolicy::none(),
        }
    }

    #[test]
    fn test_endpoint_join() {
        let generator =
            ChatCompletionsGenerator::new(config("https://api.groq.com/openai/v1/")).unwrap();
        assert_eq!(generator.endpoint(), "https://api.groq.com/openai/v1/chat/completions");
        assert_eq!(generator.name(), "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_request_body() {
        let generator = ChatCompletionsGenerator::new(config("http://localhost")).unwrap();
        let json = serde_json::to_value(generator.request("hello")).unwrap();
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["max_tokens"], 2048);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[
            {"index":0,"message":{"role":"assistant","content":"10am Monday"}}
        ]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("10am Monday"));
    }

    #[test]
    fn test_from_settings_requires_key() {
        let settings = Settings::from_lookup(|key| match key {
            "DOCCHAT_DATA_DIR" => Some("/tmp/docchat-test".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(GenerationConfig::from_settings(&settings).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_errors() {
        let generator = ChatCompletionsGenerator::new(config("http://127.0.0.1:9")).unwrap();
        let err = generator.generate("hi").await.unwrap_err();
        assert!(err.to_string().contains("Failed to send chat request"));
    }
}
