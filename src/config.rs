//! 설정 - 환경변수 (+ `.env`) 기반
//!
//! 모든 값에 기본값이 있으며, 숫자 형식이 잘못되면 시작 단계에서 에러를 반환합니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::retry::RetryPolicy;

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL_NAME: &str = "llama-3.3-70b-versatile";

/// 임베딩 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Google Gemini API
    Gemini,
    /// 로컬 특징 해싱
    Hash,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "hash" => Ok(Self::Hash),
            other => anyhow::bail!(
                "Unknown EMBEDDING_PROVIDER: {} (expected gemini or hash)",
                other
            ),
        }
    }
}

impl std::fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Hash => write!(f, "hash"),
        }
    }
}

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct Settings {
    /// 데이터 디렉토리
    pub data_dir: PathBuf,
    /// 인덱스 저장 디렉토리
    pub vectorstore_path: PathBuf,

    // 생성 모델
    pub groq_api_key: Option<String>,
    pub groq_base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,

    // 검색 / 청킹
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    // 임베딩
    pub embedding_provider: EmbeddingBackend,
    pub embedding_dimension: usize,
    pub gemini_api_key: Option<String>,

    // 요청 정책
    pub request_timeout: Duration,
    pub max_retries: u32,

    pub log_level: String,
}

impl Settings {
    /// `.env` 파일을 읽은 뒤 프로세스 환경변수에서 로드
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수에서 로드
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match get("DOCCHAT_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };
        let vectorstore_path = get("VECTORSTORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("vectorstore"));

        let groq_base_url =
            get("GROQ_BASE_URL").unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string());
        url::Url::parse(&groq_base_url)
            .with_context(|| format!("Invalid GROQ_BASE_URL: {}", groq_base_url))?;

        // GEMINI_API_KEY > GOOGLE_AI_API_KEY
        let gemini_api_key = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_AI_API_KEY"));

        let embedding_provider = match get("EMBEDDING_PROVIDER") {
            Some(value) => value.parse::<EmbeddingBackend>()?,
            None if gemini_api_key.is_some() => EmbeddingBackend::Gemini,
            None => EmbeddingBackend::Hash,
        };

        let settings = Self {
            data_dir,
            vectorstore_path,
            groq_api_key: get("GROQ_API_KEY"),
            groq_base_url,
            model_name: get("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            temperature: parse_or(&get, "TEMPERATURE", 0.7)?,
            max_tokens: parse_or(&get, "MAX_TOKENS", 2048)?,
            top_k: parse_or(&get, "TOP_K_RESULTS", 1)?,
            chunk_size: parse_or(&get, "CHUNK_SIZE", 1000)?,
            chunk_overlap: parse_or(&get, "CHUNK_OVERLAP", 200)?,
            embedding_provider,
            embedding_dimension: parse_or(&get, "EMBEDDING_DIMENSION", 768)?,
            gemini_api_key,
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 120)?),
            max_retries: parse_or(&get, "MAX_RETRIES", 0)?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("CHUNK_SIZE must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            anyhow::bail!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if self.embedding_dimension == 0 {
            anyhow::bail!("EMBEDDING_DIMENSION must be > 0");
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be > 0");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!("TEMPERATURE must be between 0.0 and 2.0, got {}", self.temperature);
        }
        Ok(())
    }

    /// HTTP 협력자용 재시도 정책
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    pub fn has_groq_key(&self) -> bool {
        self.groq_api_key.is_some()
    }

    pub fn has_gemini_key(&self) -> bool {
        self.gemini_api_key.is_some()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}={:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

/// 기본 데이터 디렉토리
///
/// - Windows: `%LOCALAPPDATA%\.docchat`
/// - macOS: `~/Library/Application Support/.docchat`
/// - Linux: `~/.local/share/.docchat`
pub fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("Failed to get local data directory")?;
    Ok(base.join(".docchat"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("DOCCHAT_DATA_DIR".to_string())
            .or_insert_with(|| "/tmp/docchat-test".to_string());
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.vectorstore_path, PathBuf::from("/tmp/docchat-test/vectorstore"));
        assert_eq!(s.groq_base_url, DEFAULT_GROQ_BASE_URL);
        assert_eq!(s.model_name, DEFAULT_MODEL_NAME);
        assert_eq!(s.top_k, 1);
        assert_eq!(s.chunk_size, 1000);
        assert_eq!(s.chunk_overlap, 200);
        assert_eq!(s.embedding_provider, EmbeddingBackend::Hash);
        assert_eq!(s.embedding_dimension, 768);
        assert_eq!(s.request_timeout, Duration::from_secs(120));
        assert_eq!(s.retry_policy(), RetryPolicy::none());
        assert_eq!(s.log_level, "info");
        assert!(!s.has_groq_key());
    }

    #[test]
    fn test_gemini_key_selects_gemini() {
        let s = settings(&[("GOOGLE_AI_API_KEY", "k")]).unwrap();
        assert_eq!(s.embedding_provider, EmbeddingBackend::Gemini);
        assert_eq!(s.gemini_api_key.as_deref(), Some("k"));

        let s = settings(&[("GEMINI_API_KEY", "a"), ("GOOGLE_AI_API_KEY", "b")]).unwrap();
        assert_eq!(s.gemini_api_key.as_deref(), Some("a"));

        let s = settings(&[("GEMINI_API_KEY", "a"), ("EMBEDDING_PROVIDER", "hash")]).unwrap();
        assert_eq!(s.embedding_provider, EmbeddingBackend::Hash);
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("TOP_K_RESULTS", "4"),
            ("TEMPERATURE", "0.2"),
            ("MAX_RETRIES", "3"),
            ("VECTORSTORE_PATH", "/data/index"),
            ("GROQ_API_KEY", "gsk"),
        ])
        .unwrap();
        assert_eq!(s.top_k, 4);
        assert!((s.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(s.retry_policy().max_retries, 3);
        assert_eq!(s.vectorstore_path, PathBuf::from("/data/index"));
        assert!(s.has_groq_key());
    }

    #[test]
    fn test_invalid_values() {
        assert!(settings(&[("TOP_K_RESULTS", "many")]).is_err());
        assert!(settings(&[("CHUNK_SIZE", "100"), ("CHUNK_OVERLAP", "100")]).is_err());
        assert!(settings(&[("GROQ_BASE_URL", "not a url")]).is_err());
        assert!(settings(&[("EMBEDDING_PROVIDER", "openai")]).is_err());
        assert!(settings(&[("REQUEST_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let s = settings(&[("MODEL_NAME", "  "), ("GROQ_API_KEY", "")]).unwrap();
        assert_eq!(s.model_name, DEFAULT_MODEL_NAME);
        assert!(s.groq_api_key.is_none());
    }
}
