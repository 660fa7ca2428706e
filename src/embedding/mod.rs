//! 임베딩 모듈 - 텍스트 벡터화
//!
//! - `GeminiEmbedding`: Google Gemini API (원격)
//! - `HashEmbedding`: FNV-1a 특징 해싱 (로컬, API 키 불필요)
//!
//! ## 사용법
//! ```rust,ignore
//! let settings = Settings::from_env()?;
//! let embedder = create_embedder(&settings)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

mod gemini;
mod hash;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::{EmbeddingBackend, Settings};

pub use gemini::{GeminiEmbedding, SUPPORTED_DIMENSIONS};
pub use hash::HashEmbedding;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 같은 입력에는 항상 같은 길이(`dimension()`)의 벡터를 반환해야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 검색 질의 임베딩 (기본 구현: `embed`와 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match settings.embedding_provider {
        EmbeddingBackend::Gemini => {
            let api_key = settings.gemini_api_key.clone().context(
                "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set.\n\
                 Set: export GEMINI_API_KEY=your-api-key\n\
                 Or use the local embedder: export EMBEDDING_PROVIDER=hash",
            )?;
            Arc::new(GeminiEmbedding::new(
                api_key,
                settings.embedding_dimension,
                settings.retry_policy(),
            )?)
        }
        EmbeddingBackend::Hash => Arc::new(HashEmbedding::new(settings.embedding_dimension)?),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
