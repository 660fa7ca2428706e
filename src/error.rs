//! 에러 타입 - 검색/대화 엔진의 에러 분류
//!
//! 코어(인덱스, 세션, 오케스트레이터)는 `RagError`를 반환하고,
//! CLI 등 바깥 계층은 `anyhow::Result`로 감싸서 사용합니다.

use std::time::Duration;

use thiserror::Error;

/// 코어 결과 타입
pub type RagResult<T> = std::result::Result<T, RagError>;

/// 검색/대화 엔진 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 청크가 하나도 없는 입력으로 인덱스 생성/추가 시도
    #[error("No chunks to index: input is empty")]
    EmptyInput,

    /// 문서가 아직 수집되지 않음
    #[error("Vector store not initialized. Please ingest documents first.")]
    NotInitialized,

    /// 알 수 없는 세션 ID
    #[error("Session not found: {0}")]
    NotFound(String),

    /// 임베딩 서비스 호출 실패
    #[error("Embedding service error: {0}")]
    Embedding(String),

    /// 생성 모델 호출 실패
    #[error("Generation service error: {0}")]
    Generation(String),

    /// 요청 타임아웃
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// 인덱스 저장 실패 (이전 저장본은 유지됨)
    #[error("Failed to persist index: {0}")]
    Persistence(String),

    /// 임베딩 차원 불일치
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 중복 청크 ID
    #[error("Duplicate chunk id: {0}")]
    DuplicateChunkId(String),

    /// 등록된 로더가 없는 파일 형식
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    /// 단일 문서 로드 실패
    #[error("Failed to load document: {0}")]
    Load(String),
}

impl RagError {
    /// 임베딩 에러로 변환
    pub fn embedding(err: impl std::fmt::Display) -> Self {
        Self::Embedding(err.to_string())
    }

    /// 생성 에러로 변환
    pub fn generation(err: impl std::fmt::Display) -> Self {
        Self::Generation(err.to_string())
    }

    /// 저장 에러로 변환
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RagError::NotFound("abc".to_string()).to_string(),
            "Session not found: abc"
        );
        assert_eq!(
            RagError::DimensionMismatch { expected: 3, actual: 4 }.to_string(),
            "Embedding dimension mismatch: expected 3, got 4"
        );
        assert!(RagError::embedding("boom").to_string().contains("boom"));
    }
}
