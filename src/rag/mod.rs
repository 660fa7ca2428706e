//! RAG 모듈 - 문서 수집과 대화형 질의
//!
//! - `ingest`: 파일/폴더 → 청크 → 임베딩 → 인덱스
//! - `pipeline`: 세션 기록을 반영한 검색 증강 질의
//! - `prompt`: 프롬프트 템플릿
//! - `api`: 요청/응답 타입

pub mod api;
pub mod ingest;
pub mod pipeline;
pub mod prompt;

pub use api::{
    HistoryResponse, IngestResponse, QueryRequest, QueryResponse, Source, StatusResponse,
    SOURCE_PREVIEW_CHARS,
};
pub use ingest::{IngestReport, Ingestor, CHUNK_INDEX_KEY, DEFAULT_EMBED_CONCURRENCY};
pub use pipeline::{Orchestrator, OrchestratorConfig};
pub use prompt::{build_prompt, format_context, CONTEXT_SEPARATOR, NO_CONTEXT};
