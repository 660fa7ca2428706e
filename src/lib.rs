//! docchat - 로컬 문서 기반 대화형 RAG
//!
//! 정확한 코사인 검색 벡터 인덱스와 세션별 대화 기록을 결합해
//! 후속 질문까지 이해하는 질의 응답 엔진입니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod knowledge;
pub mod rag;
pub mod retry;

// Re-exports
pub use config::Settings;
pub use conversation::{ConversationSession, QueryContextualizer, SessionRegistry, Turn};
pub use embedding::{create_embedder, EmbeddingProvider, GeminiEmbedding, HashEmbedding};
pub use error::{RagError, RagResult};
pub use generation::{ChatCompletionsGenerator, Generator};
pub use knowledge::{Chunk, ChunkStore, ScoredChunk, VectorIndex};
pub use rag::{
    IngestReport, Ingestor, Orchestrator, OrchestratorConfig, QueryRequest, QueryResponse,
};
