//! Knowledge 모듈 - 청크 저장소와 벡터 인덱스
//!
//! - Vector: 정확(flat) 코사인 검색, copy-on-write 스냅샷
//! - Store: SQLite 데이터 파일 + 마커 파일로 원자적 저장
//! - Chunker: 재귀 문자 분할 (문단 → 줄 → 단어 → 문자)

mod chunker;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    ChunkConfig, Chunker, RecursiveChunker,
    default_chunker, recursive_chunker,
};
pub use store::{ChunkStore, PersistedIndex, MARKER_FILE};
pub use vector::{
    Chunk, IndexStats, Metadata, ScoredChunk, VectorIndex,
    cosine_similarity, SOURCE_KEY,
};
