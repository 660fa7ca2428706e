//! Vector Index - 정확(flat) 최근접 이웃 검색
//!
//! 청크를 삽입 순서대로 보관하고 코사인 유사도로 전수 검색합니다.
//!
//! 동시성: 읽기(`search`)는 `Arc<IndexSnapshot>`을 복제한 뒤 락 없이 수행되고,
//! 쓰기(`create`, `add_chunks`, `persist`)는 writer 락으로 직렬화됩니다.
//! 쓰기는 새 스냅샷을 옆에서 만든 뒤 포인터만 교체합니다 (copy-on-write).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, RagResult};

use super::store::{ChunkStore, PersistedIndex};

/// 출처 메타데이터 (문자열 → 문자열)
pub type Metadata = BTreeMap<String, String>;

/// 메타데이터에서 출처를 가리키는 키
pub const SOURCE_KEY: &str = "source";

// ============================================================================
// Types
// ============================================================================

/// 인덱스에 저장되는 불변 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 인덱스 수명 동안 고정된 ID
    pub id: String,
    /// 청크 텍스트
    pub text: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
    /// 출처 메타데이터 (`source` 포함)
    pub metadata: Metadata,
}

impl Chunk {
    /// 새 ID(UUID v4)로 청크 생성
    pub fn new(text: impl Into<String>, embedding: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            embedding,
            metadata,
        }
    }

    /// 인용용 출처 (없으면 "Unknown")
    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .map(String::as_str)
            .unwrap_or("Unknown")
    }
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f32,
}

/// 인덱스 통계
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub dimension: Option<usize>,
    pub source_count: usize,
    pub path: Option<PathBuf>,
}

// ============================================================================
// IndexSnapshot
// ============================================================================

/// 특정 시점의 인덱스 내용 (불변)
#[derive(Debug, Default)]
struct IndexSnapshot {
    chunks: Vec<Arc<Chunk>>,
    ids: HashSet<String>,
    dimension: Option<usize>,
}

impl IndexSnapshot {
    fn empty(dimension: Option<usize>) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// 현재 스냅샷에 청크를 덧붙인 새 스냅샷
    ///
    /// 배치 전체를 검증하며, 하나라도 실패하면 아무것도 반영되지 않습니다.
    fn extended(&self, chunks: Vec<Chunk>) -> RagResult<Self> {
        let mut next = Self {
            chunks: Vec::with_capacity(self.chunks.len() + chunks.len()),
            ids: self.ids.clone(),
            dimension: self.dimension,
        };
        next.chunks.extend(self.chunks.iter().cloned());

        for chunk in chunks {
            let expected = *next.dimension.get_or_insert(chunk.embedding.len());
            if chunk.embedding.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: chunk.embedding.len(),
                });
            }

            if !next.ids.insert(chunk.id.clone()) {
                return Err(RagError::DuplicateChunkId(chunk.id));
            }

            next.chunks.push(Arc::new(chunk));
        }

        Ok(next)
    }
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 정확 검색 벡터 인덱스
///
/// 저장 디렉토리가 지정되면 `persist()`로 디스크에 원자적으로 저장하고,
/// `open()` 시 이전 저장본을 읽어옵니다.
pub struct VectorIndex {
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
    store: Option<ChunkStore>,
    /// 임베딩 프로바이더가 정한 차원 (None이면 첫 청크가 결정)
    configured_dimension: Option<usize>,
}

impl VectorIndex {
    /// 디스크 저장 없는 인덱스
    pub fn in_memory(dimension: Option<usize>) -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot::empty(dimension))),
            writer: Mutex::new(()),
            store: None,
            configured_dimension: dimension,
        }
    }

    /// 저장 디렉토리에서 인덱스 열기
    ///
    /// 저장본이 없거나 손상되었으면 빈 인덱스로 시작합니다 (에러 아님).
    /// `dimension`이 지정되었는데 저장본의 차원이 다르면 역시 빈 인덱스로 시작합니다.
    pub fn open(dir: &Path, dimension: Option<usize>) -> Self {
        let store = ChunkStore::new(dir);

        let snapshot = match store.load() {
            Ok(Some(persisted)) => Self::snapshot_from_persisted(persisted, dimension, dir),
            Ok(None) => {
                tracing::info!("No persisted index at {:?}, starting empty", dir);
                IndexSnapshot::empty(dimension)
            }
            Err(e) => {
                tracing::warn!(
                    "Persisted index at {:?} is unreadable, starting empty: {:#}",
                    dir,
                    e
                );
                IndexSnapshot::empty(dimension)
            }
        };

        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            store: Some(store),
            configured_dimension: dimension,
        }
    }

    fn snapshot_from_persisted(
        persisted: PersistedIndex,
        dimension: Option<usize>,
        dir: &Path,
    ) -> IndexSnapshot {
        if let Some(expected) = dimension {
            if persisted.dimension != expected {
                tracing::warn!(
                    "Persisted index at {:?} has dimension {}, expected {}; starting empty",
                    dir,
                    persisted.dimension,
                    expected
                );
                return IndexSnapshot::empty(dimension);
            }
        }

        let base = IndexSnapshot::empty(Some(persisted.dimension));
        match base.extended(persisted.chunks) {
            Ok(snapshot) => {
                tracing::info!(
                    "Loaded persisted index from {:?} ({} chunks, saved {})",
                    dir,
                    snapshot.chunks.len(),
                    persisted.persisted_at.to_rfc3339()
                );
                snapshot
            }
            Err(e) => {
                tracing::warn!(
                    "Persisted index at {:?} is inconsistent, starting empty: {}",
                    dir,
                    e
                );
                IndexSnapshot::empty(dimension)
            }
        }
    }

    /// 현재 스냅샷 (짧은 읽기 락)
    fn snapshot(&self) -> Arc<IndexSnapshot> {
        // 스냅샷 교체는 포인터 대입 한 번이라 poison 상태여도 내용은 항상 일관됨
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, next: IndexSnapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// 새 인덱스 생성 (기존 내용 대체)
    pub fn create(&self, chunks: Vec<Chunk>) -> RagResult<usize> {
        if chunks.is_empty() {
            return Err(RagError::EmptyInput);
        }

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let next = IndexSnapshot::empty(self.configured_dimension).extended(chunks)?;
        let count = next.chunks.len();
        self.swap(next);

        tracing::info!("Created index with {} chunks", count);
        Ok(count)
    }

    /// 청크 추가 (인덱스가 비어 있으면 `create`와 동일)
    ///
    /// # Returns
    /// 추가된 청크 수
    pub fn add_chunks(&self, chunks: Vec<Chunk>) -> RagResult<usize> {
        if chunks.is_empty() {
            return Err(RagError::EmptyInput);
        }

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.snapshot();

        // 빈 인덱스에 대한 추가는 곧 생성
        let added = chunks.len();
        let next = base.extended(chunks)?;
        let total = next.chunks.len();
        self.swap(next);

        if total == added {
            tracing::info!("Created index with {} chunks", total);
        } else {
            tracing::info!("Added {} chunks to index (total={})", added, total);
        }
        Ok(added)
    }

    /// 코사인 유사도 상위 `k`개 검색
    ///
    /// 점수 내림차순, 동점이면 먼저 삽입된 청크가 앞섭니다.
    /// 빈 인덱스는 빈 결과를 반환합니다.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Vec<ScoredChunk> {
        let snapshot = self.snapshot();
        if k == 0 || snapshot.chunks.is_empty() {
            return vec![];
        }

        let mut scored: Vec<(usize, f32)> = snapshot
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, cosine_similarity(query_embedding, &chunk.embedding)))
            .collect();

        // cosine_similarity는 NaN을 반환하지 않으므로 partial_cmp가 전순서
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, similarity)| ScoredChunk {
                chunk: Arc::clone(&snapshot.chunks[i]),
                similarity,
            })
            .collect()
    }

    /// 현재 인덱스를 디스크에 원자적으로 저장
    ///
    /// 블로킹 I/O이므로 async 컨텍스트에서는 `spawn_blocking`으로 호출하세요.
    pub fn persist(&self) -> RagResult<()> {
        let Some(store) = &self.store else {
            tracing::debug!("In-memory index, nothing to persist");
            return Ok(());
        };

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.snapshot();
        let Some(dimension) = snapshot.dimension.filter(|_| !snapshot.chunks.is_empty()) else {
            tracing::warn!("No chunks to persist");
            return Ok(());
        };

        store.write(&snapshot.chunks, dimension).map_err(|e| {
            tracing::error!("Failed to persist index to {:?}: {:#}", store.dir(), e);
            RagError::persistence(format!("{:#}", e))
        })
    }

    /// 청크가 하나 이상 있는지
    pub fn is_initialized(&self) -> bool {
        !self.snapshot().chunks.is_empty()
    }

    /// 청크 수
    pub fn len(&self) -> usize {
        self.snapshot().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 인덱스 임베딩 차원 (아직 정해지지 않았으면 None)
    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().dimension
    }

    /// 저장 디렉토리
    pub fn path(&self) -> Option<&Path> {
        self.store.as_ref().map(|s| s.dir())
    }

    /// 인덱스 통계
    pub fn stats(&self) -> IndexStats {
        let snapshot = self.snapshot();
        let sources: HashSet<&str> = snapshot.chunks.iter().map(|c| c.source()).collect();

        IndexStats {
            chunk_count: snapshot.chunks.len(),
            dimension: snapshot.dimension,
            source_count: sources.len(),
            path: self.path().map(Path::to_path_buf),
        }
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 내적 / (두 벡터 노름의 곱). 결과는 -1.0 ~ 1.0 범위입니다.
/// 길이가 다르거나, 비어 있거나, 노름이 0이면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot_product / (norm_a * norm_b);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

// ============================================================================
// Tests
// ============================================================================
