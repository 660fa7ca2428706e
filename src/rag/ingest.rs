//! 문서 수집 파이프라인
//!
//! collect → load → chunk → embed → add_chunks → persist
//!
//! 파일 하나의 로드 실패는 경고 후 건너뜁니다. 임베딩은 순서를 유지한 채
//! `buffered`로 동시 요청 수를 제한합니다.

use std::path::Path;
use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};

use crate::collector::{CollectorConfig, FileCollector};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::extractor::{LoadedDocument, LoaderRegistry};
use crate::knowledge::{Chunk, ChunkConfig, Chunker, Metadata, RecursiveChunker, VectorIndex};

use super::api::IngestResponse;

/// 청크별 순번 메타데이터 키 (문서 안에서 0부터)
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// 기본 임베딩 동시 요청 수
pub const DEFAULT_EMBED_CONCURRENCY: usize = 4;

// ============================================================================
// Report
// ============================================================================

/// 수집 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// 수집 대상 파일 수
    pub files: usize,
    /// 로드된 문서 수 (PDF 페이지, CSV 행 포함)
    pub documents: usize,
    /// 색인된 청크 수
    pub chunks: usize,
    /// 로드에 실패해 건너뛴 파일 수
    pub skipped: usize,
}

impl From<&IngestReport> for IngestResponse {
    fn from(report: &IngestReport) -> Self {
        Self {
            success: true,
            message: format!("Successfully ingested {} document chunks", report.chunks),
            documents_processed: report.chunks,
        }
    }
}

impl IngestResponse {
    /// 수집 결과를 응답으로 변환
    pub fn from_result(result: &RagResult<IngestReport>) -> Self {
        match result {
            Ok(report) => report.into(),
            Err(RagError::EmptyInput) => Self {
                success: false,
                message: "No documents found or processed".to_string(),
                documents_processed: 0,
            },
            Err(e) => Self {
                success: false,
                message: format!("Error ingesting documents: {}", e),
                documents_processed: 0,
            },
        }
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// 문서 수집기
pub struct Ingestor {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    loaders: LoaderRegistry,
    chunker: Box<dyn Chunker>,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunk_config: ChunkConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            loaders: LoaderRegistry::with_defaults(),
            chunker: Box::new(RecursiveChunker::new(chunk_config)),
            concurrency: DEFAULT_EMBED_CONCURRENCY,
        }
    }

    /// 로더 레지스트리 교체
    pub fn with_loaders(mut self, loaders: LoaderRegistry) -> Self {
        self.loaders = loaders;
        self
    }

    /// 임베딩 동시 요청 수 (최소 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// 파일 또는 폴더 수집 후 저장
    pub async fn ingest(&self, path: &Path) -> RagResult<IngestReport> {
        let collector = FileCollector::new(
            CollectorConfig::default().with_extensions(self.loaders.extensions()),
        );
        let files = collector
            .collect(path)
            .map_err(|e| RagError::Load(format!("{:#}", e)))?;

        let mut report = IngestReport {
            files: files.len(),
            ..IngestReport::default()
        };

        let mut documents = Vec::new();
        for file in &files {
            match self.loaders.load(&file.path).await {
                Ok(loaded) => documents.extend(loaded),
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", file.path, e);
                    report.skipped += 1;
                }
            }
        }
        report.documents = documents.len();

        report.chunks = self.ingest_documents(documents).await?;

        tracing::info!(
            "Ingested {:?}: {} files, {} documents, {} chunks ({} skipped)",
            path,
            report.files,
            report.documents,
            report.chunks,
            report.skipped
        );
        Ok(report)
    }

    /// 이미 로드된 문서를 청킹/임베딩/색인 후 저장
    ///
    /// # Returns
    /// 추가된 청크 수
    pub async fn ingest_documents(&self, documents: Vec<LoadedDocument>) -> RagResult<usize> {
        let pieces = self.split(documents);
        if pieces.is_empty() {
            return Err(RagError::EmptyInput);
        }

        let embeddings: Vec<Vec<f32>> = stream::iter(
            pieces
                .iter()
                .map(|(text, _)| self.embedder.embed(text)),
        )
        .buffered(self.concurrency)
        .try_collect()
        .await
        .map_err(|e| RagError::embedding(format!("{:#}", e)))?;

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(embeddings)
            .map(|((text, metadata), embedding)| Chunk::new(text, embedding, metadata))
            .collect();

        let added = self.index.add_chunks(chunks)?;
        self.persist().await?;
        Ok(added)
    }

    /// 문서별 청킹 (메타데이터 상속 + 청크 순번)
    fn split(&self, documents: Vec<LoadedDocument>) -> Vec<(String, Metadata)> {
        let mut pieces = Vec::new();

        for document in documents {
            for (i, text) in self.chunker.chunk(&document.text).into_iter().enumerate() {
                let mut metadata = document.metadata.clone();
                metadata.insert(CHUNK_INDEX_KEY.to_string(), i.to_string());
                pieces.push((text, metadata));
            }
        }

        tracing::debug!(
            "Split documents into {} chunks with {}",
            pieces.len(),
            self.chunker.name()
        );
        pieces
    }

    async fn persist(&self) -> RagResult<()> {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.persist())
            .await
            .map_err(|e| RagError::persistence(format!("persist task failed: {}", e)))?
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::SOURCE_KEY;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const DIM: usize = 128;

    fn ingestor(index: Arc<VectorIndex>) -> Ingestor {
        Ingestor::new(
            index,
            Arc::new(HashEmbedding::new(DIM).unwrap()),
            ChunkConfig::new(60, 10),
        )
    }

    fn write_corpus(dir: &Path) {
        std::fs::write(dir.join("calendar.txt"), "Department meeting is at 10am Monday.").unwrap();
        std::fs::write(dir.join("guide.md"), "# Guide\n\nUse the **north** entrance.").unwrap();
        std::fs::write(dir.join("people.csv"), "name,role\nKim,lead\nLee,dev\n").unwrap();
        std::fs::write(dir.join("broken.pdf"), b"not a pdf").unwrap();
        std::fs::write(dir.join("photo.png"), b"png").unwrap();
    }

    #[tokio::test]
    async fn test_ingest_directory() {
        let dir = TempDir::new().unwrap();
        write_corpus(dir.path());

        let index = Arc::new(VectorIndex::in_memory(Some(DIM)));
        let report = ingestor(Arc::clone(&index)).ingest(dir.path()).await.unwrap();

        // png는 수집 대상이 아니고 깨진 pdf는 건너뜀
        assert_eq!(report.files, 4);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.documents, 4);
        assert_eq!(report.chunks, 4);
        assert_eq!(index.len(), 4);

        let query = HashEmbedding::new(DIM).unwrap().embed_text("when is the meeting");
        let hits = index.search(&query, 1);
        assert_eq!(hits[0].chunk.text, "Department meeting is at 10am Monday.");
        assert!(hits[0].chunk.source().ends_with("calendar.txt"));
        assert_eq!(
            hits[0].chunk.metadata.get(CHUNK_INDEX_KEY).map(String::as_str),
            Some("0")
        );
    }

    #[tokio::test]
    async fn test_long_document_chunk_indices() {
        let index = Arc::new(VectorIndex::in_memory(Some(DIM)));
        let text = "word ".repeat(40);
        let document = LoadedDocument::new(text, Path::new("long.txt"));

        let added = ingestor(Arc::clone(&index)).ingest_documents(vec![document]).await.unwrap();
        assert!(added > 1);

        let stats = index.stats();
        assert_eq!(stats.chunk_count, added);

        let all = index.search(&HashEmbedding::new(DIM).unwrap().embed_text("word"), added);
        let mut indices: Vec<usize> = all
            .iter()
            .map(|s| s.chunk.metadata[CHUNK_INDEX_KEY].parse().unwrap())
            .collect();
        indices.sort();
        assert_eq!(indices, (0..added).collect::<Vec<_>>());
        assert!(all.iter().all(|s| s.chunk.metadata[SOURCE_KEY] == "long.txt"));
    }

    #[tokio::test]
    async fn test_empty_ingestion_leaves_index_unchanged() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(VectorIndex::in_memory(Some(DIM)));
        let ingestor = ingestor(Arc::clone(&index));

        let result = ingestor.ingest(dir.path()).await;
        assert!(matches!(result, Err(RagError::EmptyInput)));
        assert!(!index.is_initialized());

        let response = IngestResponse::from_result(&result);
        assert!(!response.success);
        assert_eq!(response.message, "No documents found or processed");
        assert_eq!(response.documents_processed, 0);
    }

    #[tokio::test]
    async fn test_ingest_persists_and_reopens() {
        let docs = TempDir::new().unwrap();
        write_corpus(docs.path());
        let store = TempDir::new().unwrap();

        let index = Arc::new(VectorIndex::open(store.path(), Some(DIM)));
        let report = ingestor(Arc::clone(&index)).ingest(docs.path()).await.unwrap();

        let response = IngestResponse::from(&report);
        assert!(response.success);
        assert_eq!(response.message, "Successfully ingested 4 document chunks");

        let reopened = VectorIndex::open(store.path(), Some(DIM));
        assert_eq!(reopened.len(), 4);

        let query = HashEmbedding::new(DIM).unwrap().embed_text("north entrance");
        let ids = |index: &VectorIndex| -> Vec<String> {
            index.search(&query, 4).iter().map(|s| s.chunk.id.clone()).collect()
        };
        let before = ids(&index);
        let after = ids(&reopened);
        assert_eq!(before, after);
    }

    /// 동시에 진행 중인 임베딩 요청 수의 최댓값을 기록
    struct GaugedEmbedder {
        inner: HashEmbedding,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for GaugedEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "gauged"
        }
    }

    #[tokio::test]
    async fn test_embedding_concurrency_is_bounded_and_order_kept() {
        let hash = HashEmbedding::new(DIM).unwrap();
        let texts = ["alpha notes", "beta notes", "gamma notes", "delta notes", "epsilon notes"];

        // 0은 1로 올림
        for (concurrency, expected_peak) in [(0, 1), (1, 1), (3, 3)] {
            let index = Arc::new(VectorIndex::in_memory(Some(DIM)));
            let embedder = Arc::new(GaugedEmbedder {
                inner: HashEmbedding::new(DIM).unwrap(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            });
            let ingestor = Ingestor::new(
                Arc::clone(&index),
                embedder.clone(),
                ChunkConfig::new(60, 10),
            )
            .with_concurrency(concurrency);

            let documents = texts
                .iter()
                .enumerate()
                .map(|(i, text)| LoadedDocument::new(*text, Path::new(&format!("{}.txt", i))))
                .collect();
            let added = ingestor.ingest_documents(documents).await.unwrap();
            assert_eq!(added, texts.len());
            assert_eq!(embedder.peak.load(Ordering::SeqCst), expected_peak);

            // 각 청크가 자기 텍스트의 임베딩을 가짐
            for hit in index.search(&hash.embed_text("notes"), usize::MAX) {
                assert_eq!(hit.chunk.embedding, hash.embed_text(&hit.chunk.text));
            }
        }
    }

    #[tokio::test]
    async fn test_missing_path_is_load_error() {
        let index = Arc::new(VectorIndex::in_memory(Some(DIM)));
        let result = ingestor(index).ingest(Path::new("/nonexistent/docchat-corpus")).await;
        assert!(matches!(result, Err(RagError::Load(_))));
    }
}
