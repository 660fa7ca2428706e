//! 콘텐츠 추출 모듈 - 파일 형식별 문서 로더
//!
//! 확장자 → 로더 전략 테이블(`LoaderRegistry`)로 분기합니다.
//! - txt: 직접 읽기
//! - md / markdown: pulldown-cmark로 평문 추출
//! - csv: 행 단위 문서 (`header: value` 줄)
//! - pdf: pdf-extract로 페이지별 추출
//!
//! 등록되지 않은 확장자는 `RagError::UnsupportedType`입니다.

mod csv;
mod markdown;
pub mod pdf;
mod text;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{RagError, RagResult};
use crate::knowledge::{Metadata, SOURCE_KEY};

pub use self::csv::CsvLoader;
pub use self::markdown::MarkdownLoader;
pub use self::pdf::PdfLoader;
pub use self::text::TextLoader;

// ============================================================================
// Loaded Document
// ============================================================================

/// 로더가 만든 문서 (청킹 전)
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub text: String,
    /// 항상 `source`(파일 경로)를 포함
    pub metadata: Metadata,
}

impl LoadedDocument {
    /// `source` 메타데이터를 채워서 생성
    pub fn new(text: impl Into<String>, path: &Path) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), path.display().to_string());
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// 메타데이터 항목 추가
    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn source(&self) -> &str {
        self.metadata.get(SOURCE_KEY).map(String::as_str).unwrap_or("Unknown")
    }
}

// ============================================================================
// DocumentLoader Trait
// ============================================================================

/// 파일 → 문서 목록
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> RagResult<Vec<LoadedDocument>>;

    /// 로더 이름
    fn name(&self) -> &'static str;
}

/// 파일을 UTF-8 텍스트로 읽기
pub(crate) async fn read_text(path: &Path) -> RagResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RagError::Load(format!("{}: {}", path.display(), e)))
}

// ============================================================================
// LoaderRegistry
// ============================================================================

/// 확장자(소문자, 점 없이) → 로더
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: BTreeMap<String, Arc<dyn DocumentLoader>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl LoaderRegistry {
    /// 빈 레지스트리
    pub fn empty() -> Self {
        Self {
            loaders: BTreeMap::new(),
        }
    }

    /// txt, md, markdown, csv, pdf 로더 등록
    pub fn with_defaults() -> Self {
        let markdown: Arc<dyn DocumentLoader> = Arc::new(MarkdownLoader);

        let mut registry = Self::empty();
        registry.register("txt", Arc::new(TextLoader));
        registry.register("md", Arc::clone(&markdown));
        registry.register("markdown", markdown);
        registry.register("csv", Arc::new(CsvLoader));
        registry.register("pdf", Arc::new(PdfLoader));
        registry
    }

    /// 로더 등록 (같은 확장자는 교체)
    pub fn register(&mut self, extension: &str, loader: Arc<dyn DocumentLoader>) {
        let ext = normalize_extension(extension);
        tracing::debug!("Registered {} for .{}", loader.name(), ext);
        self.loaders.insert(ext, loader);
    }

    /// 등록된 확장자 목록
    pub fn extensions(&self) -> Vec<&str> {
        self.loaders.keys().map(String::as_str).collect()
    }

    /// 경로의 확장자에 로더가 있는지
    pub fn supports(&self, path: &Path) -> bool {
        self.loader_for(path).is_ok()
    }

    /// 경로에 맞는 로더
    pub fn loader_for(&self, path: &Path) -> RagResult<Arc<dyn DocumentLoader>> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
            .unwrap_or_default();

        self.loaders.get(&ext).cloned().ok_or_else(|| {
            RagError::UnsupportedType(if ext.is_empty() {
                format!("{} (no extension)", path.display())
            } else {
                format!(".{}", ext)
            })
        })
    }

    /// 파일 하나 로드
    pub async fn load(&self, path: &Path) -> RagResult<Vec<LoadedDocument>> {
        let loader = self.loader_for(path)?;
        let documents = loader.load(path).await?;
        tracing::info!(
            "Loaded {} document(s) from {:?} with {}",
            documents.len(),
            path.file_name().unwrap_or_default(),
            loader.name()
        );
        Ok(documents)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

// ============================================================================
// Tests
// ============================================================================
