//! PDF 로더
//!
//! pdf-extract 크레이트로 텍스트를 추출하고 페이지마다 문서 하나를 만듭니다.
//! 추출은 CPU 바운드라 `spawn_blocking`에서 실행합니다.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;

use crate::error::{RagError, RagResult};

use super::{DocumentLoader, LoadedDocument};

/// 페이지 번호 메타데이터 키 (1부터)
pub const PAGE_KEY: &str = "page";
/// 총 페이지 수 메타데이터 키
pub const TOTAL_PAGES_KEY: &str = "total_pages";

/// PDF 파일 → 페이지별 문서
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfLoader;

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, path: &Path) -> RagResult<Vec<LoadedDocument>> {
        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || extract_text_from_pdf(&owned))
            .await
            .map_err(|e| RagError::Load(format!("PDF extraction task failed: {}", e)))?
            .map_err(|e| RagError::Load(format!("{:#}", e)))?;

        let total = pages.len();
        Ok(pages
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(page, text)| {
                LoadedDocument::new(text, path)
                    .with_meta(PAGE_KEY, page)
                    .with_meta(TOTAL_PAGES_KEY, total)
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "PdfLoader"
    }
}

/// PDF에서 텍스트 추출
///
/// 페이지별로 (페이지 번호, 텍스트)를 반환합니다. 페이지 번호는 1부터 시작합니다.
pub fn extract_text_from_pdf(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .collect())
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)
    let pages = split_trimmed(text.split('\x0c'));
    if pages.len() > 1 {
        return pages;
    }

    // "--- Page 1 ---" 같은 구분 줄
    if let Ok(page_pattern) =
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
    {
        let pages = split_trimmed(page_pattern.split(text));
        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}

fn split_trimmed<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
    parts
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
