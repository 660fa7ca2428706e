//! Markdown 로더 - 서식을 걷어낸 평문 추출
//!
//! 블록(문단, 제목, 목록 항목, 코드 블록, 인용)마다 빈 줄로 구분해
//! 청커가 문단 경계를 우선 사용하도록 합니다.

use std::path::Path;

use async_trait::async_trait;
use pulldown_cmark::{Event, Parser, Tag};

use crate::error::RagResult;

use super::{read_text, DocumentLoader, LoadedDocument};

/// Markdown 파일 → 평문 문서 하나
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownLoader;

#[async_trait]
impl DocumentLoader for MarkdownLoader {
    async fn load(&self, path: &Path) -> RagResult<Vec<LoadedDocument>> {
        let raw = read_text(path).await?;
        Ok(vec![LoadedDocument::new(markdown_to_text(&raw), path)])
    }

    fn name(&self) -> &'static str {
        "MarkdownLoader"
    }
}

/// Markdown → 평문
pub fn markdown_to_text(markdown: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();

    for event in Parser::new(markdown) {
        match event {
            Event::Text(text) | Event::Code(text) => current.push_str(&text),
            Event::SoftBreak => current.push(' '),
            Event::HardBreak => current.push('\n'),
            Event::End(
                Tag::Paragraph
                | Tag::Heading(..)
                | Tag::Item
                | Tag::CodeBlock(_)
                | Tag::BlockQuote,
            ) => flush_block(&mut blocks, &mut current),
            _ => {}
        }
    }
    flush_block(&mut blocks, &mut current);

    blocks.join("\n\n")
}

fn flush_block(blocks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        blocks.push(trimmed.to_string());
    }
    current.clear();
}
