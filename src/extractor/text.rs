//! 평문 텍스트 로더

use std::path::Path;

use async_trait::async_trait;

use crate::error::RagResult;

use super::{read_text, DocumentLoader, LoadedDocument};

/// 파일 전체를 문서 하나로
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, path: &Path) -> RagResult<Vec<LoadedDocument>> {
        let text = read_text(path).await?;
        Ok(vec![LoadedDocument::new(text, path)])
    }

    fn name(&self) -> &'static str {
        "TextLoader"
    }
}
