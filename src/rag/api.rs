//! 질의/기록/상태 요청·응답 타입 (serde)
//!
//! 전송 계층과 무관한 형태이며 JSON으로 직렬화됩니다.

use serde::{Deserialize, Serialize};

use crate::conversation::Turn;
use crate::knowledge::{Chunk, Metadata};

/// 출처 미리보기 최대 길이 (문자 수)
pub const SOURCE_PREVIEW_CHARS: usize = 200;

fn default_true() -> bool {
    true
}

/// 질의 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// 대화를 이어갈 세션 ID (없거나 모르는 ID면 새로 발급)
    #[serde(default)]
    pub session_id: Option<String>,
    /// 이번 질문/답변을 기록에 남길지
    #[serde(default = "default_true")]
    pub maintain_history: bool,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            session_id: None,
            maintain_history: true,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn without_history(mut self) -> Self {
        self.maintain_history = false;
        self
    }
}

/// 출처 (청크 미리보기 + 메타데이터)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Source {
    /// 청크 본문을 200자로 잘라 `...`을 붙인 미리보기
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            content: preview(&chunk.text, SOURCE_PREVIEW_CHARS),
            metadata: chunk.metadata.clone(),
        }
    }
}

/// `max_chars`보다 길면 잘라서 `...` 추가 (문자 경계 기준)
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// 질의 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub session_id: String,
}

/// 기록 조회 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<Turn>,
    pub session_id: String,
}

/// 상태 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub vectorstore_initialized: bool,
    pub model_name: String,
    pub chunk_count: usize,
}

/// 수집 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    /// 색인된 청크 수
    pub documents_processed: usize,
}
