//! Conversation 모듈 - 세션 기록과 후속 질문 처리
//!
//! - Session: 최근 5턴 보관, 프롬프트에는 최근 3턴
//! - Registry: 세션 ID별 세션 (세션마다 개별 락)
//! - Contextualizer: 후속 질문에 직전 질문을 붙여 검색 질의 생성

mod contextualizer;
mod registry;
mod session;

// Re-exports
pub use contextualizer::{QueryContextualizer, DEFAULT_CUES, DEFAULT_MIN_WORDS};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{
    BoundedHistory, ConversationSession, Turn,
    MAX_TURNS, NO_HISTORY, PROMPT_WINDOW,
};
