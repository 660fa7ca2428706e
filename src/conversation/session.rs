//! Conversation Session - 세션별 대화 기록
//!
//! 최근 `MAX_TURNS`개의 (질문, 답변)만 보관하고,
//! 프롬프트에는 그중 마지막 `PROMPT_WINDOW`개만 넣습니다.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 보관하는 최대 턴 수
pub const MAX_TURNS: usize = 5;

/// 프롬프트에 넣는 최근 턴 수
pub const PROMPT_WINDOW: usize = 3;

/// 기록이 없을 때 프롬프트에 들어가는 문구
pub const NO_HISTORY: &str = "No previous conversation.";

// ============================================================================
// Turn
// ============================================================================

/// 질문/답변 한 쌍
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    /// 기록된 시각
    #[serde(default = "Utc::now")]
    pub asked_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            asked_at: Utc::now(),
        }
    }

    /// (질문, 답변) 쌍으로 비교할 때 사용
    pub fn as_pair(&self) -> (&str, &str) {
        (&self.question, &self.answer)
    }
}

// ============================================================================
// BoundedHistory
// ============================================================================

/// 고정 용량 링 버퍼
///
/// 용량을 넘으면 가장 오래된 항목부터 버립니다.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// 용량 지정 생성 (최소 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 뒤에 추가하고, 밀려난 항목이 있으면 반환
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// 가장 최근 `n`개 (오래된 것부터)
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.items.iter().skip(self.items.len().saturating_sub(n))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// ConversationSession
// ============================================================================

/// 하나의 대화 세션
#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: String,
    history: BoundedHistory<Turn>,
    created_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: BoundedHistory::new(MAX_TURNS),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 턴 추가 (MAX_TURNS 초과 시 가장 오래된 턴 제거)
    pub fn append_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        if let Some(evicted) = self.history.push(Turn::new(question, answer)) {
            tracing::debug!(
                "Session {} evicted oldest turn: {:?}",
                self.id,
                evicted.question
            );
        }
    }

    /// 최근 `window_size`개 턴을 프롬프트용으로 포맷
    ///
    /// ```text
    /// Q1: ...
    /// A1: ...
    ///
    /// Q2: ...
    /// A2: ...
    /// ```
    pub fn format_window(&self, window_size: usize) -> String {
        format_turns(self.history.recent(window_size))
    }

    /// 보관 중인 모든 턴을 같은 형식으로 포맷
    pub fn format_all(&self) -> String {
        format_turns(self.history.iter())
    }

    /// 보관 중인 모든 턴 (오래된 것부터)
    pub fn turns(&self) -> Vec<Turn> {
        self.history.iter().cloned().collect()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.history.last()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        tracing::info!("Chat history cleared for session {}", self.id);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

fn format_turns<'a>(turns: impl Iterator<Item = &'a Turn>) -> String {
    let formatted: Vec<String> = turns
        .enumerate()
        .map(|(i, turn)| {
            let n = i + 1;
            format!("Q{}: {}\nA{}: {}", n, turn.question, n, turn.answer)
        })
        .collect();

    if formatted.is_empty() {
        NO_HISTORY.to_string()
    } else {
        formatted.join("\n\n")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(n: usize) -> ConversationSession {
        let mut session = ConversationSession::new("test");
        for i in 1..=n {
            session.append_turn(format!("q{}", i), format!("a{}", i));
        }
        session
    }

    #[test]
    fn test_bounded_history_evicts_oldest() {
        let mut history = BoundedHistory::new(2);
        assert_eq!(history.push(1), None);
        assert_eq!(history.push(2), None);
        assert_eq!(history.push(3), Some(1));
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(history.recent(5).count(), 2);
        assert_eq!(history.recent(1).copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_bounded_history_zero_capacity() {
        let mut history = BoundedHistory::new(0);
        history.push("a");
        history.push("b");
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.last(), Some(&"b"));
    }

    #[test]
    fn test_empty_session_sentinel() {
        let session = ConversationSession::new("s");
        assert_eq!(session.format_window(PROMPT_WINDOW), NO_HISTORY);
        assert_eq!(session.format_all(), NO_HISTORY);
        assert!(session.last_turn().is_none());
    }

    #[test]
    fn test_retained_history_never_exceeds_max() {
        for n in 0..12 {
            let session = session_with(n);
            assert_eq!(session.len(), n.min(MAX_TURNS));
        }
    }

    #[test]
    fn test_window_is_suffix_of_retained() {
        for n in 0..12 {
            let session = session_with(n);
            let turns = session.turns();
            let start = turns.len().saturating_sub(PROMPT_WINDOW);
            let expected = format_turns(turns[start..].iter());
            assert_eq!(session.format_window(PROMPT_WINDOW), expected);
        }
    }

    #[test]
    fn test_format_window_numbering() {
        let session = session_with(7);
        assert_eq!(
            session.format_window(PROMPT_WINDOW),
            "Q1: q5\nA1: a5\n\nQ2: q6\nA2: a6\n\nQ3: q7\nA3: a7"
        );
        // 프롬프트 창에서 빠진 턴도 전체 기록에는 남아 있음
        let all = session.format_all();
        assert!(all.starts_with("Q1: q3\nA1: a3"));
        assert!(all.ends_with("Q5: q7\nA5: a7"));
    }

    #[test]
    fn test_clear() {
        let mut session = session_with(3);
        session.clear();
        assert!(session.is_empty());
        assert_eq!(session.format_window(PROMPT_WINDOW), NO_HISTORY);

        session.append_turn("again", "yes");
        assert_eq!(session.len(), 1);
        assert_eq!(session.last_turn().map(Turn::as_pair), Some(("again", "yes")));
    }

    #[test]
    fn test_turns_carry_timestamps_in_order() {
        let before = Utc::now();
        let session = session_with(3);
        let after = Utc::now();

        let turns = session.turns();
        assert!(turns.iter().all(|t| t.asked_at >= before && t.asked_at <= after));
        assert!(turns.windows(2).all(|w| w[0].asked_at <= w[1].asked_at));
    }

    #[test]
    fn test_turn_deserializes_without_timestamp() {
        let turn: Turn = serde_json::from_str(r#"{"question":"q","answer":"a"}"#).unwrap();
        assert_eq!(turn.as_pair(), ("q", "a"));
    }
}
