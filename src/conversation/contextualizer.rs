//! Query Contextualizer - 후속 질문 보정
//!
//! "그건 얼마야?" 같은 짧거나 지시어가 들어간 질문은 단독으로 검색하면
//! 결과가 나쁘므로, 직전 질문을 앞에 붙여 검색용 질의를 만듭니다.
//! 기록에 남기거나 모델에 보여주는 질문은 원래 질문 그대로입니다.

use regex::Regex;

use super::session::{ConversationSession, Turn};

/// 후속 질문으로 보는 단서 (대소문자 무시, 단어 단위)
///
/// 부분 문자열이 아니라 단어 경계(`\b`)로 일치시킵니다. 부분 문자열로 바꾸면
/// "item"이 "it"에, "bandwidth"가 "and"에 걸려 긴 독립 질문까지 직전 질문과 합쳐집니다.
pub const DEFAULT_CUES: [&str; 8] = [
    "it", "this", "that", "they", "them", "what about", "how about", "and",
];

/// 이 단어 수 미만이면 후속 질문으로 간주
pub const DEFAULT_MIN_WORDS: usize = 5;

/// 후속 질문 판별 및 질의 재작성
#[derive(Debug, Clone)]
pub struct QueryContextualizer {
    /// 단서가 하나도 없으면 None
    cue_pattern: Option<Regex>,
    min_words: usize,
}

impl QueryContextualizer {
    /// 단서 목록과 단어 수 기준으로 생성
    ///
    /// 여러 단어로 된 단서는 사이 공백 개수와 무관하게 일치합니다.
    pub fn new(cues: &[&str], min_words: usize) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = cues
            .iter()
            .map(|cue| {
                cue.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .filter(|alt| !alt.is_empty())
            .collect();

        let cue_pattern = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?)
        };

        Ok(Self {
            cue_pattern,
            min_words,
        })
    }

    /// 후속 질문처럼 보이는지
    ///
    /// 단어 수가 `min_words` 미만이거나, 단서가 단어 단위로 들어 있으면 true.
    pub fn is_follow_up(&self, question: &str) -> bool {
        question.split_whitespace().count() < self.min_words
            || self
                .cue_pattern
                .as_ref()
                .is_some_and(|re| re.is_match(question))
    }

    /// 검색용 질의 생성
    ///
    /// 직전 턴이 없으면 질문 그대로, 후속 질문이면 `"{직전 질문} {질문}"`.
    pub fn contextualize(&self, question: &str, last_turn: Option<&Turn>) -> String {
        match last_turn {
            Some(last) if self.is_follow_up(question) => {
                let effective = format!("{} {}", last.question, question);
                tracing::debug!("Contextualized follow-up question: {:?}", effective);
                effective
            }
            _ => question.to_string(),
        }
    }

    /// 세션의 마지막 턴을 기준으로 검색용 질의 생성
    pub fn contextualize_with(&self, question: &str, session: &ConversationSession) -> String {
        self.contextualize(question, session.last_turn())
    }
}

impl Default for QueryContextualizer {
    fn default() -> Self {
        // 단서는 모두 escape되므로 패턴 컴파일은 실패하지 않음
        Self::new(&DEFAULT_CUES, DEFAULT_MIN_WORDS).expect("default cue pattern must compile")
    }
}

// ============================================================================
// Tests
// ============================================================================
