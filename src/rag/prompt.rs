//! 프롬프트 조립
//!
//! 대화 기록 창, 검색된 컨텍스트, 원래 질문의 세 자리를 고정 템플릿에 채웁니다.

use crate::knowledge::ScoredChunk;

/// 검색 결과가 없을 때 컨텍스트 자리에 들어가는 문구
pub const NO_CONTEXT: &str = "No relevant context found.";

/// 컨텍스트 청크 사이 구분자
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

const TEMPLATE: &str = "You are an AI assistant that answers questions based on the \
provided context.
Use the following pieces of context to answer the question at the end.
If you don't know the answer based on the context, just say that you don't know, \
don't try to make up an answer.

For follow-up questions, use the conversation history to understand the full context \
of what the user is asking.

Conversation History:
{chat_history}

Context:
{context}

Question: {question}

Answer: ";

/// 검색된 청크를 출처 라벨과 함께 포맷
///
/// ```text
/// [Source 1: notes.txt]
/// ...
///
/// ---
///
/// [Source 2: faq.md]
/// ...
/// ```
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT.to_string();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(i, scored)| {
            format!("[Source {}: {}]\n{}", i + 1, scored.chunk.source(), scored.chunk.text)
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// 최종 프롬프트
pub fn build_prompt(history: &str, context: &str, question: &str) -> String {
    // 각 자리를 한 번에 치환 (값 안의 `{...}`는 다시 치환되지 않음)
    let mut prompt =
        String::with_capacity(TEMPLATE.len() + history.len() + context.len() + question.len());
    let mut rest = TEMPLATE;

    while let Some(start) = rest.find('{') {
        prompt.push_str(&rest[..start]);
        let after = &rest[start..];
        let (value, skip) = if after.starts_with("{chat_history}") {
            (history, "{chat_history}".len())
        } else if after.starts_with("{context}") {
            (context, "{context}".len())
        } else if after.starts_with("{question}") {
            (question, "{question}".len())
        } else {
            ("{", 1)
        };
        prompt.push_str(value);
        rest = &after[skip..];
    }
    prompt.push_str(rest);

    prompt
}
