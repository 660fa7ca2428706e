//! Text Chunking Module
//!
//! 재귀 문자 분할기: 문단 → 줄 → 단어 → 문자 순으로 구분자를 바꿔가며
//! `chunk_size` 이하의 조각을 만들고, 인접 청크 사이에 `chunk_overlap`만큼 겹침을 둡니다.
//! 길이는 모두 문자(char) 수 기준입니다.

use std::collections::VecDeque;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 청크 간 겹침 (문자 수, `chunk_size`보다 작아야 함)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 기본 구분자 (우선순위 순)
const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// 재귀 문자 분할 청커
pub struct RecursiveChunker {
    config: ChunkConfig,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// 설정으로 생성
    ///
    /// overlap이 chunk_size 이상이면 chunk_size - 1로 줄입니다.
    pub fn new(config: ChunkConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        let config = ChunkConfig {
            chunk_size,
            chunk_overlap: config.chunk_overlap.min(chunk_size - 1),
        };

        Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // 텍스트에 실제로 등장하는 첫 구분자 선택 ("" 는 항상 선택됨)
        let (separator, rest) = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s.as_str()))
            .map(|i| (separators[i].as_str(), &separators[i + 1..]))
            .unwrap_or(("", &[][..]));

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        for split in splits {
            if char_len(&split) < self.config.chunk_size {
                pending.push(split);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge_splits(&pending, separator));
                pending.clear();
            }

            if rest.is_empty() {
                chunks.push(split);
            } else {
                chunks.extend(self.split_recursive(&split, rest));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge_splits(&pending, separator));
        }

        chunks
    }

    /// 작은 조각들을 chunk_size 이하로 합치면서 overlap 유지
    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);
            let joined_len = |current: &VecDeque<&str>| {
                if current.is_empty() {
                    0
                } else {
                    sep_len
                }
            };

            if total + len + joined_len(&current) > self.config.chunk_size {
                if !current.is_empty() {
                    push_joined(&mut chunks, &current, separator);

                    // overlap 이하가 되고 다음 조각이 들어갈 때까지 앞에서 제거
                    while total > self.config.chunk_overlap
                        || (total > 0
                            && total + len + joined_len(&current) > self.config.chunk_size)
                    {
                        let Some(front) = current.pop_front() else { break };
                        total -= char_len(front) + if current.is_empty() { 0 } else { sep_len };
                    }
                }
            }

            total += len + joined_len(&current);
            current.push_back(split);
        }

        push_joined(&mut chunks, &current, separator);
        chunks
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        self.split_recursive(text, &self.separators)
    }

    fn name(&self) -> &'static str {
        "RecursiveChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_joined(chunks: &mut Vec<String>, parts: &VecDeque<&str>, separator: &str) {
    let joined = parts.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(RecursiveChunker::with_defaults())
}

/// 설정을 지정한 청커 생성
pub fn recursive_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(RecursiveChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================
