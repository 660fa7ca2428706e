//! 로컬 해시 임베딩 - API 키 없이 동작하는 결정적 임베딩
//!
//! 소문자 단어와 단어별 문자 3-gram을 FNV-1a로 해싱해 `dimension`개 버킷에 누적한 뒤
//! L2 정규화합니다. 가중치는 모두 양수라 공통 단어가 하나라도 있으면 유사도가 0보다 큽니다.

use anyhow::Result;
use async_trait::async_trait;

use super::EmbeddingProvider;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// 단어 특징 가중치
const WORD_WEIGHT: f32 = 1.0;
/// 문자 3-gram 특징 가중치
const TRIGRAM_WEIGHT: f32 = 0.5;

/// FNV-1a 특징 해싱 임베딩
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Hash embedding dimension must be > 0");
        }
        Ok(Self { dimension })
    }

    /// 동기 임베딩 (async 래퍼 없이 테스트/오프라인에서 사용)
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();

        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            self.accumulate(&mut vector, b'w', word, WORD_WEIGHT);

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let gram: String = window.iter().collect();
                self.accumulate(&mut vector, b'g', &gram, TRIGRAM_WEIGHT);
            }
        }

        l2_normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], kind: u8, feature: &str, weight: f32) {
        let hash = fnv1a(kind, feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        vector[bucket] += weight;
    }
}

/// 특징 종류 바이트를 앞에 붙인 FNV-1a
fn fnv1a(kind: u8, bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in std::iter::once(&kind).chain(bytes) {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "fnv1a-hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    fn embedder() -> HashEmbedding {
        HashEmbedding::new(256).unwrap()
    }

    #[test]
    fn test_unit_norm() {
        let v = embedder().embed_text("hello world");
        assert_eq!(v.len(), 256);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_deterministic_and_case_insensitive() {
        let e = embedder();
        assert_eq!(e.embed_text("Test"), e.embed_text("test"));
        assert_eq!(e.embed_text("a b c"), e.embed_text("a b c"));
    }

    #[test]
    fn test_empty_is_zero_vector() {
        let v = embedder().embed_text("  ?! ");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashEmbedding::new(0).is_err());
    }

    #[test]
    fn test_shared_word_gives_positive_similarity() {
        let e = embedder();
        let doc = e.embed_text("Department meeting is at 10am Monday.");
        let query = e.embed_text("when is the meeting");
        assert!(cosine_similarity(&doc, &query) > 0.0);
    }

    #[test]
    fn test_similar_inputs_rank_higher() {
        let e = embedder();
        let q = e.embed_text("vector database search");
        let near = e.embed_text("searching a vector database");
        let far = e.embed_text("the quick brown fox jumps");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let e = embedder();
        let texts = vec!["one".to_string(), "two words".to_string()];
        let batch = e.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], e.embed("one").await.unwrap());
        assert_eq!(batch[1], e.embed("two words").await.unwrap());
    }
}
