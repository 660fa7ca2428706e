//! 검색 증강 질의 오케스트레이터
//!
//! 질의 한 건을 이름 있는 단계로 처리합니다:
//! resolve → (초기화 확인) → contextualize → retrieve → assemble → generate → record
//!
//! 단계 사이에는 `PipelineState`가 전달됩니다. contextualize부터 generate까지는
//! 요청 타임아웃 하나로 감싸며, 그 구간의 실패는 모두 답변 문자열로 바뀝니다.
//! 세션 락은 스냅샷과 기록 추가 때만 잡고, 외부 호출 동안에는 잡지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use crate::conversation::{
    QueryContextualizer, SessionHandle, SessionRegistry, Turn, PROMPT_WINDOW,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::generation::Generator;
use crate::knowledge::{ScoredChunk, VectorIndex};

use super::api::{HistoryResponse, QueryRequest, QueryResponse, Source, StatusResponse};
use super::prompt::{build_prompt, format_context};

// ============================================================================
// Configuration
// ============================================================================

/// 오케스트레이터 설정
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 검색할 청크 수
    pub top_k: usize,
    /// contextualize ~ generate 구간 타임아웃
    pub request_timeout: Duration,
    /// 프롬프트에 넣을 최근 턴 수
    pub prompt_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            top_k: 1,
            request_timeout: Duration::from_secs(120),
            prompt_window: PROMPT_WINDOW,
        }
    }
}

// ============================================================================
// Pipeline State
// ============================================================================

/// 단계 사이에 전달되는 중간 값
#[derive(Debug)]
struct PipelineState {
    question: String,
    session_id: String,
    session: SessionHandle,
    maintain_history: bool,
    /// contextualize 단계에서 찍은 세션 스냅샷
    last_turn: Option<Turn>,
    history_window: String,
    /// 검색에 쓰는 질의 (후속 질문이면 직전 질문이 붙음)
    effective_query: String,
    retrieved: Vec<ScoredChunk>,
    prompt: String,
    answer: String,
}

impl PipelineState {
    fn new(request: QueryRequest, session_id: String, session: SessionHandle) -> Self {
        Self {
            question: request.question,
            session_id,
            session,
            maintain_history: request.maintain_history,
            last_turn: None,
            history_window: String::new(),
            effective_query: String::new(),
            retrieved: Vec::new(),
            prompt: String::new(),
            answer: String::new(),
        }
    }

    fn into_response(self) -> QueryResponse {
        QueryResponse {
            answer: self.answer,
            sources: self
                .retrieved
                .iter()
                .map(|scored| Source::from_chunk(&scored.chunk))
                .collect(),
            session_id: self.session_id,
        }
    }

    /// 답변만 있고 출처는 없는 응답
    fn into_error_response(self, answer: String) -> QueryResponse {
        QueryResponse {
            answer,
            sources: vec![],
            session_id: self.session_id,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// 검색 증강 질의 오케스트레이터
pub struct Orchestrator {
    index: Arc<VectorIndex>,
    registry: Arc<SessionRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    contextualizer: QueryContextualizer,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        index: Arc<VectorIndex>,
        registry: Arc<SessionRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            index,
            registry,
            embedder,
            generator,
            contextualizer: QueryContextualizer::default(),
            config,
        }
    }

    /// 후속 질문 판별기 교체
    pub fn with_contextualizer(mut self, contextualizer: QueryContextualizer) -> Self {
        self.contextualizer = contextualizer;
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 질의 처리
    ///
    /// 실패해도 에러를 반환하지 않고, 에러 내용을 답변으로 돌려줍니다.
    pub async fn query(&self, request: QueryRequest) -> QueryResponse {
        // 1. resolve
        let (session_id, session) = self.registry.get_or_create(request.session_id.as_deref());
        let mut state = PipelineState::new(request, session_id, session);

        // 2. 문서가 없으면 생성 모델을 부르지 않음
        if !self.index.is_initialized() {
            let answer = format!("Error: {}", RagError::NotInitialized);
            return state.into_error_response(answer);
        }

        // 3 ~ 6. 타임아웃 구간
        let outcome = match tokio::time::timeout(
            self.config.request_timeout,
            self.run_stages(&mut state),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout(self.config.request_timeout)),
        };

        if let Err(e) = outcome {
            tracing::error!("Error during query (session {}): {}", state.session_id, e);
            let answer = format!("Error processing query: {}", e);
            return state.into_error_response(answer);
        }

        // 7. record
        self.record(&state).await;

        // 8. respond
        state.into_response()
    }

    async fn run_stages(&self, state: &mut PipelineState) -> RagResult<()> {
        self.contextualize(state).await;
        self.retrieve(state).await?;
        self.assemble(state);
        self.generate(state).await
    }

    /// 세션 스냅샷 후 검색용 질의 생성
    async fn contextualize(&self, state: &mut PipelineState) {
        {
            let session = state.session.lock().await;
            state.last_turn = session.last_turn().cloned();
            state.history_window = session.format_window(self.config.prompt_window);
        }

        state.effective_query = self
            .contextualizer
            .contextualize(&state.question, state.last_turn.as_ref());
    }

    /// 질의 임베딩 후 top-k 검색
    async fn retrieve(&self, state: &mut PipelineState) -> RagResult<()> {
        let embedding = self
            .embedder
            .embed_query(&state.effective_query)
            .await
            .map_err(|e| RagError::embedding(format!("{:#}", e)))?;

        if let Some(expected) = self.index.dimension() {
            if embedding.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        state.retrieved = self.index.search(&embedding, self.config.top_k);
        tracing::debug!(
            "Retrieved {} chunk(s) for {:?} (best={:?})",
            state.retrieved.len(),
            state.effective_query,
            state.retrieved.first().map(|s| s.similarity)
        );
        Ok(())
    }

    /// 기록 창 + 컨텍스트 + 원래 질문으로 프롬프트 조립
    fn assemble(&self, state: &mut PipelineState) {
        let context = format_context(&state.retrieved);
        state.prompt = build_prompt(&state.history_window, &context, &state.question);
    }

    async fn generate(&self, state: &mut PipelineState) -> RagResult<()> {
        state.answer = self
            .generator
            .generate(&state.prompt)
            .await
            .map_err(|e| RagError::generation(format!("{:#}", e)))?;
        Ok(())
    }

    /// 원래 질문과 답변을 세션에 추가
    async fn record(&self, state: &PipelineState) {
        if state.maintain_history {
            state
                .session
                .lock()
                .await
                .append_turn(state.question.clone(), state.answer.clone());
        }
    }

    /// 여러 질문을 한 세션에서 순서대로 처리 (기록 유지)
    pub async fn batch_query(&self, questions: &[String]) -> Vec<QueryResponse> {
        let mut session_id: Option<String> = None;
        let mut responses = Vec::with_capacity(questions.len());

        for question in questions {
            let mut request = QueryRequest::new(question.clone());
            request.session_id = session_id.clone();

            let response = self.query(request).await;
            session_id = Some(response.session_id.clone());
            responses.push(response);
        }

        responses
    }

    /// 세션 기록 조회
    pub async fn history(&self, session_id: &str) -> RagResult<HistoryResponse> {
        let history = self.registry.history(session_id).await?;
        Ok(HistoryResponse {
            history,
            session_id: session_id.to_string(),
        })
    }

    /// 세션 기록 비우기
    pub async fn clear_history(&self, session_id: &str) -> RagResult<()> {
        self.registry.clear_history(session_id).await
    }

    /// 세션 삭제
    pub fn delete_session(&self, session_id: &str) -> RagResult<()> {
        self.registry.delete(session_id)
    }

    /// 상태
    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            status: "online".to_string(),
            vectorstore_initialized: self.index.is_initialized(),
            model_name: self.generator.name().to_string(),
            chunk_count: self.index.len(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::NO_HISTORY;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::{Chunk, Metadata, SOURCE_KEY};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    const DIM: usize = 256;

    /// 프롬프트를 기록하고 고정 답변을 반환
    #[derive(Default)]
    struct ScriptedGenerator {
        prompts: StdMutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            Ok(format!("answer {}", prompts.len()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("service unavailable")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// 검색 질의를 기록하는 해시 임베딩
    struct RecordingEmbedder {
        inner: HashEmbedding,
        queries: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.inner.embed(text).await
        }

        async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.queries.lock().unwrap().push(text.to_string());
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("quota exceeded")
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn hash() -> HashEmbedding {
        HashEmbedding::new(DIM).unwrap()
    }

    fn index_with(texts: &[(&str, &str)]) -> Arc<VectorIndex> {
        let embedder = hash();
        let index = VectorIndex::in_memory(Some(DIM));
        let chunks: Vec<Chunk> = texts
            .iter()
            .map(|(text, source)| {
                let mut metadata = Metadata::new();
                metadata.insert(SOURCE_KEY.to_string(), source.to_string());
                Chunk::new(*text, embedder.embed_text(text), metadata)
            })
            .collect();
        if !chunks.is_empty() {
            index.create(chunks).unwrap();
        }
        Arc::new(index)
    }

    fn orchestrator(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Orchestrator {
        Orchestrator::new(
            index,
            Arc::new(SessionRegistry::new()),
            embedder,
            generator,
            OrchestratorConfig::default(),
        )
    }

    fn meeting_index() -> Arc<VectorIndex> {
        index_with(&[
            ("Department meeting is at 10am Monday.", "calendar.txt"),
            ("The cafeteria serves lunch from noon.", "cafeteria.txt"),
        ])
    }

    #[tokio::test]
    async fn test_end_to_end_meeting() {
        let index = meeting_index();
        let query = hash().embed_text("when is the meeting");
        let hits = index.search(&query, 1);
        assert_eq!(hits[0].chunk.text, "Department meeting is at 10am Monday.");
        assert!(hits[0].similarity > 0.0);

        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(index, Arc::new(hash()), generator.clone());

        let response = orch.query(QueryRequest::new("when is the meeting")).await;
        assert_eq!(response.answer, "answer 1");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].content, "Department meeting is at 10am Monday.");
        assert_eq!(
            response.sources[0].metadata.get(SOURCE_KEY).map(String::as_str),
            Some("calendar.txt")
        );

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("[Source 1: calendar.txt]\nDepartment meeting is at 10am Monday."));
        assert!(prompt.contains(&format!("Conversation History:\n{}", NO_HISTORY)));
        assert!(prompt.contains("Question: when is the meeting"));

        let history = orch.history(&response.session_id).await.unwrap();
        let pairs: Vec<(&str, &str)> = history.history.iter().map(Turn::as_pair).collect();
        assert_eq!(pairs, vec![("when is the meeting", "answer 1")]);

        orch.clear_history(&response.session_id).await.unwrap();
        let session = orch.registry().get(&response.session_id).unwrap();
        assert_eq!(session.lock().await.format_window(PROMPT_WINDOW), NO_HISTORY);
    }

    #[tokio::test]
    async fn test_not_initialized_skips_generation() {
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(index_with(&[]), Arc::new(hash()), generator.clone());

        let response = orch.query(QueryRequest::new("anything")).await;
        assert_eq!(
            response.answer,
            "Error: Vector store not initialized. Please ingest documents first."
        );
        assert!(response.sources.is_empty());
        assert!(generator.prompts().is_empty());
        assert!(orch.history(&response.session_id).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_uses_contextualized_retrieval_but_original_question() {
        let embedder = Arc::new(RecordingEmbedder {
            inner: hash(),
            queries: StdMutex::new(vec![]),
        });
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(meeting_index(), embedder.clone(), generator.clone());

        let first = orch.query(QueryRequest::new("What is RAG?")).await;
        let second = orch
            .query(QueryRequest::new("How about cost?").with_session(first.session_id.clone()))
            .await;
        assert_eq!(second.session_id, first.session_id);

        let queries = embedder.queries.lock().unwrap().clone();
        assert_eq!(queries, vec!["What is RAG?", "What is RAG? How about cost?"]);

        let prompt = &generator.prompts()[1];
        assert!(prompt.contains("Q1: What is RAG?\nA1: answer 1"));
        assert!(prompt.contains("Question: How about cost?\n"));

        let history = orch.history(&first.session_id).await.unwrap().history;
        assert_eq!(history[1].question, "How about cost?");
    }

    #[tokio::test]
    async fn test_custom_contextualizer_controls_splicing() {
        let embedder = Arc::new(RecordingEmbedder {
            inner: hash(),
            queries: StdMutex::new(vec![]),
        });
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(meeting_index(), embedder.clone(), generator)
            .with_contextualizer(QueryContextualizer::new(&["furthermore"], 0).unwrap());

        let first = orch.query(QueryRequest::new("What is RAG?")).await;
        let session = first.session_id.clone();

        // 짧은 질문이라도 단서가 없으면 그대로 검색
        orch.query(QueryRequest::new("How about cost?").with_session(session.clone()))
            .await;
        orch.query(QueryRequest::new("Furthermore, who attends?").with_session(session))
            .await;

        let queries = embedder.queries.lock().unwrap().clone();
        assert_eq!(
            queries,
            vec![
                "What is RAG?",
                "How about cost?",
                "How about cost? Furthermore, who attends?",
            ]
        );
    }

    #[tokio::test]
    async fn test_maintain_history_false() {
        let orch = orchestrator(
            meeting_index(),
            Arc::new(hash()),
            Arc::new(ScriptedGenerator::default()),
        );
        let response = orch.query(QueryRequest::new("when is the meeting").without_history()).await;
        assert!(orch.history(&response.session_id).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_becomes_answer() {
        let orch = orchestrator(meeting_index(), Arc::new(hash()), Arc::new(FailingGenerator));

        let response = orch.query(QueryRequest::new("when is the meeting")).await;
        assert!(response.answer.starts_with("Error processing query: "));
        assert!(response.answer.contains("service unavailable"));
        assert!(response.sources.is_empty());
        assert!(orch.history(&response.session_id).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_becomes_answer() {
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(meeting_index(), Arc::new(FailingEmbedder), generator.clone());

        let response = orch.query(QueryRequest::new("when is the meeting")).await;
        assert!(response.answer.contains("quota exceeded"));
        assert!(response.sources.is_empty());
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_becomes_answer() {
        let orch = Orchestrator::new(
            meeting_index(),
            Arc::new(SessionRegistry::new()),
            Arc::new(hash()),
            Arc::new(SlowGenerator),
            OrchestratorConfig {
                request_timeout: Duration::from_millis(50),
                ..OrchestratorConfig::default()
            },
        );

        let response = orch.query(QueryRequest::new("when is the meeting")).await;
        assert!(response.answer.starts_with("Error processing query: Request timed out"));
        assert!(orch.history(&response.session_id).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_history_window_and_retention() {
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(meeting_index(), Arc::new(hash()), generator.clone());

        let questions: Vec<String> = (1..=7)
            .map(|i| format!("question number {} about lunch", i))
            .collect();
        let responses = orch.batch_query(&questions).await;
        assert_eq!(responses.len(), 7);
        let session_id = responses[0].session_id.clone();
        assert!(responses.iter().all(|r| r.session_id == session_id));

        let history = orch.history(&session_id).await.unwrap().history;
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].question, "question number 3 about lunch");

        // 7번째 프롬프트에는 4~6번 턴만
        let last_prompt = generator.prompts().last().cloned().unwrap();
        assert!(last_prompt.contains("Q1: question number 4 about lunch"));
        assert!(last_prompt.contains("Q3: question number 6 about lunch"));
        assert!(!last_prompt.contains("question number 3 about lunch"));
    }

    #[tokio::test]
    async fn test_unknown_session_operations() {
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(meeting_index(), Arc::new(hash()), generator);
        assert!(matches!(orch.history("nope").await, Err(RagError::NotFound(_))));
        assert!(matches!(orch.clear_history("nope").await, Err(RagError::NotFound(_))));
        assert!(matches!(orch.delete_session("nope"), Err(RagError::NotFound(_))));

        let response = orch
            .query(QueryRequest::new("when is the meeting").with_session("nope"))
            .await;
        assert_ne!(response.session_id, "nope");
        orch.delete_session(&response.session_id).unwrap();
        assert!(orch.history(&response.session_id).await.is_err());
    }

    #[tokio::test]
    async fn test_status() {
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(meeting_index(), Arc::new(hash()), generator);
        let status = orch.status();
        assert_eq!(status.status, "online");
        assert!(status.vectorstore_initialized);
        assert_eq!(status.model_name, "scripted");
        assert_eq!(status.chunk_count, 2);
    }

    /// 두 세션의 생성 호출이 동시에 진행되어야 통과
    struct RendezvousGenerator {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl Generator for RendezvousGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            self.barrier.wait().await;
            Ok("together".to_string())
        }

        fn name(&self) -> &str {
            "rendezvous"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sessions_do_not_block_each_other() {
        let orch = Arc::new(orchestrator(
            meeting_index(),
            Arc::new(hash()),
            Arc::new(RendezvousGenerator {
                barrier: tokio::sync::Barrier::new(2),
            }),
        ));

        let a = tokio::spawn({
            let orch = Arc::clone(&orch);
            async move { orch.query(QueryRequest::new("when is the meeting")).await }
        });
        let b = tokio::spawn({
            let orch = Arc::clone(&orch);
            async move { orch.query(QueryRequest::new("what is for lunch today")).await }
        });

        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async { (a.await, b.await) })
            .await
            .expect("queries on different sessions must run concurrently");
        assert_eq!(a.unwrap().answer, "together");
        assert_eq!(b.unwrap().answer, "together");
    }
}
