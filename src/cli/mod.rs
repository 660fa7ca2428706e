//! CLI 모듈
//!
//! docchat CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::collector::{CollectionStats, CollectorConfig, FileCollector};
use crate::config::Settings;
use crate::conversation::SessionRegistry;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::extractor::LoaderRegistry;
use crate::generation::ChatCompletionsGenerator;
use crate::knowledge::{ChunkConfig, VectorIndex, SOURCE_KEY};
use crate::rag::{
    IngestResponse, Ingestor, Orchestrator, OrchestratorConfig, QueryRequest, QueryResponse,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docchat")]
#[command(version, about = "로컬 문서 기반 대화형 RAG", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 또는 폴더를 인덱스에 추가
    Ingest {
        /// 수집할 파일 또는 폴더 경로 (폴더는 재귀)
        path: PathBuf,
    },

    /// 한 번 질문하기
    Query {
        /// 질문
        question: String,

        /// 대화 기록에 남기지 않음
        #[arg(long)]
        no_history: bool,

        /// 출처 출력
        #[arg(short, long)]
        sources: bool,
    },

    /// 대화형 세션 (history, clear, exit)
    Chat {
        /// 출처 출력
        #[arg(short, long)]
        sources: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command {
        Commands::Ingest { path } => cmd_ingest(&settings, &path).await,
        Commands::Query {
            question,
            no_history,
            sources,
        } => cmd_query(&settings, question, no_history, sources).await,
        Commands::Chat { sources } => cmd_chat(&settings, sources).await,
        Commands::Status => cmd_status(&settings).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// 저장 디렉토리에서 인덱스 열기 (블로킹 I/O)
async fn open_index(settings: &Settings, dimension: Option<usize>) -> Result<Arc<VectorIndex>> {
    let path = settings.vectorstore_path.clone();
    let index = tokio::task::spawn_blocking(move || VectorIndex::open(&path, dimension))
        .await
        .context("인덱스 로드 작업 실패")?;
    Ok(Arc::new(index))
}

async fn build_orchestrator(settings: &Settings) -> Result<Orchestrator> {
    let embedder = create_embedder(settings).context("임베딩 프로바이더 생성 실패")?;
    let generator = ChatCompletionsGenerator::from_settings(settings).context(
        "생성 모델 설정 실패.\n\
         설정: export GROQ_API_KEY=your-api-key",
    )?;
    let index = open_index(settings, Some(embedder.dimension())).await?;

    Ok(Orchestrator::new(
        index,
        Arc::new(SessionRegistry::new()),
        embedder,
        Arc::new(generator),
        OrchestratorConfig {
            top_k: settings.top_k,
            request_timeout: settings.request_timeout,
            ..OrchestratorConfig::default()
        },
    ))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(settings: &Settings, path: &Path) -> Result<()> {
    let loaders = LoaderRegistry::with_defaults();

    // 수집 대상 미리 보기
    let collector =
        FileCollector::new(CollectorConfig::default().with_extensions(loaders.extensions()));
    let files = collector.collect(path).context("파일 수집 실패")?;

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    if !stats.by_extension.is_empty() {
        let breakdown: Vec<String> = stats
            .by_extension
            .iter()
            .map(|(ext, count)| format!("{}: {}", ext, count))
            .collect();
        println!("    {}", breakdown.join(", "));
    }
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let embedder: Arc<dyn EmbeddingProvider> =
        create_embedder(settings).context("임베딩 프로바이더 생성 실패")?;
    println!("[*] 임베딩: {} ({}차원)", embedder.name(), embedder.dimension());

    let index = open_index(settings, Some(embedder.dimension())).await?;
    let ingestor = Ingestor::new(
        index,
        embedder,
        ChunkConfig::new(settings.chunk_size, settings.chunk_overlap),
    )
    .with_loaders(loaders);

    println!("[*] 문서 로드 및 임베딩 생성 중...");
    let result = ingestor.ingest(path).await;
    let response = IngestResponse::from_result(&result);

    match result {
        Ok(report) => {
            println!("[OK] {}", response.message);
            println!(
                "     파일 {}, 문서 {}, 청크 {} (건너뜀 {})",
                report.files, report.documents, report.chunks, report.skipped
            );
            println!("     저장 위치: {}", settings.vectorstore_path.display());
        }
        Err(e) => {
            println!("[!] {}", response.message);
            tracing::debug!("Ingestion failed: {:?}", e);
        }
    }

    Ok(())
}

/// 질문 명령어 (query)
async fn cmd_query(
    settings: &Settings,
    question: String,
    no_history: bool,
    show_sources: bool,
) -> Result<()> {
    let orchestrator = build_orchestrator(settings).await?;

    let mut request = QueryRequest::new(question);
    if no_history {
        request = request.without_history();
    }

    println!("[*] 질문: \"{}\"", request.question);
    let response = orchestrator.query(request).await;
    print_response(&response, show_sources);

    Ok(())
}

/// 대화형 세션 명령어 (chat)
async fn cmd_chat(settings: &Settings, show_sources: bool) -> Result<()> {
    let orchestrator = build_orchestrator(settings).await?;
    let status = orchestrator.status();

    println!("docchat v{} - 대화형 세션", env!("CARGO_PKG_VERSION"));
    println!(
        "[*] 모델: {}, 인덱스: {} 청크",
        status.model_name, status.chunk_count
    );
    println!("    명령어: history (기록 보기), clear (기록 지우기), exit (종료)");
    println!();

    let mut session_id: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().context("stdout flush 실패")?;

        let Some(line) = lines.next_line().await.context("입력 읽기 실패")? else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "exit" | "quit" => break,
            "history" => {
                let Some(id) = session_id.as_deref() else {
                    println!("[!] 대화 기록이 없습니다.");
                    continue;
                };
                let history = orchestrator.history(id).await?;
                if history.history.is_empty() {
                    println!("[!] 대화 기록이 없습니다.");
                }
                for (i, turn) in history.history.iter().enumerate() {
                    println!("  Q{}: {}", i + 1, turn.question);
                    println!("  A{}: {}", i + 1, truncate_text(&turn.answer, 200));
                }
            }
            "clear" => {
                if let Some(id) = session_id.as_deref() {
                    orchestrator.clear_history(id).await?;
                }
                println!("[OK] 대화 기록을 지웠습니다.");
            }
            question => {
                let mut request = QueryRequest::new(question);
                request.session_id = session_id.clone();

                let response = orchestrator.query(request).await;
                session_id = Some(response.session_id.clone());
                print_response(&response, show_sources);
            }
        }
        println!();
    }

    println!("[*] 세션 종료");
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(settings: &Settings) -> Result<()> {
    println!("docchat v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", settings.data_dir.display());

    // 인덱스 상태
    let index = open_index(settings, None).await?;
    let stats = index.stats();
    if index.is_initialized() {
        println!(
            "[OK] 벡터 인덱스: {} 청크, {} 문서, {}차원",
            stats.chunk_count,
            stats.source_count,
            stats.dimension.unwrap_or_default()
        );
    } else {
        println!("[!] 벡터 인덱스: 비어 있음 (docchat ingest <path>로 문서를 추가하세요)");
    }
    println!("     저장 위치: {}", settings.vectorstore_path.display());

    // 모델 / 임베딩
    println!("[*] 생성 모델: {}", settings.model_name);
    println!(
        "[*] 임베딩: {} ({}차원)",
        settings.embedding_provider, settings.embedding_dimension
    );

    // API 키 상태
    if settings.has_groq_key() {
        println!("[OK] GROQ API 키: 설정됨");
    } else {
        println!("[!] GROQ API 키: 미설정");
        println!("    설정: export GROQ_API_KEY=your-key");
    }
    if settings.has_gemini_key() {
        println!("[OK] Gemini API 키: 설정됨");
    } else {
        println!("[-] Gemini API 키: 미설정 (로컬 해시 임베딩 사용 가능)");
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_response(response: &QueryResponse, show_sources: bool) {
    println!();
    println!("{}", response.answer);

    if show_sources && !response.sources.is_empty() {
        println!();
        println!("[출처]");
        for (i, source) in response.sources.iter().enumerate() {
            let name = source.metadata.get(SOURCE_KEY).map(String::as_str).unwrap_or("Unknown");
            println!("{}. {}", i + 1, name);
            println!("   {}", truncate_text(&source.content, 120));
        }
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("meeting\nnotes", 20), "meeting notes");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MB");
    }

    #[test]
    fn test_parse_commands() {
        let args = ["docchat", "query", "when is the meeting", "--no-history", "-s"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Query {
                question,
                no_history,
                sources,
            } => {
                assert_eq!(question, "when is the meeting");
                assert!(no_history);
                assert!(sources);
            }
            _ => panic!("expected query command"),
        }

        let cli = Cli::try_parse_from(["docchat", "ingest", "./docs"]).unwrap();
        assert!(
            matches!(cli.command, Commands::Ingest { path } if path == PathBuf::from("./docs"))
        );

        assert!(Cli::try_parse_from(["docchat", "ingest"]).is_err());
    }
}
