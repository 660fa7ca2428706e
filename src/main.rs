//! docchat CLI 진입점

use anyhow::{Context, Result};
use clap::Parser;

use docchat::config::Settings;

fn main() -> Result<()> {
    let cli = docchat::cli::Cli::parse();

    // 설정 (.env 포함)
    let settings = Settings::from_env().context("설정 로드 실패")?;

    // 로깅 초기화 (RUST_LOG + LOG_LEVEL)
    let level = settings
        .log_level
        .parse::<tracing_subscriber::filter::Directive>()
        .with_context(|| format!("Invalid LOG_LEVEL: {}", settings.log_level))?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level))
        .init();

    // CLI 실행
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(docchat::cli::run(cli, settings))
}
