//! 재시도 정책 - 외부 HTTP 호출용
//!
//! 코어는 재시도하지 않으며, 임베딩/생성 클라이언트만 이 정책을 따릅니다.
//! 기본값은 재시도 없음입니다.

use std::future::Future;
use std::time::Duration;

/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// 백오프 상한
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// 지수 백오프 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 첫 시도 이후 추가 시도 횟수
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// 재시도 없음
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// 총 시도 횟수
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `attempt`(0부터) 실패 후 다시 시도할지
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// `attempt`(0부터) 실패 후 대기 시간: initial * 2^attempt (상한 60초)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }
}

/// 한 번의 시도 실패 분류
#[derive(Debug)]
pub enum AttemptError {
    /// 일시적 실패 (전송 오류, 429, 5xx)
    Retryable(anyhow::Error),
    /// 다시 시도해도 같은 결과 (인증, 잘못된 요청, 파싱 실패)
    Fatal(anyhow::Error),
}

impl RetryPolicy {
    /// `op`를 정책에 따라 실행
    ///
    /// `Fatal`은 즉시 반환하고, `Retryable`은 재시도 횟수가 남아 있으면 백오프 후 다시 호출합니다.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut attempt = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) => e,
            };

            if !self.should_retry(attempt) {
                return Err(error);
            }

            let backoff = self.backoff(attempt);
            tracing::warn!(
                "{} failed ({:#}), retrying in {:?} (attempt {}/{})",
                label,
                error,
                backoff,
                attempt + 1,
                self.max_retries
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

/// 재시도할 가치가 있는 HTTP 상태 (429, 5xx)
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
