//! Session Registry - 세션 ID → 대화 세션
//!
//! 맵 자체는 `std::sync::RwLock`으로 보호하고 (await 없이 짧게 잡음),
//! 각 세션은 자기 `tokio::sync::Mutex`를 가지므로 서로 다른 세션의 요청은 막히지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{RagError, RagResult};

use super::session::{ConversationSession, Turn};

/// 공유 세션 핸들
pub type SessionHandle = Arc<Mutex<ConversationSession>>;

/// 프로세스 전체 세션 레지스트리
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 알려진 ID면 기존 세션, 아니면 새 ID로 빈 세션 생성
    ///
    /// 알 수 없는 ID가 주어져도 그 ID를 그대로 쓰지 않고 새로 발급합니다.
    pub fn get_or_create(&self, session_id: Option<&str>) -> (String, SessionHandle) {
        if let Some(id) = session_id {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = sessions.get(id) {
                return (id.to_string(), Arc::clone(handle));
            }
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        // 읽기 락을 놓은 사이 다른 요청이 만들었을 수 있음
        if let Some(id) = session_id {
            if let Some(handle) = sessions.get(id) {
                return (id.to_string(), Arc::clone(handle));
            }
            tracing::debug!("Unknown session id {}, allocating a new session", id);
        }

        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(Mutex::new(ConversationSession::new(id.clone())));
        sessions.insert(id.clone(), Arc::clone(&handle));
        tracing::info!("Created session {} (active={})", id, sessions.len());

        (id, handle)
    }

    /// 세션 조회
    pub fn get(&self, session_id: &str) -> RagResult<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .ok_or_else(|| RagError::NotFound(session_id.to_string()))
    }

    /// 세션 삭제
    pub fn delete(&self, session_id: &str) -> RagResult<()> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);

        match removed {
            Some(_) => {
                tracing::info!("Deleted session {}", session_id);
                Ok(())
            }
            None => Err(RagError::NotFound(session_id.to_string())),
        }
    }

    /// 세션 기록 비우기
    pub async fn clear_history(&self, session_id: &str) -> RagResult<()> {
        let handle = self.get(session_id)?;
        handle.lock().await.clear();
        Ok(())
    }

    /// 보관 중인 턴 목록
    pub async fn history(&self, session_id: &str) -> RagResult<Vec<Turn>> {
        let handle = self.get(session_id)?;
        let turns = handle.lock().await.turns();
        Ok(turns)
    }

    /// 활성 세션 ID 목록
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
