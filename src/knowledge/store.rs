//! Chunk Store - 인덱스의 디스크 저장 형식
//!
//! 인덱스 디렉토리 구성:
//! - `chunks-<uuid>.db`: 청크 데이터 (SQLite, 삽입 순서 = `seq`)
//! - `index.marker`: 센티널 파일 (JSON). 이 파일이 있어야만 저장본이 존재하는 것으로 봅니다.
//!
//! 쓰기 순서: 새 데이터 파일을 끝까지 쓰고 fsync → `index.marker.tmp` 작성 후
//! `index.marker`로 rename (커밋 지점) → 이전 데이터 파일 정리.
//! 커밋 전에 실패하면 기존 마커가 기존 데이터 파일을 그대로 가리킵니다.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::vector::{Chunk, Metadata};

/// 센티널 파일 이름
pub const MARKER_FILE: &str = "index.marker";

const MARKER_TMP_FILE: &str = "index.marker.tmp";
const MARKER_VERSION: u32 = 1;
const DATA_FILE_PREFIX: &str = "chunks-";
const DATA_FILE_SUFFIX: &str = ".db";

// ============================================================================
// Types
// ============================================================================

/// 센티널 파일 내용
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMarker {
    version: u32,
    data_file: String,
    dimension: usize,
    chunk_count: usize,
    /// 데이터 파일의 SHA-256 (hex)
    checksum: String,
    persisted_at: DateTime<Utc>,
}

/// 디스크에서 읽은 인덱스
#[derive(Debug)]
pub struct PersistedIndex {
    pub chunks: Vec<Chunk>,
    pub dimension: usize,
    pub persisted_at: DateTime<Utc>,
}

// ============================================================================
// ChunkStore
// ============================================================================

/// 인덱스 디렉토리 핸들
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// 인덱스 디렉토리 경로
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 이전 저장본 존재 여부 (센티널 파일 기준)
    pub fn exists(&self) -> bool {
        self.dir.join(MARKER_FILE).is_file()
    }

    /// 저장본 읽기
    ///
    /// # Returns
    /// - `Ok(None)`: 센티널이 없음 (저장본 없음)
    /// - `Err(_)`: 저장본이 손상됨
    pub fn load(&self) -> Result<Option<PersistedIndex>> {
        let marker_path = self.dir.join(MARKER_FILE);
        if !marker_path.is_file() {
            return Ok(None);
        }

        let marker_json = std::fs::read_to_string(&marker_path)
            .with_context(|| format!("Failed to read {:?}", marker_path))?;
        let marker: IndexMarker =
            serde_json::from_str(&marker_json).context("Failed to parse index marker")?;

        if marker.version != MARKER_VERSION {
            bail!("Unsupported index version: {}", marker.version);
        }
        if !is_data_file_name(&marker.data_file) {
            bail!("Invalid data file name in marker: {}", marker.data_file);
        }

        let data_path = self.dir.join(&marker.data_file);
        let checksum = sha256_file(&data_path)?;
        if checksum != marker.checksum {
            bail!("Checksum mismatch for {:?}", data_path);
        }

        let chunks = read_chunks(&data_path, marker.dimension)?;
        if chunks.len() != marker.chunk_count {
            bail!(
                "Chunk count mismatch: marker says {}, data file has {}",
                marker.chunk_count,
                chunks.len()
            );
        }

        tracing::debug!("Read {} chunks from {:?}", chunks.len(), data_path);

        Ok(Some(PersistedIndex {
            chunks,
            dimension: marker.dimension,
            persisted_at: marker.persisted_at,
        }))
    }

    /// 청크 전체를 원자적으로 저장
    pub fn write(&self, chunks: &[Arc<Chunk>], dimension: usize) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create index directory {:?}", self.dir))?;

        // 1. 새 데이터 파일
        let data_file = format!(
            "{}{}{}",
            DATA_FILE_PREFIX,
            Uuid::new_v4().simple(),
            DATA_FILE_SUFFIX
        );
        let data_path = self.dir.join(&data_file);

        if let Err(e) = write_chunks(&data_path, chunks) {
            let _ = std::fs::remove_file(&data_path);
            return Err(e);
        }
        File::open(&data_path)
            .and_then(|f| f.sync_all())
            .with_context(|| format!("Failed to sync {:?}", data_path))?;

        // 2. 센티널 (tmp → rename)
        let marker = IndexMarker {
            version: MARKER_VERSION,
            data_file: data_file.clone(),
            dimension,
            chunk_count: chunks.len(),
            checksum: sha256_file(&data_path)?,
            persisted_at: Utc::now(),
        };
        let marker_json = serde_json::to_string_pretty(&marker)?;

        let tmp_path = self.dir.join(MARKER_TMP_FILE);
        {
            let mut tmp = File::create(&tmp_path)
                .with_context(|| format!("Failed to create {:?}", tmp_path))?;
            tmp.write_all(marker_json.as_bytes())?;
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, self.dir.join(MARKER_FILE))
            .context("Failed to commit index marker")?;
        sync_dir(&self.dir);

        // 3. 이전 데이터 파일 정리 (커밋 이후)
        self.remove_stale_data_files(&data_file);

        tracing::info!(
            "Persisted {} chunks to {:?} ({})",
            chunks.len(),
            self.dir,
            data_file
        );
        Ok(())
    }

    fn remove_stale_data_files(&self, current: &str) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Failed to list {:?}: {}", self.dir, e);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name != current && is_data_file_name(name) {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    tracing::debug!("Failed to remove stale data file {}: {}", name, e);
                }
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn is_data_file_name(name: &str) -> bool {
    name.starts_with(DATA_FILE_PREFIX)
        && name.ends_with(DATA_FILE_SUFFIX)
        && !name.contains(['/', '\\'])
}

/// SQLite 데이터 파일 작성
fn write_chunks(path: &Path, chunks: &[Arc<Chunk>]) -> Result<()> {
    let mut conn = Connection::open(path).context("Failed to create chunk database")?;

    conn.execute_batch(
        "CREATE TABLE chunks (
            seq INTEGER PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            text TEXT NOT NULL,
            metadata TEXT NOT NULL,
            embedding BLOB NOT NULL
        )",
    )
    .context("Failed to create chunks table")?;

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO chunks (seq, id, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;

        for (seq, chunk) in chunks.iter().enumerate() {
            let metadata = serde_json::to_string(&chunk.metadata)?;
            stmt.execute(params![
                seq as i64,
                chunk.id,
                chunk.text,
                metadata,
                encode_embedding(&chunk.embedding)
            ])
            .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;
        }
    }
    tx.commit().context("Failed to commit chunk database")?;

    conn.close()
        .map_err(|(_, e)| e)
        .context("Failed to close chunk database")?;
    Ok(())
}

/// SQLite 데이터 파일 읽기 (삽입 순서)
fn read_chunks(path: &Path, dimension: usize) -> Result<Vec<Chunk>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open {:?}", path))?;

    let mut stmt =
        conn.prepare("SELECT id, text, metadata, embedding FROM chunks ORDER BY seq")?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Vec<u8>>(3)?,
        ))
    })?;

    let mut chunks = Vec::new();
    for row in rows {
        let (id, text, metadata, blob) = row?;
        let metadata: Metadata = serde_json::from_str(&metadata)
            .with_context(|| format!("Invalid metadata for chunk {}", id))?;
        let embedding = decode_embedding(&blob)
            .with_context(|| format!("Invalid embedding for chunk {}", id))?;

        if embedding.len() != dimension {
            bail!(
                "Chunk {} has dimension {}, expected {}",
                id,
                embedding.len(),
                dimension
            );
        }

        chunks.push(Chunk {
            id,
            text,
            embedding,
            metadata,
        });
    }

    Ok(chunks)
}

/// f32 벡터 → little-endian 바이트
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// little-endian 바이트 → f32 벡터
fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!("Embedding blob length {} is not a multiple of 4", bytes.len());
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// 디렉토리 엔트리(rename) 내구성 확보
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!("Failed to sync directory {:?}: {}", dir, e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

// ============================================================================
// Tests
// ============================================================================
