//! CSV 로더 - 행마다 문서 하나
//!
//! 첫 행을 헤더로 보고, 각 행을 `header: value` 줄로 만듭니다.
//! 따옴표 필드(쉼표, 줄바꿈, `""` 이스케이프 포함)를 지원합니다.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{RagError, RagResult};

use super::{read_text, DocumentLoader, LoadedDocument};

/// 행 번호 메타데이터 키 (0부터)
pub const ROW_KEY: &str = "row";

/// CSV 파일 → 행별 문서
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvLoader;

#[async_trait]
impl DocumentLoader for CsvLoader {
    async fn load(&self, path: &Path) -> RagResult<Vec<LoadedDocument>> {
        let raw = read_text(path).await?;
        let rows =
            parse_csv(&raw).map_err(|e| RagError::Load(format!("{}: {}", path.display(), e)))?;

        let mut rows = rows.into_iter();
        let Some(headers) = rows.next() else {
            return Ok(vec![]);
        };

        let documents = rows
            .filter(|row| row.iter().any(|field| !field.trim().is_empty()))
            .enumerate()
            .map(|(i, row)| {
                let text = headers
                    .iter()
                    .zip(row.iter().map(String::as_str).chain(std::iter::repeat("")))
                    .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
                    .collect::<Vec<_>>()
                    .join("\n");
                LoadedDocument::new(text, path).with_meta(ROW_KEY, i)
            })
            .collect();

        Ok(documents)
    }

    fn name(&self) -> &'static str {
        "CsvLoader"
    }
}

/// CSV 텍스트 → 행 목록
///
/// 닫히지 않은 따옴표는 에러입니다. 빈 줄은 건너뜁니다.
pub fn parse_csv(input: &str) -> Result<Vec<Vec<String>>, String> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => end_row(&mut rows, &mut row, &mut field),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(format!("unterminated quoted field in row {}", rows.len() + 1));
    }
    end_row(&mut rows, &mut row, &mut field);

    Ok(rows)
}

fn end_row(rows: &mut Vec<Vec<String>>, row: &mut Vec<String>, field: &mut String) {
    row.push(std::mem::take(field));
    let finished = std::mem::take(row);
    // 완전히 빈 줄은 행으로 치지 않음
    if !(finished.len() == 1 && finished[0].is_empty()) {
        rows.push(finished);
    }
}
