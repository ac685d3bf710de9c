//! 履歴のエクスポート
//!
//! 区切り文字付きテキスト。ヘッダー `#, Letter, Confidence (%), Timestamp`、
//! 行の順番は一覧表示と同じ新しい順。

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::types::HistoryRecord;

pub const EXPORT_HEADER: [&str; 4] = ["#", "Letter", "Confidence (%)", "Timestamp"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// エクスポート形式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    #[default]
    Csv,
    Tsv,
}

impl ExportFormat {
    fn delimiter(self) -> u8 {
        match self {
            ExportFormat::Csv => b',',
            ExportFormat::Tsv => b'\t',
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
        }
    }

    /// 出力先を指定しない場合のファイル名
    pub fn default_file_name(self) -> String {
        format!("predictions.{}", self.extension())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "tsv" => Ok(ExportFormat::Tsv),
            other => bail!("unknown export format: {}", other),
        }
    }
}

/// エクスポートファイルの1行
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedRow {
    pub sequence: usize,
    pub letter: String,
    pub confidence_percent: f64,
    pub timestamp: NaiveDateTime,
}

/// レコード列（新しい順）をエクスポート形式へ書き出す
pub fn write_records(records: &[HistoryRecord], format: ExportFormat) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(format.delimiter())
        .from_writer(Vec::new());

    writer.write_record(EXPORT_HEADER)?;
    for (i, record) in records.iter().enumerate() {
        writer.write_record([
            (i + 1).to_string(),
            record.letter.clone(),
            format!("{:.2}", record.confidence * 100.0),
            record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush export: {}", e))
}

/// エクスポート済みのテキストを読み戻す
pub fn parse_export(bytes: &[u8], format: ExportFormat) -> Result<Vec<ExportedRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(format.delimiter())
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    if headers.iter().ne(EXPORT_HEADER.iter().copied()) {
        bail!("unexpected export header: {:?}", headers);
    }

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result?;
        let field = |i: usize, name: &str| {
            record
                .get(i)
                .ok_or_else(|| anyhow::anyhow!("row {}: missing {}", line + 1, name))
        };

        rows.push(ExportedRow {
            sequence: field(0, "sequence")?
                .parse()
                .with_context(|| format!("row {}: invalid sequence", line + 1))?,
            letter: field(1, "letter")?.to_string(),
            confidence_percent: field(2, "confidence")?
                .parse()
                .with_context(|| format!("row {}: invalid confidence", line + 1))?,
            timestamp: NaiveDateTime::parse_from_str(field(3, "timestamp")?, TIMESTAMP_FORMAT)
                .with_context(|| format!("row {}: invalid timestamp", line + 1))?,
        });
    }

    Ok(rows)
}
