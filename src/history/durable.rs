//! SQLiteによる永続履歴
//!
//! テーブル `predictions(id, letter, confidence, timestamp)`。
//! 挿入時は `id` と `timestamp` を指定せず、DB側の既定値に任せる。

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::Path;

use crate::types::{HistoryRecord, HistoryStatistics};

const SCHEMA: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;
    CREATE TABLE IF NOT EXISTS predictions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        letter TEXT NOT NULL,
        confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
        timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
    );
    CREATE INDEX IF NOT EXISTS idx_predictions_timestamp ON predictions(timestamp);
";

#[derive(Debug)]
pub struct DurableHistory {
    conn: Connection,
}

impl DurableHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed creating history directory {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed opening history database {}", path.display()))?;
        conn.execute_batch(SCHEMA)
            .context("failed initializing history schema")?;

        Ok(Self { conn })
    }

    pub fn record(&self, letter: &str, confidence: f64) -> Result<HistoryRecord> {
        self.conn
            .query_row(
                "INSERT INTO predictions (letter, confidence) VALUES (?1, ?2)
                 RETURNING id, letter, confidence, timestamp",
                params![letter, confidence],
                read_record,
            )
            .context("failed inserting prediction")
    }

    /// 新しい順。`limit` が `None` なら全件
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<HistoryRecord>> {
        // SQLiteでは負のLIMITは無制限
        let limit = limit.map(|n| n.min(i64::MAX as usize) as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            "SELECT id, letter, confidence, timestamp FROM predictions
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], read_record)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn statistics(&self) -> Result<HistoryStatistics> {
        let (total, average): (i64, Option<f64>) = self.conn.query_row(
            "SELECT COUNT(*), AVG(confidence) FROM predictions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let most_common: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT letter, COUNT(*) AS n FROM predictions
                 GROUP BY letter ORDER BY n DESC, letter ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(HistoryStatistics {
            total: total.max(0) as usize,
            most_common_count: most_common.as_ref().map(|(_, n)| (*n).max(0) as usize).unwrap_or(0),
            most_common_letter: most_common.map(|(letter, _)| letter),
            average_confidence: average.unwrap_or(0.0),
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM predictions", [])
            .context("failed clearing predictions")?;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.conn
            .query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let raw: String = row.get(3)?;
    let timestamp = parse_timestamp(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(HistoryRecord {
        id: row.get(0)?,
        letter: row.get(1)?,
        confidence: row.get(2)?,
        timestamp,
    })
}

/// `CURRENT_TIMESTAMP` 形式（秒まで）とミリ秒付きの両方を受け付ける
pub(crate) fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
}
