//! 予測履歴ストア
//!
//! 失敗時の扱いは操作ごとに決まっている。
//! - `record` / `clear`: 失敗は `StoreWrite` として呼び出し元へ返す（永続化を約束する操作）
//! - `list` / `statistics`: 失敗はログに残して空・ゼロの結果を返す（履歴が壊れても予測は止めない）
//! - `export`: 失敗は `StoreRead` として返す（空のファイルを成功扱いにしない）
//!
//! 追加と上限超過時の削除は1つのロックの中で行うので、同時に追加されても
//! 上限を超えたり、1回の溢れで2件以上消えたりしない。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{RecognizerError, Result};
use crate::history::durable::DurableHistory;
use crate::history::export::{write_records, ExportFormat};
use crate::history::transient::TransientHistory;
use crate::model::{HistoryMode, HistorySettings};
use crate::types::{HistoryRecord, HistoryStatistics};

#[derive(Debug)]
enum HistoryBackend {
    Transient(TransientHistory),
    Durable(DurableHistory),
}

#[derive(Debug)]
pub struct HistoryStore {
    backend: Mutex<HistoryBackend>,
    mode: HistoryMode,
    recent_limit: usize,
}

impl HistoryStore {
    /// メモリ上の上限付きストア
    pub fn transient(capacity: usize) -> Self {
        Self {
            backend: Mutex::new(HistoryBackend::Transient(TransientHistory::new(capacity))),
            mode: HistoryMode::Transient,
            recent_limit: HistorySettings::default().recent_limit,
        }
    }

    /// SQLiteの永続ストア
    pub fn durable(path: &Path) -> Result<Self> {
        let history = DurableHistory::open(path)
            .map_err(|e| RecognizerError::store_write(format!("{:#}", e)))?;
        info!(path = %path.display(), "opened history database");
        Ok(Self {
            backend: Mutex::new(HistoryBackend::Durable(history)),
            mode: HistoryMode::Durable,
            recent_limit: HistorySettings::default().recent_limit,
        })
    }

    pub fn from_settings(settings: &HistorySettings) -> Result<Self> {
        let store = match settings.mode {
            HistoryMode::Transient => Self::transient(settings.capacity),
            HistoryMode::Durable => Self::durable(Path::new(&settings.db_path))?,
        };
        Ok(store.with_recent_limit(settings.recent_limit))
    }

    pub fn with_recent_limit(mut self, recent_limit: usize) -> Self {
        self.recent_limit = recent_limit;
        self
    }

    pub fn mode(&self) -> HistoryMode {
        self.mode
    }

    /// 予測を1件追加する
    pub fn record(&self, letter: &str, confidence: f64) -> Result<HistoryRecord> {
        if !confidence.is_finite() {
            return Err(RecognizerError::store_write(format!(
                "confidence must be finite, got {}",
                confidence
            )));
        }
        // softmax の丸め誤差で 1.0 をわずかに超えることがある
        let confidence = confidence.clamp(0.0, 1.0);

        let mut backend = self.lock_for_write()?;
        match &mut *backend {
            HistoryBackend::Transient(history) => Ok(history.record(letter, confidence)),
            HistoryBackend::Durable(history) => history
                .record(letter, confidence)
                .map_err(|e| RecognizerError::store_write(format!("{:#}", e))),
        }
    }

    /// 全件削除
    pub fn clear(&self) -> Result<()> {
        let mut backend = self.lock_for_write()?;
        match &mut *backend {
            HistoryBackend::Transient(history) => {
                history.clear();
                Ok(())
            }
            HistoryBackend::Durable(history) => history
                .clear()
                .map_err(|e| RecognizerError::store_write(format!("{:#}", e))),
        }?;
        info!(mode = %self.mode, "prediction history cleared");
        Ok(())
    }

    /// 新しい順に最大 `limit` 件。読み込みに失敗したら空
    pub fn list(&self, limit: usize) -> Vec<HistoryRecord> {
        match self.try_list(Some(limit)) {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "failed reading prediction history");
                Vec::new()
            }
        }
    }

    /// 既定件数での一覧
    pub fn recent(&self) -> Vec<HistoryRecord> {
        self.list(self.recent_limit)
    }

    /// 集計。読み込みに失敗したらゼロ
    pub fn statistics(&self) -> HistoryStatistics {
        let outcome = self.lock_for_read().and_then(|backend| match &*backend {
            HistoryBackend::Transient(history) => Ok(history.statistics()),
            HistoryBackend::Durable(history) => history
                .statistics()
                .map_err(|e| RecognizerError::store_read(format!("{:#}", e))),
        });
        match outcome {
            Ok(stats) => stats,
            Err(err) => {
                warn!(error = %err, "failed reading prediction statistics");
                HistoryStatistics::default()
            }
        }
    }

    /// 全件を一覧と同じ順でエクスポート
    pub fn export(&self, format: ExportFormat) -> Result<Vec<u8>> {
        let records = self.try_list(None)?;
        write_records(&records, format).map_err(|e| RecognizerError::store_read(format!("{:#}", e)))
    }

    /// ストアが読み書きできる状態か
    pub fn is_available(&self) -> bool {
        match self.lock_for_read() {
            Ok(backend) => match &*backend {
                HistoryBackend::Transient(_) => true,
                HistoryBackend::Durable(history) => history.is_available(),
            },
            Err(_) => false,
        }
    }

    fn try_list(&self, limit: Option<usize>) -> Result<Vec<HistoryRecord>> {
        let backend = self.lock_for_read()?;
        match &*backend {
            HistoryBackend::Transient(history) => Ok(history.list(limit)),
            HistoryBackend::Durable(history) => history
                .list(limit)
                .map_err(|e| RecognizerError::store_read(format!("{:#}", e))),
        }
    }

    fn lock_for_write(&self) -> Result<MutexGuard<'_, HistoryBackend>> {
        self.backend
            .lock()
            .map_err(|_| RecognizerError::store_write("history lock poisoned"))
    }

    fn lock_for_read(&self) -> Result<MutexGuard<'_, HistoryBackend>> {
        self.backend
            .lock()
            .map_err(|_| RecognizerError::store_read("history lock poisoned"))
    }
}
