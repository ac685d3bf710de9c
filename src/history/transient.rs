//! メモリ上の上限付き履歴

use chrono::Utc;

use crate::history::ring_buffer::RingBuffer;
use crate::history::summarize;
use crate::types::{HistoryRecord, HistoryStatistics};

/// 既定の保持件数
pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug)]
pub struct TransientHistory {
    records: RingBuffer<HistoryRecord>,
    last_id: i64,
}

impl TransientHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RingBuffer::new(capacity),
            last_id: 0,
        }
    }

    /// 追加と、溢れた場合の最古レコードの削除
    pub fn record(&mut self, letter: &str, confidence: f64) -> HistoryRecord {
        // clear後もIDは巻き戻さない
        self.last_id += 1;
        let record = HistoryRecord {
            id: self.last_id,
            letter: letter.to_string(),
            confidence,
            timestamp: Utc::now(),
        };
        if let Some(evicted) = self.records.push(record.clone()) {
            tracing::debug!(
                id = evicted.id,
                retained = self.records.len(),
                capacity = self.records.capacity(),
                "evicted oldest history record"
            );
        }
        record
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<HistoryRecord> {
        let limit = limit.unwrap_or(usize::MAX);
        self.records.iter_newest_first().take(limit).cloned().collect()
    }

    pub fn statistics(&self) -> HistoryStatistics {
        summarize(
            self.records
                .iter_oldest_first()
                .map(|r| (r.letter.as_str(), r.confidence)),
        )
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twenty_one_into_twenty() {
        let mut history = TransientHistory::new(DEFAULT_CAPACITY);
        for i in 0..21 {
            history.record(&format!("L{}", i), 0.5);
        }
        let records = history.list(Some(20));
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|r| r.letter != "L0"));
        assert_eq!(records[0].letter, "L20");
        assert_eq!(records[19].letter, "L1");
    }

    #[test]
    fn test_ids_keep_increasing_after_clear() {
        let mut history = TransientHistory::new(5);
        let first = history.record("A", 0.9);
        history.clear();
        let second = history.record("B", 0.8);
        assert!(second.id > first.id);
        assert_eq!(history.list(None).len(), 1);
    }
}
