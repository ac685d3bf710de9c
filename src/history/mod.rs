pub mod durable;
pub mod export;
mod ring_buffer;
pub mod store;
pub mod transient;

pub use export::{parse_export, write_records, ExportFormat, ExportedRow, EXPORT_HEADER};
pub use store::HistoryStore;

use std::collections::BTreeMap;

use crate::types::HistoryStatistics;

/// (文字, 確信度) の列から集計する。最頻文字が同数なら辞書順で小さい方
pub(crate) fn summarize<'a>(entries: impl Iterator<Item = (&'a str, f64)>) -> HistoryStatistics {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    let mut sum = 0.0f64;
    for (letter, confidence) in entries {
        *counts.entry(letter).or_insert(0) += 1;
        total += 1;
        sum += confidence;
    }

    // max_by_key は同値なら後ろを返すので、逆順に走査して辞書順最小を残す
    let most_common = counts
        .into_iter()
        .rev()
        .max_by_key(|(_, count)| *count);

    HistoryStatistics {
        total,
        most_common_letter: most_common.map(|(letter, _)| letter.to_string()),
        most_common_count: most_common.map(|(_, count)| count).unwrap_or(0),
        average_confidence: if total == 0 { 0.0 } else { sum / total as f64 },
    }
}
