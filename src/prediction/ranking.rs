//! スコアベクトルの上位K件の抽出
//!
//! 信頼度の降順、同値はラベルindexの昇順で並べる。

use std::cmp::Ordering;

use crate::error::{RecognizerError, Result};
use crate::model::LabelTable;
use crate::types::{PredictionResult, RankedPrediction};

/// 既定の上位件数
pub const DEFAULT_TOP_K: usize = 5;

/// 全クラスのindexを並べ替える
pub fn ranked_indices(scores: &[f32]) -> Result<Vec<usize>> {
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(RecognizerError::inference(format!(
            "model produced a non-finite score at index {}",
            index
        )));
    }

    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    Ok(indices)
}

/// 上位 `k` 件を取り出して予測結果を作る（`k` はクラス数で頭打ち）
pub fn top_k(scores: &[f32], labels: &LabelTable, k: usize) -> Result<PredictionResult> {
    if scores.len() != labels.len() {
        return Err(RecognizerError::model_load(format!(
            "{} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }

    let ranked: Vec<RankedPrediction> = ranked_indices(scores)?
        .into_iter()
        .take(k.max(1))
        .filter_map(|index| {
            labels.name(index).map(|name| RankedPrediction {
                label: name.to_string(),
                confidence: scores[index],
            })
        })
        .collect();

    let best = ranked
        .first()
        .cloned()
        .ok_or_else(|| RecognizerError::inference("model produced no scores"))?;

    Ok(PredictionResult { best, top_k: ranked })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn alphabet(n: usize) -> LabelTable {
        let names = (0..n).map(|i| format!("L{}", i)).collect();
        LabelTable::from_names(names).unwrap()
    }

    #[test]
    fn test_top_five_of_twenty_nine() {
        let labels = alphabet(29);
        let mut scores = vec![0.01f32; 29];
        scores[3] = 0.4;
        scores[7] = 0.2;
        scores[28] = 0.1;
        let result = top_k(&scores, &labels, DEFAULT_TOP_K).unwrap();

        assert_eq!(result.top_k.len(), 5);
        assert_eq!(result.best.label, "L3");
        assert_eq!(result.top_k[1].label, "L7");
        assert_eq!(result.top_k[2].label, "L28");
        // 残りは同値なのでindex昇順
        assert_eq!(result.top_k[3].label, "L0");
        assert_eq!(result.top_k[4].label, "L1");
    }

    #[test]
    fn test_fewer_classes_than_k() {
        let labels = alphabet(3);
        let result = top_k(&[0.2, 0.5, 0.3], &labels, 5).unwrap();
        assert_eq!(result.top_k.len(), 3);
        assert_eq!(result.best.label, "L1");
    }

    #[test]
    fn test_nan_is_inference_error() {
        let labels = alphabet(2);
        let err = top_k(&[f32::NAN, 0.5], &labels, 5).unwrap_err();
        assert!(matches!(err, RecognizerError::Inference(_)));
    }

    #[test]
    fn test_length_mismatch_is_model_load_error() {
        let labels = alphabet(3);
        assert!(matches!(top_k(&[0.5, 0.5], &labels, 5), Err(RecognizerError::ModelLoad(_))));
    }

    proptest! {
        #[test]
        fn prop_top_k_is_ordered_and_unique(
            scores in prop::collection::vec(prop_oneof![0.0f32..=1.0, Just(0.25f32)], 1..40),
            k in 1usize..10,
        ) {
            let labels = alphabet(scores.len());
            let result = top_k(&scores, &labels, k).unwrap();

            prop_assert_eq!(result.top_k.len(), k.min(scores.len()));
            prop_assert_eq!(&result.best, &result.top_k[0]);

            let unique: HashSet<&str> = result.top_k.iter().map(|p| p.label.as_str()).collect();
            prop_assert_eq!(unique.len(), result.top_k.len());

            for pair in result.top_k.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(a.confidence >= b.confidence);
                if a.confidence == b.confidence {
                    let ia: usize = a.label[1..].parse().unwrap();
                    let ib: usize = b.label[1..].parse().unwrap();
                    prop_assert!(ia < ib);
                }
            }

            // 選ばれなかったクラスはどれも末尾以下
            let last = result.top_k.last().unwrap().confidence;
            let chosen: HashSet<usize> = result.top_k.iter().map(|p| p.label[1..].parse().unwrap()).collect();
            for (i, s) in scores.iter().enumerate() {
                if !chosen.contains(&i) {
                    prop_assert!(*s <= last);
                }
            }
        }
    }
}
