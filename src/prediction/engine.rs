//! 予測エンジン
//!
//! `preprocess → ModelRuntime::infer → top_k → HistoryStore::record` を1つの入口にまとめる。
//! 成功した予測だけが履歴に残る。前処理・推論の失敗は型付きエラーとして返し、記録しない。

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RecognizerError, Result};
use crate::history::HistoryStore;
use crate::ml::ModelRuntime;
use crate::model::InferenceSettings;
use crate::prediction::preprocess::preprocess;
use crate::prediction::ranking::top_k;
use crate::types::{HistoryRecord, PixelFrame, PredictionResult};

/// 分類済みの予測と、その記録結果
///
/// 記録に失敗しても予測結果は呼び出し元へ返す。保存されなかったことは
/// `record` の `Err` で伝える。
#[derive(Debug)]
pub struct Classified {
    pub result: PredictionResult,
    pub record: std::result::Result<HistoryRecord, RecognizerError>,
}

impl Classified {
    /// 履歴に保存されたか
    pub fn saved(&self) -> bool {
        self.record.is_ok()
    }
}

#[derive(Debug)]
pub enum PredictOutcome {
    /// 入力画像なし。何もしていない
    NoImage,
    Classified(Classified),
}

impl PredictOutcome {
    pub fn result(&self) -> Option<&PredictionResult> {
        match self {
            PredictOutcome::NoImage => None,
            PredictOutcome::Classified(classified) => Some(&classified.result),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredictionEngine {
    runtime: Arc<ModelRuntime>,
    history: Arc<HistoryStore>,
    top_k: usize,
    jpeg_quality: u8,
}

impl PredictionEngine {
    pub fn new(runtime: Arc<ModelRuntime>, history: Arc<HistoryStore>, settings: &InferenceSettings) -> Self {
        Self {
            runtime,
            history,
            top_k: settings.top_k,
            jpeg_quality: settings.jpeg_quality,
        }
    }

    pub fn runtime(&self) -> &Arc<ModelRuntime> {
        &self.runtime
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// モデル入力用のJPEGバイト列を作る
    pub fn preprocess(&self, frame: Option<&PixelFrame>) -> Result<Option<Vec<u8>>> {
        preprocess(frame, self.jpeg_quality)
    }

    /// 推論と上位K件の抽出のみ（履歴には書かない）
    pub fn classify(&self, frame: Option<&PixelFrame>) -> Result<Option<PredictionResult>> {
        let Some(encoded) = self.preprocess(frame)? else {
            return Ok(None);
        };

        let labels = self
            .runtime
            .labels()
            .ok_or_else(|| RecognizerError::inference("model not loaded"))?;
        let scores = self.runtime.infer(&encoded)?;
        let result = top_k(&scores, &labels, self.top_k)?;

        debug!(
            letter = %result.best.label,
            confidence = result.best.confidence,
            "classified frame"
        );
        Ok(Some(result))
    }

    /// 1フレームを分類し、成功したら履歴に記録する
    pub fn predict(&self, frame: Option<&PixelFrame>) -> Result<PredictOutcome> {
        let classified = self.classify(frame).map_err(|err| {
            warn!(error = %err, "prediction failed");
            err
        })?;

        Ok(match classified {
            None => PredictOutcome::NoImage,
            Some(result) => PredictOutcome::Classified(self.record(result)),
        })
    }

    /// `predict` を期限付きで実行する
    ///
    /// 前処理と推論はブロッキングスレッドで走らせる。期限を過ぎたら `Timeout` を返し、
    /// 後から推論が終わっても結果は捨てられて記録されない。
    pub async fn predict_within(&self, frame: Option<PixelFrame>, deadline: Duration) -> Result<PredictOutcome> {
        let engine = self.clone();
        let result = tokio::time::timeout(deadline, async move {
            tokio::task::spawn_blocking(move || engine.classify(frame.as_ref()))
                .await
                .map_err(|e| RecognizerError::inference(format!("inference task failed: {}", e)))?
        })
        .await;

        let classified = match result {
            Ok(inner) => inner,
            Err(_) => Err(RecognizerError::Timeout(deadline.as_millis().min(u64::MAX as u128) as u64)),
        }
        .map_err(|err| {
            warn!(error = %err, "prediction failed");
            err
        })?;

        Ok(match classified {
            None => PredictOutcome::NoImage,
            Some(result) => PredictOutcome::Classified(self.record(result)),
        })
    }

    fn record(&self, result: PredictionResult) -> Classified {
        let record = self
            .history
            .record(&result.best.label, f64::from(result.best.confidence));
        if let Err(err) = &record {
            warn!(error = %err, letter = %result.best.label, "prediction was not saved to history");
        }
        Classified { result, record }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ClassifierBackend;
    use crate::model::{DeviceType, LabelTable, ModelSettings};
    use crate::types::ChannelOrder;
    use proptest::prelude::*;

    const ALPHABET: [&str; 29] = [
        "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
        "T", "U", "V", "W", "X", "Y", "Z", "del", "nothing", "space",
    ];

    /// 固定ロジットをsoftmaxして返すスタブ
    struct Softmax(Vec<f32>);

    impl ClassifierBackend for Softmax {
        fn infer(&mut self, encoded_image: &[u8]) -> anyhow::Result<Vec<f32>> {
            anyhow::ensure!(encoded_image.starts_with(&[0xFF, 0xD8]), "not a jpeg stream");
            let max = self.0.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = self.0.iter().map(|v| (v - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            Ok(exps.into_iter().map(|v| v / sum).collect())
        }
    }

    struct Broken;

    impl ClassifierBackend for Broken {
        fn infer(&mut self, _encoded_image: &[u8]) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("execution context rejected the request")
        }
    }

    struct Slow;

    impl ClassifierBackend for Slow {
        fn infer(&mut self, _encoded_image: &[u8]) -> anyhow::Result<Vec<f32>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(vec![1.0])
        }
    }

    fn engine_with(names: &[&str], backend: Box<dyn ClassifierBackend>) -> PredictionEngine {
        let runtime = Arc::new(ModelRuntime::new(ModelSettings::default(), DeviceType::Cpu));
        let labels = LabelTable::from_names(names.iter().map(|s| s.to_string()).collect()).unwrap();
        runtime.install(labels, backend).unwrap();
        PredictionEngine::new(runtime, Arc::new(HistoryStore::transient(20)), &InferenceSettings::default())
    }

    fn alphabet_engine(logits: Vec<f32>) -> PredictionEngine {
        engine_with(&ALPHABET, Box::new(Softmax(logits)))
    }

    fn rgb_frame() -> PixelFrame {
        PixelFrame::new(8, 8, 3, vec![120; 8 * 8 * 3])
    }

    fn classified(outcome: PredictOutcome) -> Classified {
        match outcome {
            PredictOutcome::Classified(c) => c,
            PredictOutcome::NoImage => panic!("expected a classified outcome"),
        }
    }

    #[test]
    fn test_predict_records_best_label() {
        let mut logits = vec![0.0; 29];
        logits[2] = 5.0;
        let engine = alphabet_engine(logits);

        let c = classified(engine.predict(Some(&rgb_frame())).unwrap());
        assert_eq!(c.result.best.label, "C");
        assert_eq!(c.result.top_k.len(), 5);
        assert_eq!(c.result.best, c.result.top_k[0]);
        assert!(c.saved());

        let latest = engine.history().list(1);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].letter, "C");
        assert_eq!(latest[0].confidence, f64::from(c.result.best.confidence));
    }

    #[test]
    fn test_no_image_does_nothing() {
        let engine = alphabet_engine(vec![0.0; 29]);
        assert!(matches!(engine.predict(None).unwrap(), PredictOutcome::NoImage));
        assert!(engine.history().list(20).is_empty());
    }

    #[test]
    fn test_grayscale_and_rgba_inputs_are_accepted() {
        let engine = alphabet_engine(vec![0.0; 29]);
        let gray = PixelFrame::new(8, 8, 1, vec![10; 64]);
        let rgba = PixelFrame::new(8, 8, 4, vec![200; 256]);
        let bgr = rgb_frame().with_order(ChannelOrder::Bgr);
        for frame in [gray, rgba, bgr] {
            assert!(engine.predict(Some(&frame)).is_ok());
        }
        assert_eq!(engine.history().list(20).len(), 3);
    }

    #[test]
    fn test_invalid_image_is_not_recorded() {
        let engine = alphabet_engine(vec![0.0; 29]);
        let two_channel = PixelFrame::new(8, 8, 2, vec![0; 128]);
        let err = engine.predict(Some(&two_channel)).unwrap_err();
        assert!(matches!(err, RecognizerError::InvalidImage(_)));
        assert!(engine.history().list(20).is_empty());
    }

    #[test]
    fn test_inference_failure_is_not_recorded() {
        let engine = engine_with(&["A", "B"], Box::new(Broken));
        let err = engine.predict(Some(&rgb_frame())).unwrap_err();
        assert!(matches!(err, RecognizerError::Inference(_)));
        assert_eq!(engine.history().statistics().total, 0);
    }

    #[test]
    fn test_unloaded_runtime_fails_fast() {
        let runtime = Arc::new(ModelRuntime::new(ModelSettings::default(), DeviceType::Cpu));
        let engine = PredictionEngine::new(runtime, Arc::new(HistoryStore::transient(20)), &InferenceSettings::default());
        assert!(matches!(engine.predict(Some(&rgb_frame())), Err(RecognizerError::Inference(_))));
    }

    #[test]
    fn test_fewer_labels_than_k() {
        let engine = engine_with(&["yes", "no"], Box::new(Softmax(vec![0.1, 0.9])));
        let result = engine.classify(Some(&rgb_frame())).unwrap().unwrap();
        assert_eq!(result.top_k.len(), 2);
        assert_eq!(result.best.label, "no");
        assert!(engine.history().list(20).is_empty());
    }

    #[tokio::test]
    async fn test_predict_within_records_on_success() {
        let engine = alphabet_engine(vec![0.0; 29]);
        let outcome = engine
            .predict_within(Some(rgb_frame()), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(classified(outcome).saved());
        assert_eq!(engine.history().list(20).len(), 1);
    }

    #[tokio::test]
    async fn test_predict_within_timeout_records_nothing() {
        let engine = engine_with(&["A"], Box::new(Slow));
        let err = engine
            .predict_within(Some(rgb_frame()), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, RecognizerError::Timeout(20)));

        // 遅れて終わった推論も記録されない
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(engine.history().list(20).is_empty());
    }

    proptest! {
        #[test]
        fn prop_probabilities_sum_to_one_and_top_k_is_sorted(
            logits in proptest::collection::vec(-10.0f32..10.0, 29)
        ) {
            let engine = alphabet_engine(logits);
            let encoded = engine.preprocess(Some(&rgb_frame())).unwrap().unwrap();
            let scores = engine.runtime().infer(&encoded).unwrap();
            let sum: f32 = scores.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-4);

            let result = engine.classify(Some(&rgb_frame())).unwrap().unwrap();
            prop_assert_eq!(result.top_k.len(), 5);
            for pair in result.top_k.windows(2) {
                prop_assert!(pair[0].confidence >= pair[1].confidence);
                prop_assert_ne!(&pair[0].label, &pair[1].label);
            }
        }
    }
}
