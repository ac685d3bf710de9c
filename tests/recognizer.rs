use std::sync::Arc;
use std::time::Duration;

use sign_recognizer_lib::history::parse_export;
use sign_recognizer_lib::model::{AppConfig, DeviceType, ModelSettings};
use sign_recognizer_lib::{
    ClassifierBackend, ExportFormat, HistoryMode, HistoryStore, LabelTable, ModelRuntime, PixelFrame,
    PredictOutcome, Recognizer, RecognizerError, RuntimeState,
};

/// 入力の平均輝度が高いほど2番目のラベルに寄るスタブ
struct Brightness;

impl ClassifierBackend for Brightness {
    fn infer(&mut self, encoded_image: &[u8]) -> anyhow::Result<Vec<f32>> {
        let image = image::load_from_memory(encoded_image)?.to_luma8();
        let mean = image.pixels().map(|p| p.0[0] as f32).sum::<f32>() / (image.width() * image.height()) as f32;
        let bright = (mean / 255.0).clamp(0.0, 1.0);
        Ok(vec![1.0 - bright, bright, 0.0])
    }
}

fn recognizer(history: HistoryStore) -> Recognizer {
    let runtime = Arc::new(ModelRuntime::new(ModelSettings::default(), DeviceType::Cpu));
    let labels = LabelTable::parse("dark\nbright\nnothing\n").unwrap();
    runtime.install(labels, Box::new(Brightness)).unwrap();
    Recognizer::with_parts(&AppConfig::default(), runtime, Arc::new(history))
}

fn frame(value: u8) -> PixelFrame {
    PixelFrame::new(16, 16, 3, vec![value; 16 * 16 * 3])
}

fn best_label(outcome: PredictOutcome) -> String {
    match outcome {
        PredictOutcome::Classified(c) => {
            assert!(c.saved());
            c.result.best.label
        }
        PredictOutcome::NoImage => panic!("expected a prediction"),
    }
}

#[test]
fn predictions_flow_into_durable_history_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("predictions.db");

    {
        let recognizer = recognizer(HistoryStore::durable(&db).unwrap());
        assert_eq!(best_label(recognizer.predict(Some(&frame(250))).unwrap()), "bright");
        assert_eq!(best_label(recognizer.predict(Some(&frame(5))).unwrap()), "dark");
        assert_eq!(best_label(recognizer.predict(Some(&frame(240))).unwrap()), "bright");

        let status = recognizer.status();
        assert_eq!(status.model_state, RuntimeState::Ready);
        assert_eq!(status.num_labels, 3);
        assert_eq!(status.history_mode, HistoryMode::Durable);
        assert!(status.history_available);
    }

    // 再起動後も残っている
    let reopened = HistoryStore::durable(&db).unwrap();
    let listed = reopened.recent();
    assert_eq!(
        listed.iter().map(|r| r.letter.as_str()).collect::<Vec<_>>(),
        vec!["bright", "dark", "bright"]
    );

    let stats = reopened.statistics();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.most_common_letter.as_deref(), Some("bright"));
    assert_eq!(stats.most_common_count, 2);

    let rows = parse_export(&reopened.export(ExportFormat::Tsv).unwrap(), ExportFormat::Tsv).unwrap();
    assert_eq!(rows.len(), 3);
    for (row, record) in rows.iter().zip(&listed) {
        assert_eq!(row.letter, record.letter);
        assert!((row.confidence_percent - record.confidence * 100.0).abs() <= 0.005 + 1e-9);
    }

    reopened.clear().unwrap();
    assert!(reopened.list(100).is_empty());
    assert_eq!(reopened.statistics().total, 0);
}

#[test]
fn failed_predictions_leave_history_untouched() {
    let recognizer = recognizer(HistoryStore::transient(20));
    let bad = PixelFrame::new(4, 4, 2, vec![0; 32]);
    assert!(matches!(recognizer.predict(Some(&bad)), Err(RecognizerError::InvalidImage(_))));
    assert!(matches!(recognizer.predict(None), Ok(PredictOutcome::NoImage)));
    assert!(recognizer.history().recent().is_empty());
}

#[test]
fn transient_history_keeps_the_newest_twenty() {
    let recognizer = recognizer(HistoryStore::transient(20));
    for i in 0..21u8 {
        recognizer.predict(Some(&frame(i * 10))).unwrap();
    }
    let records = recognizer.history().list(20);
    assert_eq!(records.len(), 20);
    assert!(records.iter().all(|r| r.id != 1));
}

#[tokio::test]
async fn predict_within_uses_configured_deadline() {
    let recognizer = recognizer(HistoryStore::transient(20));
    assert_eq!(recognizer.config().inference.timeout_ms, 10_000);

    let outcome = recognizer.predict_within(Some(frame(200))).await.unwrap();
    assert_eq!(best_label(outcome), "bright");

    let outcome = recognizer
        .engine()
        .predict_within(None, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(matches!(outcome, PredictOutcome::NoImage));
    assert_eq!(recognizer.history().recent().len(), 1);
}

#[test]
fn decoded_image_prediction_has_readable_summary() {
    let recognizer = recognizer(HistoryStore::transient(20));
    let gray = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(12, 12, image::Luma([250])));
    let frame = PixelFrame::from_image(&gray);
    assert_eq!(frame.channels, 1);

    let outcome = recognizer.predict(Some(&frame)).unwrap();
    let summary = outcome.result().unwrap().summary();
    assert!(summary.starts_with("Predicted letter: BRIGHT ("), "{}", summary);
    assert!(summary.ends_with("% confidence)"));
    assert_eq!(recognizer.history().recent()[0].letter, "bright");
}
