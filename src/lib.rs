pub mod error;
pub mod types;

pub mod history;
pub mod ml;
pub mod model;
pub mod prediction;

pub use error::{RecognizerError, Result};
pub use history::{ExportFormat, HistoryStore};
pub use ml::{ClassifierBackend, ModelRuntime, RuntimeState};
pub use model::{AppConfig, HistoryMode, LabelTable};
pub use prediction::{Classified, PredictOutcome, PredictionEngine};
pub use types::{
    ChannelOrder, HistoryRecord, HistoryStatistics, Label, PixelFrame, PredictionResult, RankedPrediction,
};

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// アプリケーション全体の状態
///
/// 起動時に `from_config` で一度だけ作り、プロセス終了（drop）まで保持する。
/// モデルの読み込みに失敗してもインスタンスは作られ、ランタイムは `Failed` のまま残る。
/// その後の予測はすべて即座にエラーになる。
#[derive(Debug)]
pub struct Recognizer {
    config: AppConfig,
    runtime: Arc<ModelRuntime>,
    history: Arc<HistoryStore>,
    engine: PredictionEngine,
}

/// 状態表示用のスナップショット
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizerStatus {
    pub model_state: RuntimeState,
    pub num_labels: usize,
    pub history_mode: HistoryMode,
    pub history_available: bool,
}

impl Recognizer {
    /// 設定からモデルと履歴ストアを準備する
    ///
    /// 履歴ストアが開けない場合はエラーを返す。モデルの失敗はログに残して続行する。
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let history = Arc::new(HistoryStore::from_settings(&config.history)?);
        let runtime = Arc::new(ModelRuntime::new(config.model.clone(), config.device_type.clone()));

        if let Err(err) = runtime.load(
            Path::new(&config.model.model_path),
            Path::new(&config.model.labels_path),
        ) {
            warn!(error = %err, "starting without a usable model");
        }

        Ok(Self::assemble(config.clone(), runtime, history))
    }

    /// 用意済みのランタイムと履歴ストアから組み立てる
    pub fn with_parts(config: &AppConfig, runtime: Arc<ModelRuntime>, history: Arc<HistoryStore>) -> Self {
        Self::assemble(config.clone(), runtime, history)
    }

    fn assemble(config: AppConfig, runtime: Arc<ModelRuntime>, history: Arc<HistoryStore>) -> Self {
        let engine = PredictionEngine::new(Arc::clone(&runtime), Arc::clone(&history), &config.inference);
        info!(
            model_state = %runtime.state(),
            history_mode = %history.mode(),
            "recognizer ready"
        );
        Self {
            config,
            runtime,
            history,
            engine,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<ModelRuntime> {
        &self.runtime
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn engine(&self) -> &PredictionEngine {
        &self.engine
    }

    pub fn predict(&self, frame: Option<&PixelFrame>) -> Result<PredictOutcome> {
        self.engine.predict(frame)
    }

    /// 設定の `timeout_ms` を期限として予測する
    pub async fn predict_within(&self, frame: Option<PixelFrame>) -> Result<PredictOutcome> {
        let deadline = Duration::from_millis(self.config.inference.timeout_ms);
        self.engine.predict_within(frame, deadline).await
    }

    pub fn status(&self) -> RecognizerStatus {
        RecognizerStatus {
            model_state: self.runtime.state(),
            num_labels: self.runtime.labels().map(|labels| labels.len()).unwrap_or(0),
            history_mode: self.history.mode(),
            history_available: self.history.is_available(),
        }
    }
}

/// 設定ファイルを読み込む
///
/// パスを明示した場合は読めなければ `Config` エラー、省略時は既定パスを試して
/// なければデフォルト設定を使う。
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path).map_err(|e| RecognizerError::Config(format!("{:#}", e))),
        None => Ok(AppConfig::load_or_default(AppConfig::default_path())),
    }
}
