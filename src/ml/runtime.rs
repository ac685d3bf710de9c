//! モデルランタイム
//!
//! モデルアーカイブとラベルファイルを一度だけ読み込み、推論要求を受け付けます。
//!
//! 状態遷移: `Unloaded → Loading → Ready` または `Loading → Failed`。
//! `Ready` と `Failed` からは遷移しない（`Failed` から戻すにはプロセスの再起動が必要）。
//!
//! 実行コンテキスト（`ClassifierBackend`）は同時呼び出しに対して安全とは限らないため、
//! `infer` はすべて単一の排他ロックを通して直列化される。ラベルテーブルは
//! ロード後は読み取り専用なのでロックしない。

use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

use crate::error::{RecognizerError, Result};
use crate::model::{DeviceType, LabelTable, ModelMetadata, ModelSettings};

/// 推論バックエンド
///
/// 入力はエンコード済み画像のバイト列、出力はクラス数と同じ長さのスコアベクトル。
/// この入出力の形を守れば実装は差し替え可能。
pub trait ClassifierBackend: Send {
    fn infer(&mut self, encoded_image: &[u8]) -> anyhow::Result<Vec<f32>>;
}

/// ランタイムの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuntimeState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeState::Unloaded => write!(f, "unloaded"),
            RuntimeState::Loading => write!(f, "loading"),
            RuntimeState::Ready => write!(f, "ready"),
            RuntimeState::Failed => write!(f, "failed"),
        }
    }
}

struct LoadedModel {
    labels: Arc<LabelTable>,
    context: Mutex<Box<dyn ClassifierBackend>>,
}

enum Phase {
    Unloaded,
    Loading,
    Ready(Arc<LoadedModel>),
    Failed(String),
}

/// モデルランタイム
pub struct ModelRuntime {
    phase: Mutex<Phase>,
    settings: ModelSettings,
    device_type: DeviceType,
}

impl std::fmt::Debug for ModelRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRuntime")
            .field("state", &self.state())
            .field("device_type", &self.device_type)
            .finish()
    }
}

impl ModelRuntime {
    pub fn new(settings: ModelSettings, device_type: DeviceType) -> Self {
        Self {
            phase: Mutex::new(Phase::Unloaded),
            settings,
            device_type,
        }
    }

    /// モデルアーカイブとラベルファイルを読み込む
    ///
    /// ラベル数とアーカイブの宣言するクラス数、設定とアーカイブのテンソル名が
    /// 一致しない場合は `ModelLoad` で失敗し、ランタイムは `Failed` になる。
    /// `Ready` 後の呼び出しは何もしない。
    pub fn load(&self, model_path: &Path, labels_path: &Path) -> Result<()> {
        self.transition(|| {
            let labels = LabelTable::from_file(labels_path)
                .map_err(|e| RecognizerError::model_load(format!("{:#}", e)))?;
            let (metadata, backend) = open_backend(model_path, &self.device_type)?;
            self.check_artifact(&metadata, &labels)?;

            info!(
                model = %model_path.display(),
                classes = labels.len(),
                device = %self.device_type,
                "model loaded"
            );
            Ok((labels, backend))
        })
    }

    /// 読み込み済みのバックエンドを取り付ける（アーカイブを経由しない場合）
    pub fn install(&self, labels: LabelTable, backend: Box<dyn ClassifierBackend>) -> Result<()> {
        self.transition(|| Ok((labels, backend)))
    }

    fn transition<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce() -> Result<(LabelTable, Box<dyn ClassifierBackend>)>,
    {
        {
            let mut phase = self.lock_phase();
            match &*phase {
                Phase::Unloaded => *phase = Phase::Loading,
                Phase::Ready(_) => {
                    debug!("model already loaded, ignoring load request");
                    return Ok(());
                }
                Phase::Loading => {
                    return Err(RecognizerError::model_load("model is already being loaded"));
                }
                Phase::Failed(reason) => {
                    return Err(RecognizerError::model_load(format!(
                        "model load previously failed ({}); restart required",
                        reason
                    )));
                }
            }
        }

        // ロード中はphaseのロックを保持しない。
        // バックエンド初期化のpanic（GPUアダプタなし等）も Failed に落とす
        let outcome = catch_unwind(AssertUnwindSafe(build)).unwrap_or_else(|payload| {
            Err(RecognizerError::model_load(format!(
                "model load panicked: {}",
                panic_message(&*payload)
            )))
        });

        let mut phase = self.lock_phase();
        match outcome {
            Ok((labels, backend)) => {
                *phase = Phase::Ready(Arc::new(LoadedModel {
                    labels: Arc::new(labels),
                    context: Mutex::new(backend),
                }));
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "model load failed");
                *phase = Phase::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn check_artifact(&self, metadata: &ModelMetadata, labels: &LabelTable) -> Result<()> {
        if metadata.num_classes != labels.len() {
            return Err(RecognizerError::model_load(format!(
                "label count {} does not match model output size {}",
                labels.len(),
                metadata.num_classes
            )));
        }
        if metadata.input_name != self.settings.input_name {
            return Err(RecognizerError::model_load(format!(
                "model declares input '{}', configured '{}'",
                metadata.input_name, self.settings.input_name
            )));
        }
        if metadata.output_name != self.settings.output_name {
            return Err(RecognizerError::model_load(format!(
                "model declares output '{}', configured '{}'",
                metadata.output_name, self.settings.output_name
            )));
        }
        Ok(())
    }

    /// エンコード済み画像を推論し、クラスごとのスコアを返す
    pub fn infer(&self, encoded_image: &[u8]) -> Result<Vec<f32>> {
        let loaded = self.ready()?;

        let scores = {
            let mut context = loaded.context.lock().map_err(|_| {
                RecognizerError::inference("execution context is unusable after an earlier panic")
            })?;
            let backend = &mut **context;
            catch_unwind(AssertUnwindSafe(|| backend.infer(encoded_image)))
                .map_err(|payload| {
                    RecognizerError::inference(format!(
                        "inference panicked: {}",
                        panic_message(&*payload)
                    ))
                })?
                .map_err(|e| RecognizerError::inference(format!("{:#}", e)))?
        };

        if scores.len() != loaded.labels.len() {
            return Err(RecognizerError::model_load(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                loaded.labels.len()
            )));
        }

        Ok(scores)
    }

    fn ready(&self) -> Result<Arc<LoadedModel>> {
        match &*self.lock_phase() {
            Phase::Ready(loaded) => Ok(Arc::clone(loaded)),
            Phase::Unloaded => Err(RecognizerError::inference("model not loaded")),
            Phase::Loading => Err(RecognizerError::inference("model is still loading")),
            Phase::Failed(reason) => Err(RecognizerError::inference(format!(
                "model unavailable, load failed: {}",
                reason
            ))),
        }
    }

    /// 読み込み済みのラベルテーブル
    pub fn labels(&self) -> Option<Arc<LabelTable>> {
        match &*self.lock_phase() {
            Phase::Ready(loaded) => Some(Arc::clone(&loaded.labels)),
            _ => None,
        }
    }

    pub fn state(&self) -> RuntimeState {
        match &*self.lock_phase() {
            Phase::Unloaded => RuntimeState::Unloaded,
            Phase::Loading => RuntimeState::Loading,
            Phase::Ready(_) => RuntimeState::Ready,
            Phase::Failed(_) => RuntimeState::Failed,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    // Phase は単純な値なので、ポイズンされても中身はそのまま使える
    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(feature = "ml")]
fn open_backend(
    model_path: &Path,
    device_type: &DeviceType,
) -> Result<(ModelMetadata, Box<dyn ClassifierBackend>)> {
    crate::ml::inference::load_backend(model_path, device_type)
        .map_err(|e| RecognizerError::model_load(format!("{:#}", e)))
}

#[cfg(not(feature = "ml"))]
fn open_backend(
    model_path: &Path,
    _device_type: &DeviceType,
) -> Result<(ModelMetadata, Box<dyn ClassifierBackend>)> {
    Err(RecognizerError::model_load(format!(
        "cannot load {}: built without the `ml` feature",
        model_path.display()
    )))
}
