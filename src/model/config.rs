//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・モデルの場所・推論パラメータ・履歴の保存方式をJSON形式で保存・読み込みします。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 計算デバイスの種類
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルアーカイブ（tar.gz）のパス
    pub model_path: String,
    /// ラベルファイル（1行1クラス）のパス
    pub labels_path: String,
    /// 入力テンソル名。アーカイブ側の宣言と一致する必要がある
    #[serde(default = "default_input_name")]
    pub input_name: String,
    /// 出力テンソル名
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

fn default_input_name() -> String {
    "DecodeJpeg/contents".to_string()
}

fn default_output_name() -> String {
    "final_result".to_string()
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "logs/sign_classifier.tar.gz".to_string(),
            labels_path: "logs/output_labels.txt".to_string(),
            input_name: default_input_name(),
            output_name: default_output_name(),
        }
    }
}

/// 推論設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// 返す上位クラス数
    pub top_k: usize,
    /// 前処理でのJPEG品質（1-100）
    pub jpeg_quality: u8,
    /// 期限付き推論のタイムアウト（ミリ秒）
    pub timeout_ms: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            jpeg_quality: 95,
            timeout_ms: 10_000,
        }
    }
}

/// 履歴の保存方式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum HistoryMode {
    /// SQLiteに永続化（上限なし）
    #[default]
    Durable,
    /// メモリ上のみ（上限付き、古いものから削除）
    Transient,
}

impl std::fmt::Display for HistoryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryMode::Durable => write!(f, "durable (sqlite)"),
            HistoryMode::Transient => write!(f, "transient (in-memory)"),
        }
    }
}

/// 履歴設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    pub mode: HistoryMode,
    /// Durable時のデータベースファイル
    pub db_path: String,
    /// Transient時の最大件数
    pub capacity: usize,
    /// 一覧表示の既定件数
    pub recent_limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            mode: HistoryMode::default(),
            db_path: "predictions.db".to_string(),
            capacity: 20,
            recent_limit: 20,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// 推論設定
    #[serde(default)]
    pub inference: InferenceSettings,
    /// 履歴設定
    #[serde(default)]
    pub history: HistorySettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded config file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config file, using defaults");
                    Self::default()
                }
            }
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }

    /// モデルパスを設定
    pub fn set_model_path(&mut self, path: String) {
        self.model.model_path = path;
    }

    /// ラベルパスを設定
    pub fn set_labels_path(&mut self, path: String) {
        self.model.labels_path = path;
    }
}
