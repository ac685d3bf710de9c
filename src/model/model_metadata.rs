//! モデルメタデータの定義
//!
//! tar.gz形式のモデルアーカイブ内に `metadata.json` として保存されます。
//! 入力は「エンコード済み画像のバイト列」を受け取る1つの名前付きテンソル、
//! 出力はクラス数と同じ長さの確率ベクトルを返す1つの名前付きテンソル。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 学習時のクラスラベル（参考値。正はラベルファイル）
    #[serde(default)]
    pub class_labels: Vec<String>,

    /// 出力ベクトルの長さ
    pub num_classes: usize,

    /// モデル入力サイズ（CNNへの入力解像度、正方形）
    pub model_input_size: u32,

    /// 全結合層の中間次元
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    /// 入力テンソル名
    pub input_name: String,

    /// 出力テンソル名
    pub output_name: String,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

fn default_hidden_size() -> usize {
    256
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        model_input_size: u32,
        input_name: impl Into<String>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            num_classes: class_labels.len(),
            class_labels,
            model_input_size,
            hidden_size: default_hidden_size(),
            input_name: input_name.into(),
            output_name: output_name.into(),
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
