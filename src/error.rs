//! 認識処理全体で使うエラー型
//!
//! 書き込み系（履歴の追加・削除）は呼び出し元へ伝播し、
//! 読み込み系（一覧・統計）は `HistoryStore` 側で空の結果に落とす。
//! どの経路もプレゼンテーション層へは構造化されたメッセージとして届く。

use serde::Serialize;
use thiserror::Error;

/// 認識処理のエラー
#[derive(Debug, Error)]
pub enum RecognizerError {
    /// モデルまたはラベルの読み込み失敗、あるいは形状の不一致
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// 入力画像の形式が不正
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// 推論の実行失敗（未ロード、実行時エラー）
    #[error("inference error: {0}")]
    Inference(String),

    /// 履歴の書き込み失敗
    #[error("history write error: {0}")]
    StoreWrite(String),

    /// 履歴の読み込み失敗
    #[error("history read error: {0}")]
    StoreRead(String),

    /// 推論が期限内に終わらなかった
    #[error("inference timed out after {0} ms")]
    Timeout(u64),

    /// 設定ファイルの読み書き失敗
    #[error("config error: {0}")]
    Config(String),
}

impl RecognizerError {
    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad(message.into())
    }

    pub fn invalid_image(message: impl Into<String>) -> Self {
        Self::InvalidImage(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    pub fn store_write(message: impl Into<String>) -> Self {
        Self::StoreWrite(message.into())
    }

    pub fn store_read(message: impl Into<String>) -> Self {
        Self::StoreRead(message.into())
    }
}

impl Serialize for RecognizerError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecognizerError>;
