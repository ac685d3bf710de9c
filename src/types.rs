use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// クラスラベル（index はモデル出力チャネルに1対1で対応）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub index: usize,
    pub name: String,
}

/// ランキングされた1クラス分の予測
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPrediction {
    pub label: String,
    pub confidence: f32,
}

/// 予測結果（best は top_k の先頭と同じ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub best: RankedPrediction,
    pub top_k: Vec<RankedPrediction>,
}

impl PredictionResult {
    /// 表示用の一行サマリ
    pub fn summary(&self) -> String {
        format!(
            "Predicted letter: {} ({:.1}% confidence)",
            self.best.label.to_uppercase(),
            self.best.confidence * 100.0
        )
    }
}

/// 予測履歴の1レコード。作成後は変更されない
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub letter: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// 履歴の集計値
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStatistics {
    pub total: usize,
    /// 同数の場合は辞書順で最小の文字
    pub most_common_letter: Option<String>,
    pub most_common_count: usize,
    pub average_confidence: f64,
}

// チャネル順序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// 呼び出し元から渡される生のピクセルデータ（行優先、チャネルはインターリーブ）
#[derive(Debug, Clone)]
pub struct PixelFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub order: ChannelOrder,
    pub data: Vec<u8>,
}

impl PixelFrame {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            order: ChannelOrder::Rgb,
            data,
        }
    }

    pub fn with_order(mut self, order: ChannelOrder) -> Self {
        self.order = order;
        self
    }

    /// デコード済み画像からフレームを作成
    ///
    /// グレースケール・RGB・RGBAはそのままのチャネル数で保持し、
    /// それ以外の色形式はRGBAに変換する。
    pub fn from_image(img: &DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        let (channels, data) = match img {
            DynamicImage::ImageLuma8(buf) => (1, buf.as_raw().clone()),
            DynamicImage::ImageRgb8(buf) => (3, buf.as_raw().clone()),
            DynamicImage::ImageRgba8(buf) => (4, buf.as_raw().clone()),
            other => (4, other.to_rgba8().into_raw()),
        };
        Self::new(width, height, channels, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_uppercases_letter() {
        let best = RankedPrediction { label: "a".to_string(), confidence: 0.9321 };
        let result = PredictionResult { best: best.clone(), top_k: vec![best] };
        assert_eq!(result.summary(), "Predicted letter: A (93.2% confidence)");
    }

    #[test]
    fn test_frame_from_luma_image_keeps_single_channel() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(4, 2, image::Luma([7])));
        let frame = PixelFrame::from_image(&img);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.data.len(), 8);
        assert_eq!(frame.order, ChannelOrder::Rgb);
    }

    #[test]
    fn test_frame_from_16bit_image_converts_to_rgba() {
        let img = DynamicImage::ImageRgb16(image::ImageBuffer::new(3, 3));
        let frame = PixelFrame::from_image(&img);
        assert_eq!(frame.channels, 4);
        assert_eq!(frame.data.len(), 3 * 3 * 4);
    }
}
