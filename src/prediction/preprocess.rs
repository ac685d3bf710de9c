//! 入力ピクセルの前処理
//!
//! どの入力も最終的に3チャネルRGBへ揃えてからJPEGにエンコードする。
//! - グレースケール → 3チャネルへ複製
//! - 4チャネル → アルファを捨てる
//! - BGR順の入力 → RGB順へ並べ替える
//!
//! エンコーダ（`image` のJPEGエンコーダ）はRGB順を期待する。学習時の画像も
//! 実際の色のままJPEG化されていたので、エンコード後のストリームが元の色を表すように並べる。

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::{RecognizerError, Result};
use crate::types::{ChannelOrder, PixelFrame};

/// OpenCVの既定値に合わせたJPEG品質
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// フレームをモデル入力用のJPEGバイト列に変換
///
/// `None` は「画像なし」を表し、エラーではなく `Ok(None)` を返す。
pub fn preprocess(frame: Option<&PixelFrame>, jpeg_quality: u8) -> Result<Option<Vec<u8>>> {
    let Some(frame) = frame else {
        return Ok(None);
    };

    let rgb = to_rgb(frame)?;
    let mut encoded = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, jpeg_quality.clamp(1, 100));
        encoder
            .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
            .map_err(|e| RecognizerError::invalid_image(format!("failed to encode image: {}", e)))?;
    }

    Ok(Some(encoded))
}

/// 1/3/4チャネルのフレームをインターリーブされたRGBバッファへ正規化
pub fn to_rgb(frame: &PixelFrame) -> Result<Vec<u8>> {
    if frame.width == 0 || frame.height == 0 {
        return Err(RecognizerError::invalid_image(format!(
            "empty image ({}x{})",
            frame.width, frame.height
        )));
    }
    if !matches!(frame.channels, 1 | 3 | 4) {
        return Err(RecognizerError::invalid_image(format!(
            "unsupported channel count {} (expected 1, 3 or 4)",
            frame.channels
        )));
    }

    let pixels = (frame.width as usize)
        .checked_mul(frame.height as usize)
        .ok_or_else(|| RecognizerError::invalid_image("image dimensions overflow"))?;
    let expected = pixels * frame.channels as usize;
    if frame.data.len() != expected {
        return Err(RecognizerError::invalid_image(format!(
            "buffer holds {} bytes, {}x{}x{} needs {}",
            frame.data.len(),
            frame.width,
            frame.height,
            frame.channels,
            expected
        )));
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    match frame.channels {
        1 => {
            for &v in &frame.data {
                rgb.extend_from_slice(&[v, v, v]);
            }
        }
        n => {
            for px in frame.data.chunks_exact(n as usize) {
                match frame.order {
                    ChannelOrder::Rgb => rgb.extend_from_slice(&[px[0], px[1], px[2]]),
                    ChannelOrder::Bgr => rgb.extend_from_slice(&[px[2], px[1], px[0]]),
                }
            }
        }
    }

    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> image::DynamicImage {
        image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg).unwrap()
    }

    #[test]
    fn test_none_is_no_image() {
        assert!(preprocess(None, DEFAULT_JPEG_QUALITY).unwrap().is_none());
    }

    #[test]
    fn test_grayscale_becomes_three_channel_jpeg() {
        let frame = PixelFrame::new(8, 8, 1, vec![128; 64]);
        let bytes = preprocess(Some(&frame), DEFAULT_JPEG_QUALITY).unwrap().unwrap();
        let img = decode(&bytes);
        assert_eq!(img.color(), image::ColorType::Rgb8);
        assert_eq!((img.width(), img.height()), (8, 8));
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let frame = PixelFrame::new(2, 1, 4, vec![1, 2, 3, 255, 4, 5, 6, 0]);
        assert_eq!(to_rgb(&frame).unwrap(), vec![1, 2, 3, 4, 5, 6]);

        let bytes = preprocess(Some(&frame), DEFAULT_JPEG_QUALITY).unwrap().unwrap();
        assert_eq!(decode(&bytes).color(), image::ColorType::Rgb8);
    }

    #[test]
    fn test_bgr_is_reordered_to_rgb() {
        let frame = PixelFrame::new(1, 1, 3, vec![10, 20, 30]).with_order(ChannelOrder::Bgr);
        assert_eq!(to_rgb(&frame).unwrap(), vec![30, 20, 10]);

        let bgra = PixelFrame::new(1, 1, 4, vec![10, 20, 30, 40]).with_order(ChannelOrder::Bgr);
        assert_eq!(to_rgb(&bgra).unwrap(), vec![30, 20, 10]);
    }

    #[test]
    fn test_encoded_colors_survive() {
        // 赤一色を入れて、デコード結果も赤が支配的であること
        let data: Vec<u8> = std::iter::repeat([220u8, 10, 10]).take(16 * 16).flatten().collect();
        let frame = PixelFrame::new(16, 16, 3, data);
        let bytes = preprocess(Some(&frame), DEFAULT_JPEG_QUALITY).unwrap().unwrap();
        let rgb = decode(&bytes).to_rgb8();
        let px = rgb.get_pixel(8, 8);
        assert!(px[0] > 180 && px[1] < 60 && px[2] < 60, "got {:?}", px);
    }

    #[test]
    fn test_two_channels_is_invalid() {
        let frame = PixelFrame::new(2, 2, 2, vec![0; 8]);
        let err = preprocess(Some(&frame), DEFAULT_JPEG_QUALITY).unwrap_err();
        assert!(matches!(err, RecognizerError::InvalidImage(_)));
    }

    #[test]
    fn test_short_buffer_is_invalid() {
        let frame = PixelFrame::new(4, 4, 3, vec![0; 10]);
        assert!(matches!(to_rgb(&frame), Err(RecognizerError::InvalidImage(_))));
    }

    #[test]
    fn test_zero_sized_is_invalid() {
        let frame = PixelFrame::new(0, 4, 3, vec![]);
        assert!(matches!(to_rgb(&frame), Err(RecognizerError::InvalidImage(_))));
    }
}
