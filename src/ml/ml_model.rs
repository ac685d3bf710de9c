//! 機械学習モデルの共通定義
//!
//! 手話アルファベット分類用のCNNモデルと、入力画像の正規化を提供します。

#[cfg(feature = "ml")]
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// ImageNetの平均
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNetの標準偏差
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// モデル設定
#[cfg(feature = "ml")]
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 64)]
    pub image_size: usize,
    /// 全結合層の中間次元
    #[config(default = 256)]
    pub hidden_size: usize,
}

#[cfg(feature = "ml")]
impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> anyhow::Result<SignClassifier<B>> {
        // Conv (3x3, no padding): size -> size - 2
        // Pool (2x2, stride 2): size -> size / 2
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let after_pool2 = after_conv2 / 2;
        let feature_map_size = after_pool2.saturating_sub(2);

        if feature_map_size == 0 {
            anyhow::bail!("input size too small: {} (at least 18x18 required)", self.image_size);
        }

        let d = 128 * feature_map_size * feature_map_size;
        tracing::debug!(
            image_size = self.image_size,
            feature_map_size,
            flattened = d,
            num_classes = self.num_classes,
            "initialized classifier layout"
        );

        Ok(SignClassifier {
            conv1: Conv2dConfig::new([3, 32], [3, 3]).with_stride([1, 1]).init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2: Conv2dConfig::new([32, 64], [3, 3]).with_stride([1, 1]).init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv3: Conv2dConfig::new([64, 128], [3, 3]).with_stride([1, 1]).init(device),
            fc1: LinearConfig::new(d, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        })
    }
}

/// 手話アルファベット分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool 2x2} x 2層
/// - Conv 3x3 + ReLU
/// - Flatten
/// - FC: d -> hidden + ReLU
/// - FC: hidden -> num_classes
/// - Softmax (分類時)
#[cfg(feature = "ml")]
#[derive(Module, Debug)]
pub struct SignClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d,
    conv3: Conv2d<B>, // 64 -> 128

    fc1: Linear<B>,
    fc2: Linear<B>,

    activation: Relu,
}

#[cfg(feature = "ml")]
impl<B: Backend> SignClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// クラス軸でsoftmaxを取った確率 [batch_size, num_classes]
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}

/// エンコード済み画像をデコードして正規化
///
/// 指定サイズへリサイズし、ImageNetの平均と標準偏差で正規化します。
///
/// # 戻り値
/// - 正規化されたRGB画像データ (C, H, W) の順で平坦化
pub fn decode_and_normalize(encoded: &[u8], size: u32) -> anyhow::Result<Vec<f32>> {
    let img = image::load_from_memory(encoded)
        .map_err(|e| anyhow::anyhow!("failed to decode image bytes: {}", e))?
        .to_rgb8();

    let img = if img.dimensions() == (size, size) {
        img
    } else {
        image::imageops::resize(&img, size, size, image::imageops::FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * (size * size) as usize);
    for channel in 0..3 {
        for pixel in img.pixels() {
            let value = pixel[channel] as f32 / 255.0;
            data.push((value - MEAN[channel]) / STD[channel]);
        }
    }

    Ok(data)
}
