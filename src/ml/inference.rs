//! Burnによる推論バックエンド

use anyhow::Result;
use burn::{
    backend::{NdArray, Wgpu},
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use std::path::Path;

use crate::ml::ml_model::{decode_and_normalize, ModelConfig, SignClassifier};
use crate::ml::runtime::ClassifierBackend;
use crate::model::{load_model_with_metadata, DeviceType, ModelMetadata};

/// 学習済みCNNによる分類器
pub struct BurnClassifier<B: Backend> {
    model: SignClassifier<B>,
    input_size: u32,
    device: B::Device,
}

impl<B: Backend> BurnClassifier<B> {
    /// メタデータと重みバイナリからモデルを復元
    pub fn from_artifact(metadata: &ModelMetadata, model_binary: Vec<u8>, device: B::Device) -> Result<Self> {
        let model = ModelConfig::new(metadata.num_classes)
            .with_image_size(metadata.model_input_size as usize)
            .with_hidden_size(metadata.hidden_size)
            .init::<B>(&device)?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, model_binary, &device)
            .map_err(|e| anyhow::anyhow!("failed to load model weights: {:?}", e))?;

        Ok(Self {
            model: model.load_record(record),
            input_size: metadata.model_input_size,
            device,
        })
    }
}

impl<B: Backend> ClassifierBackend for BurnClassifier<B> {
    fn infer(&mut self, encoded_image: &[u8]) -> Result<Vec<f32>> {
        let size = self.input_size as usize;
        let image_data = decode_and_normalize(encoded_image, self.input_size)?;

        // [1, 3, size, size]
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device).reshape([1, 3, size, size]);

        self.model
            .probabilities(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to read inference output: {:?}", e))
    }
}

/// モデルアーカイブを読み込み、指定デバイスの推論バックエンドを作る
pub fn load_backend(model_path: &Path, device_type: &DeviceType) -> Result<(ModelMetadata, Box<dyn ClassifierBackend>)> {
    let (metadata, model_binary) = load_model_with_metadata(model_path)?;

    let backend: Box<dyn ClassifierBackend> = match device_type {
        DeviceType::Cpu => Box::new(BurnClassifier::<NdArray>::from_artifact(
            &metadata,
            model_binary,
            Default::default(),
        )?),
        DeviceType::Wgpu => Box::new(BurnClassifier::<Wgpu>::from_artifact(
            &metadata,
            model_binary,
            Default::default(),
        )?),
    };

    Ok((metadata, backend))
}
