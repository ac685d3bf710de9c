//! 画像1枚を分類し、全ラベルのスコアを降順で表示する
//!
//! ```bash
//! classify hand.jpg
//! classify hand.jpg --model logs/sign_classifier.tar.gz --labels logs/output_labels.txt --device wgpu
//! classify hand.jpg --record
//! ```
//!
//! `--record` はピクセルに展開してから前処理・推論し、結果を予測履歴に残す。
//!
//! 終了コード: 成功で0、引数不足・画像が読めない・モデルが読めない場合は非0。

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use sign_recognizer_lib::model::DeviceType;
use sign_recognizer_lib::prediction::ranked_indices;
use sign_recognizer_lib::{load_config, AppConfig, ModelRuntime, PixelFrame, PredictOutcome, Recognizer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "classify")]
#[command(about = "Classify a single hand-sign image")]
struct Cli {
    /// 分類する画像ファイル
    image: PathBuf,

    /// 設定ファイル（省略時は ./config.json、なければ既定値）
    #[arg(long)]
    config: Option<PathBuf>,

    /// モデルアーカイブ (.tar.gz)
    #[arg(long)]
    model: Option<String>,

    /// ラベルファイル
    #[arg(long)]
    labels: Option<String>,

    #[arg(long, value_enum)]
    device: Option<Device>,

    /// 予測エンジン経由で分類し、履歴に記録する
    #[arg(long)]
    record: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Device {
    Cpu,
    Wgpu,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Some(model) = cli.model {
        config.set_model_path(model);
    }
    if let Some(labels) = cli.labels {
        config.set_labels_path(labels);
    }
    if let Some(device) = cli.device {
        config.device_type = match device {
            Device::Cpu => DeviceType::Cpu,
            Device::Wgpu => DeviceType::Wgpu,
        };
    }

    let image_data = match std::fs::read(&cli.image) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("failed to read {}: {}", cli.image.display(), err);
            return ExitCode::FAILURE;
        }
    };

    if cli.record {
        return predict_and_record(&config, &image_data);
    }

    let runtime = ModelRuntime::new(config.model.clone(), config.device_type.clone());
    if let Err(err) = runtime.load(Path::new(&config.model.model_path), Path::new(&config.model.labels_path)) {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }
    let Some(labels) = runtime.labels() else {
        eprintln!("model is not ready");
        return ExitCode::FAILURE;
    };

    // ファイルの中身をそのままモデル入力にする
    let (scores, order) = match runtime.infer(&image_data).and_then(|scores| {
        let order = ranked_indices(&scores)?;
        Ok((scores, order))
    }) {
        Ok(ranked) => ranked,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    for index in order {
        if let Some(name) = labels.name(index) {
            println!("{} (score = {:.5})", name, scores[index]);
        }
    }

    ExitCode::SUCCESS
}

fn predict_and_record(config: &AppConfig, image_data: &[u8]) -> ExitCode {
    let frame = match image::load_from_memory(image_data) {
        Ok(img) => PixelFrame::from_image(&img),
        Err(err) => {
            eprintln!("failed to decode image: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let recognizer = match Recognizer::from_config(config) {
        Ok(recognizer) => recognizer,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let classified = match recognizer.predict(Some(&frame)) {
        Ok(PredictOutcome::Classified(classified)) => classified,
        Ok(PredictOutcome::NoImage) => return ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    println!("{}", classified.result.summary());
    for prediction in &classified.result.top_k {
        println!("{} (score = {:.5})", prediction.label, prediction.confidence);
    }
    if let Err(err) = &classified.record {
        eprintln!("prediction was not saved: {}", err);
    }

    ExitCode::SUCCESS
}
