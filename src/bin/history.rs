//! 予測履歴の表示・集計・削除・エクスポート
//!
//! ```bash
//! history list --limit 10
//! history stats
//! history export --format tsv
//! history export --output - > predictions.csv
//! history clear
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sign_recognizer_lib::{load_config, ExportFormat, HistoryMode, HistoryStore, RecognizerError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "history")]
#[command(about = "Inspect the prediction history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 設定ファイル（省略時は ./config.json、なければ既定値）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 設定より優先するデータベースファイル
    #[arg(long, global = true)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 新しい順に表示
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// 件数・最頻文字・平均確信度
    Stats,
    /// 全件削除
    Clear,
    /// CSV/TSVで書き出す
    Export {
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        /// 省略時は predictions.<csv|tsv>、`-` で標準出力
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RecognizerError> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.history.db_path = db;
    }
    if config.history.mode == HistoryMode::Transient {
        // 別プロセスのメモリ上の履歴は見えない
        eprintln!("history mode is transient; nothing is persisted between runs");
    }
    let store = HistoryStore::from_settings(&config.history)?;

    match cli.command {
        Commands::List { limit } => {
            let records = match limit {
                Some(limit) => store.list(limit),
                None => store.recent(),
            };
            if records.is_empty() {
                println!("No predictions yet.");
            }
            for record in records {
                println!(
                    "{:>6}  {:<8} {:>6.2}%  {}",
                    record.id,
                    record.letter,
                    record.confidence * 100.0,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Stats => {
            let stats = store.statistics();
            println!("Total predictions: {}", stats.total);
            match stats.most_common_letter {
                Some(letter) => println!("Most common letter: {} ({} times)", letter, stats.most_common_count),
                None => println!("Most common letter: -"),
            }
            println!("Average confidence: {:.1}%", stats.average_confidence * 100.0);
        }
        Commands::Clear => {
            store.clear()?;
            println!("History cleared.");
        }
        Commands::Export { format, output } => {
            let bytes = store.export(format)?;
            let output = output.unwrap_or_else(|| PathBuf::from(format.default_file_name()));
            if output.as_os_str() == "-" {
                use std::io::Write;
                std::io::stdout()
                    .write_all(&bytes)
                    .map_err(|e| RecognizerError::store_read(format!("failed to write export: {}", e)))?;
            } else {
                std::fs::write(&output, &bytes).map_err(|e| {
                    RecognizerError::store_read(format!("failed to write {}: {}", output.display(), e))
                })?;
                println!("Exported to {}", output.display());
            }
        }
    }

    Ok(())
}
