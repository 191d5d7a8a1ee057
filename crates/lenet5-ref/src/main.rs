//! LeNet-5 ゴールデントレース生成ツール
//!
//! 量子化パラメータと MNIST テストセットを読み込み、先頭 N 枚で正解率を出す。
//! N = 1 のときは全段、N <= partial_trace_limit のときはパディング済み入力のトレースを書く。
//!
//! ```bash
//! lenet5-ref --samples 1 --param-dir mnist_dataset --trace-dir trace
//! lenet5-ref --config run.toml --summary-json report.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lenet5_ref_core::{RoundingMode, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "lenet5-ref")]
#[command(about = "LeNet-5 固定小数点リファレンスで推論し、RTL 比較用トレースを出力する")]
struct Cli {
    /// 設定ファイル（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 評価する画像数
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// MNIST IDX ファイルのディレクトリ
    #[arg(long)]
    dataset_dir: Option<PathBuf>,

    /// 量子化パラメータのディレクトリ
    #[arg(long)]
    param_dir: Option<PathBuf>,

    /// トレース出力先
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// 丸めモード（half_even / half_away_from_zero）
    #[arg(long)]
    rounding: Option<RoundingMode>,

    /// 評価結果を JSON で書き出す
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

impl Cli {
    /// 設定ファイルを読み、コマンドライン引数で上書きする
    fn resolve_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(n) = self.samples {
            config.sample_count = n;
        }
        if let Some(dir) = &self.dataset_dir {
            config.dataset_dir = dir.clone();
        }
        if let Some(dir) = &self.param_dir {
            config.param_dir = dir.clone();
        }
        if let Some(dir) = &self.trace_dir {
            config.trace_dir = dir.clone();
        }
        if let Some(rounding) = self.rounding {
            config.rounding = rounding;
        }
        if config.sample_count == 0 {
            bail!("--samples must be >= 1");
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    log::info!(
        "params: {}, dataset: {}, rounding: {}",
        config.param_dir.display(),
        config.dataset_dir.display(),
        config.rounding
    );

    let report = lenet5_ref_core::run(&config).context("evaluation failed")?;
    println!("Test Accuracy on {} images: {:.2}%", report.total, report.percent());

    if let Some(path) = &cli.summary_json {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("summary written to {}", path.display());
    }

    Ok(())
}
