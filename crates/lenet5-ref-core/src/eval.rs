//! Evaluation Harness
//!
//! テストセット先頭から指定枚数を順に推論し、正解率を求める。
//! トレースは段のイテレータを流しながら書き出す。

use crate::config::RunConfig;
use crate::dataset::{Sample, load_mnist_test};
use crate::error::{RefError, Result};
use crate::layers::argmax;
use crate::params::NetworkParameters;
use crate::pipeline::Network;
use crate::quant::Quantizer;
use crate::trace::{TraceLevel, TraceWriter};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// 評価結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    pub correct: usize,
    pub total: usize,
    /// 正解率 `correct / total`（0.0 ～ 1.0）
    pub accuracy: f64,
    pub trace_level: TraceLevel,
}

impl EvalReport {
    fn new(correct: usize, total: usize, trace_level: TraceLevel) -> Self {
        let accuracy = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        };
        Self {
            correct,
            total,
            accuracy,
            trace_level,
        }
    }

    /// 百分率表記の正解率
    pub fn percent(&self) -> f64 {
        100.0 * self.accuracy
    }
}

/// 評価の実行係
#[derive(Debug, Clone)]
pub struct Evaluator {
    sample_count: usize,
    partial_trace_limit: usize,
    trace_dir: PathBuf,
}

impl Evaluator {
    pub fn new(sample_count: usize, partial_trace_limit: usize, trace_dir: impl Into<PathBuf>) -> Self {
        Self {
            sample_count,
            partial_trace_limit,
            trace_dir: trace_dir.into(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.sample_count, config.partial_trace_limit, &config.trace_dir)
    }

    pub fn trace_level(&self) -> TraceLevel {
        TraceLevel::for_run(self.sample_count, self.partial_trace_limit)
    }

    /// 先頭 `sample_count` 枚を評価する
    pub fn evaluate(&self, samples: &[Sample], network: &Network) -> Result<EvalReport> {
        let n = self.sample_count;
        if n == 0 {
            return Err(RefError::config("sample count must be at least 1"));
        }
        if n > samples.len() {
            return Err(RefError::config(format!(
                "requested {n} samples but the dataset has only {}",
                samples.len()
            )));
        }

        let writer = TraceWriter::new(&self.trace_dir, self.trace_level());
        writer.begin_run()?;
        log::info!(
            "evaluating {n} sample(s), trace level {} -> {}",
            writer.level().as_str(),
            self.trace_dir.display()
        );

        let start = Instant::now();
        let mut correct = 0usize;
        for (i, sample) in samples[..n].iter().enumerate() {
            let input = network.normalization().normalize(&sample.pixels);
            let mut pass = network.forward_pass(&input)?;
            for stage in pass.by_ref() {
                writer.record(&stage)?;
            }
            let logits = pass.finish();
            let predicted = argmax(&logits).ok_or_else(|| RefError::config("network produced no logits"))?;
            if predicted == sample.label as usize {
                correct += 1;
            }
            log::debug!("sample {i}: label {} predicted {predicted}", sample.label);
        }

        let report = EvalReport::new(correct, n, writer.level());
        log::info!(
            "{correct}/{n} correct ({:.2}%) in {:.2?}",
            report.percent(),
            start.elapsed()
        );
        Ok(report)
    }
}

/// 設定に従ってパラメータとデータセットを読み込み、評価する
pub fn run(config: &RunConfig) -> Result<EvalReport> {
    config.validate()?;
    let params = NetworkParameters::load(&config.param_dir, &config.topology)?;
    let network = Network::new(
        config.topology.clone(),
        params,
        Quantizer::new(config.rounding),
        config.normalization,
    )?;
    let samples = load_mnist_test(&config.dataset_dir)?;
    Evaluator::from_config(config).evaluate(&samples, &network)
}
