//! 実行設定
//!
//! すべてのフィールドに既定値があり、空の TOML でも有効。
//!
//! ```toml
//! sample_count = 1
//! dataset_dir = "mnist_dataset"
//! rounding = "half_even"
//!
//! [normalization]
//! mean = 0.1307
//! std = 0.3081
//! ```

use crate::dataset::Normalization;
use crate::error::{RefError, Result};
use crate::io::read_text;
use crate::quant::RoundingMode;
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// パラメータ・データセット・トレースの既定ディレクトリ
pub const DEFAULT_DIR: &str = "mnist_dataset";

/// 1回の検証実行の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 評価する画像数（先頭から）
    pub sample_count: usize,
    /// MNIST IDX ファイルのディレクトリ
    pub dataset_dir: PathBuf,
    /// 量子化パラメータのディレクトリ
    pub param_dir: PathBuf,
    /// トレース出力先
    pub trace_dir: PathBuf,
    /// この枚数以下ならパディング済み入力トレースを書く
    pub partial_trace_limit: usize,
    pub rounding: RoundingMode,
    pub normalization: Normalization,
    pub topology: Topology,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sample_count: 10,
            dataset_dir: PathBuf::from(DEFAULT_DIR),
            param_dir: PathBuf::from(DEFAULT_DIR),
            trace_dir: PathBuf::from(DEFAULT_DIR),
            partial_trace_limit: 100,
            rounding: RoundingMode::default(),
            normalization: Normalization::default(),
            topology: Topology::lenet5(),
        }
    }
}

impl RunConfig {
    /// TOML テキストから読み込む
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RefError::config(format!("{origin}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// TOML ファイルから読み込む
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml_str(&read_text(path)?, &path.display().to_string())
    }

    /// 値の整合性を検証
    pub fn validate(&self) -> Result<()> {
        if self.sample_count == 0 {
            return Err(RefError::config("sample_count must be at least 1"));
        }
        if !(self.normalization.std.is_finite() && self.normalization.std > 0.0) {
            return Err(RefError::config(format!(
                "normalization std must be positive, got {}",
                self.normalization.std
            )));
        }
        self.topology.validate()?;
        Ok(())
    }
}
