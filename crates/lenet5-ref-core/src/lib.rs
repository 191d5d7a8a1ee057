//! LeNet-5 固定小数点ゴールデンリファレンス
//!
//! CNN アクセラレータの RTL シミュレーション結果と突き合わせるための、
//! 量子化推論のビット精度エミュレータ。
//!
//! - [`codec`]: `(i, j, ..) 0xHH, real` 形式のテンソルテキスト
//! - [`scale`]: 逆数で保存された scale
//! - [`quant`]: round → clamp → dequantize の fake quantization
//! - [`pipeline`]: 段を遅延生成する順伝播
//! - [`trace`]: 段のトレースファイル出力
//! - [`eval`]: MNIST テストセットでの正解率評価
//!
//! ```no_run
//! use lenet5_ref_core::{RunConfig, run};
//!
//! let config = RunConfig {
//!     sample_count: 1,
//!     ..RunConfig::default()
//! };
//! let report = run(&config)?;
//! println!("{:.2}%", report.percent());
//! # Ok::<(), lenet5_ref_core::RefError>(())
//! ```

pub mod codec;
pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod io;
pub mod layers;
pub mod params;
pub mod pipeline;
pub mod quant;
pub mod scale;
pub mod tensor;
pub mod topology;
pub mod trace;

pub use config::RunConfig;
pub use dataset::{Normalization, Sample, load_mnist_test};
pub use error::{RefError, Result};
pub use eval::{EvalReport, Evaluator, run};
pub use params::{LayerParameters, NetworkParameters};
pub use pipeline::{ForwardPass, Network, Stage, StageKind};
pub use quant::{Quantizer, RoundingMode};
pub use scale::Scale;
pub use tensor::{BitWidth, QuantizedTensor};
pub use topology::{LayerSpec, Topology};
pub use trace::{TraceLevel, TraceWriter};
