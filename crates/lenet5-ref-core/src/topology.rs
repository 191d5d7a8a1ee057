//! ネットワーク構成の宣言的記述
//!
//! 層の並び（種類・形状・パディング・プーリング）をデータとして持ち、
//! パイプラインはこの記述を順に解釈する。scale とパラメータのファイル名は層名から決まる。

use crate::error::{RefError, Result};
use serde::{Deserialize, Serialize};

/// パディング領域の埋め値
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadFill {
    /// 0.0 で埋める
    #[default]
    Zero,
    /// 正規化後の背景値 `(0 - mean) / std` で埋める
    Background,
}

impl PadFill {
    /// 文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::Background => "background",
        }
    }
}

/// 入力画像の記述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSpec {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// パディング済み入力トレース（`input_y_q_padd`）の片側パディング幅
    pub trace_padding: usize,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            channels: 1,
            height: 28,
            width: 28,
            trace_padding: 2,
        }
    }
}

/// 畳み込み層（正方カーネル、stride 1）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    pub name: String,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    #[serde(default)]
    pub padding: usize,
    #[serde(default)]
    pub pad_fill: PadFill,
    #[serde(default = "default_true")]
    pub relu: bool,
    /// 非重複 max pooling の窓サイズ（= stride）
    #[serde(default)]
    pub pool: Option<usize>,
}

/// 全結合層
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearSpec {
    pub name: String,
    pub in_features: usize,
    pub out_features: usize,
    #[serde(default = "default_true")]
    pub relu: bool,
}

fn default_true() -> bool {
    true
}

/// 層の記述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv(ConvSpec),
    Linear(LinearSpec),
}

impl LayerSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Conv(c) => &c.name,
            Self::Linear(l) => &l.name,
        }
    }

    /// 重みの形状（conv: `[out, in, k, k]`、linear: `[out, in]`）
    pub fn weight_shape(&self) -> Vec<usize> {
        match self {
            Self::Conv(c) => vec![c.out_channels, c.in_channels, c.kernel, c.kernel],
            Self::Linear(l) => vec![l.out_features, l.in_features],
        }
    }

    /// バイアスの形状
    pub fn bias_shape(&self) -> Vec<usize> {
        match self {
            Self::Conv(c) => vec![c.out_channels],
            Self::Linear(l) => vec![l.out_features],
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Self::Linear(_))
    }
}

/// 特徴マップの寸法 (C, H, W)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Dims {
    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ネットワーク全体の記述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub input: InputSpec,
    pub layers: Vec<LayerSpec>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::lenet5()
    }
}

impl Topology {
    /// LeNet-5（conv, conv, fc, fc, fc）
    ///
    /// ```text
    /// 1x28x28 ─conv1(5x5, pad 2)→ 6x28x28 ─pool→ 6x14x14
    ///         ─conv2(5x5)→ 16x10x10 ─pool→ 16x5x5 ─flatten→ 400
    ///         ─fc1→ 120 ─fc2→ 84 ─fc3→ 10
    /// ```
    pub fn lenet5() -> Self {
        let conv = |name: &str, in_channels, out_channels, padding| {
            LayerSpec::Conv(ConvSpec {
                name: name.to_owned(),
                in_channels,
                out_channels,
                kernel: 5,
                padding,
                pad_fill: PadFill::Zero,
                relu: true,
                pool: Some(2),
            })
        };
        let linear = |name: &str, in_features, out_features, relu| {
            LayerSpec::Linear(LinearSpec {
                name: name.to_owned(),
                in_features,
                out_features,
                relu,
            })
        };
        Self {
            input: InputSpec::default(),
            layers: vec![
                conv("conv1", 1, 6, 2),
                conv("conv2", 6, 16, 0),
                linear("fc1", 16 * 5 * 5, 120, true),
                linear("fc2", 120, 84, true),
                linear("fc3", 84, 10, false),
            ],
        }
    }

    /// 入力の寸法
    pub fn input_dims(&self) -> Dims {
        Dims {
            channels: self.input.channels,
            height: self.input.height,
            width: self.input.width,
        }
    }

    /// 出力（ロジット）の次元
    pub fn output_len(&self) -> usize {
        match self.layers.last() {
            Some(LayerSpec::Linear(l)) => l.out_features,
            Some(LayerSpec::Conv(_)) | None => 0,
        }
    }

    /// 層の接続を検証し、各層の出力寸法を返す
    pub fn validate(&self) -> Result<Vec<Dims>> {
        if self.layers.is_empty() {
            return Err(RefError::config("topology has no layers"));
        }
        let mut names = std::collections::HashSet::new();
        let mut dims = self.input_dims();
        if dims.is_empty() {
            return Err(RefError::config("input dimensions must be positive"));
        }
        let mut seen_linear = false;
        let mut out = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            if !names.insert(layer.name()) {
                return Err(RefError::config(format!("duplicate layer name {}", layer.name())));
            }
            dims = match layer {
                LayerSpec::Conv(c) => {
                    if seen_linear {
                        return Err(RefError::config(format!(
                            "{}: convolution after a linear layer is not supported",
                            c.name
                        )));
                    }
                    conv_output_dims(c, dims)?
                }
                LayerSpec::Linear(l) => {
                    seen_linear = true;
                    if l.in_features != dims.len() || l.out_features == 0 {
                        return Err(RefError::config(format!(
                            "{}: in_features {} does not match incoming width {}",
                            l.name,
                            l.in_features,
                            dims.len()
                        )));
                    }
                    Dims {
                        channels: l.out_features,
                        height: 1,
                        width: 1,
                    }
                }
            };
            out.push(dims);
        }

        if !self.layers.last().is_some_and(LayerSpec::is_linear) {
            return Err(RefError::config("the last layer must be linear (class logits)"));
        }
        Ok(out)
    }
}

fn conv_output_dims(c: &ConvSpec, input: Dims) -> Result<Dims> {
    if c.in_channels != input.channels {
        return Err(RefError::config(format!(
            "{}: in_channels {} does not match incoming channels {}",
            c.name, c.in_channels, input.channels
        )));
    }
    let padded_h = input.height + 2 * c.padding;
    let padded_w = input.width + 2 * c.padding;
    if c.kernel == 0 || c.out_channels == 0 || c.kernel > padded_h || c.kernel > padded_w {
        return Err(RefError::config(format!(
            "{}: kernel {} does not fit a {}x{} input",
            c.name, c.kernel, padded_h, padded_w
        )));
    }
    let mut height = padded_h - c.kernel + 1;
    let mut width = padded_w - c.kernel + 1;
    if let Some(p) = c.pool {
        if p == 0 || height % p != 0 || width % p != 0 {
            return Err(RefError::config(format!(
                "{}: pool {p} does not divide the {height}x{width} feature map",
                c.name
            )));
        }
        height /= p;
        width /= p;
    }
    Ok(Dims {
        channels: c.out_channels,
        height,
        width,
    })
}
