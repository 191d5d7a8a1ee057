//! Layer Pipeline
//!
//! トポロジ記述を順に解釈し、量子化境界ごとの中間テンソルを [`Stage`] として
//! 1層ずつ遅延生成する。ファイル出力は行わない（永続化は [`crate::trace`] 側の責務）。
//!
//! # 段の並び（LeNet-5）
//!
//! ```text
//! Input ─fq→ x_dq ─pad(bg)─fq→ [input_y_q_padd]
//!   x_dq → Conv1 → ReLU ─fq→ [conv1_y_post_activation]
//!        → Pool ─fq→ [conv1_y_q]
//!        → Conv2 → ReLU ─fq→ [conv2_y_post_activation]
//!        → Pool ─fq→ [conv2_y_q] ─flatten→ [fc1_input]
//!        → FC1 → ReLU ─fq→ [fc2_input]
//!        → FC2 → ReLU ─fq→ [fc3_input]
//!        → FC3 ─fq→ [fc3_output] = logits
//! ```
//!
//! 次段に流れるのは常に逆量子化値で、量子化コードはトレース比較用にだけ残す。

use crate::dataset::Normalization;
use crate::error::{RefError, Result};
use crate::layers::{argmax, conv2d, linear, max_pool2d, pad, relu};
use crate::params::{LayerParameters, NetworkParameters};
use crate::quant::Quantizer;
use crate::scale::Scale;
use crate::tensor::FeatureMap;
use crate::topology::{ConvSpec, LayerSpec, LinearSpec, PadFill, Topology};
use std::collections::VecDeque;

/// パディング済み入力の段名
pub const PADDED_INPUT_STAGE: &str = "input_y_q_padd";

/// 段の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// パディング済み・再量子化済みの入力
    PaddedInput,
    /// 畳み込み + 活性化の直後（値は量子化前の実数）
    PostActivation,
    /// pooling 後の再量子化
    Requantized,
    /// 全結合層への入力
    LayerInput,
    /// 最終出力（ロジット）
    Output,
}

/// 1つの量子化境界のスナップショット
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// トレースファイル名の基になる段名
    pub name: String,
    pub kind: StageKind,
    pub quantized: Vec<i8>,
    pub values: Vec<f32>,
    /// トレースのアドレス分解に使う幅
    pub trace_width: usize,
}

/// 推論ネットワーク（トポロジ + パラメータ + 量子化設定）
///
/// 構築後は不変。サンプルごとに [`Network::forward_pass`] を呼ぶ。
#[derive(Debug, Clone)]
pub struct Network {
    topology: Topology,
    params: NetworkParameters,
    quantizer: Quantizer,
    normalization: Normalization,
}

impl Network {
    pub fn new(
        topology: Topology,
        params: NetworkParameters,
        quantizer: Quantizer,
        normalization: Normalization,
    ) -> Result<Self> {
        topology.validate()?;
        params.check_against(&topology)?;
        Ok(Self {
            topology,
            params,
            quantizer,
            normalization,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn params(&self) -> &NetworkParameters {
        &self.params
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    pub fn input_scale(&self) -> Scale {
        self.params.input_scale
    }

    /// 正規化済み入力から段の列を生成するイテレータを作る
    pub fn forward_pass(&self, input: &[f32]) -> Result<ForwardPass<'_>> {
        let dims = self.topology.input_dims();
        if input.len() != dims.len() {
            return Err(RefError::ShapeMismatch {
                origin: "network input".to_owned(),
                expected: dims.len(),
                actual: input.len(),
                skipped: 0,
            });
        }
        let input = FeatureMap::new(dims.channels, dims.height, dims.width, input.to_vec());
        Ok(ForwardPass {
            net: self,
            input: Some(input),
            current: FeatureMap::vector(Vec::new()),
            next_layer: 0,
            pending: VecDeque::new(),
            logits: None,
        })
    }

    /// ロジット（逆量子化済み）だけを求める
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>> {
        Ok(self.forward_pass(input)?.finish())
    }

    /// 予測クラス
    pub fn classify(&self, input: &[f32]) -> Result<usize> {
        let logits = self.forward(input)?;
        argmax(&logits).ok_or_else(|| RefError::config("network produced no logits"))
    }

    fn pad_value(&self, fill: PadFill) -> f32 {
        match fill {
            PadFill::Zero => 0.0,
            PadFill::Background => self.normalization.background(),
        }
    }
}

/// 1サンプル分の順伝播
///
/// `next()` のたびに必要な分だけ層を計算する。
pub struct ForwardPass<'a> {
    net: &'a Network,
    input: Option<FeatureMap>,
    current: FeatureMap,
    next_layer: usize,
    pending: VecDeque<Stage>,
    logits: Option<Vec<f32>>,
}

impl ForwardPass<'_> {
    /// 残りの段を計算し、ロジットを返す
    pub fn finish(mut self) -> Vec<f32> {
        while self.next().is_some() {}
        self.logits.take().unwrap_or_default()
    }

    /// 最終層まで計算済みならロジット
    pub fn logits(&self) -> Option<&[f32]> {
        self.logits.as_deref()
    }

    // =========================================================================
    // 入力段
    // =========================================================================

    fn run_input(&mut self, x: FeatureMap) {
        let net = self.net;
        let scale = net.input_scale();
        let fq = net.quantizer.fake_quant(&x.data, scale);
        let x_dq = FeatureMap::new(x.channels, x.height, x.width, fq.dequantized);

        let padding = net.topology.input.trace_padding;
        let padded = pad(&x_dq, padding, net.normalization.background());
        let padded_fq = net.quantizer.fake_quant(&padded.data, scale);
        self.pending.push_back(Stage {
            name: PADDED_INPUT_STAGE.to_owned(),
            kind: StageKind::PaddedInput,
            quantized: padded_fq.quantized,
            values: padded_fq.dequantized,
            trace_width: padded.width,
        });

        self.current = x_dq;
    }

    // =========================================================================
    // 畳み込み層
    // =========================================================================

    fn run_conv(&mut self, spec: &ConvSpec, p: &LayerParameters, next: Option<&LayerSpec>) {
        let net = self.net;
        let fill = net.pad_value(spec.pad_fill);
        let mut y = conv2d(
            &self.current,
            p.weight_real(),
            p.bias_real(),
            spec.kernel,
            spec.padding,
            fill,
        );
        if spec.relu {
            relu(&mut y.data);
        }

        // 活性化直後: コードは量子化値、値は量子化前の実数
        let post = net.quantizer.fake_quant(&y.data, p.output_scale);
        self.pending.push_back(Stage {
            name: format!("{}_y_post_activation", spec.name),
            kind: StageKind::PostActivation,
            quantized: post.quantized,
            values: y.data.clone(),
            trace_width: y.width,
        });

        if let Some(size) = spec.pool {
            y = max_pool2d(&y, size);
        }

        let fq = net.quantizer.fake_quant(&y.data, p.output_scale);
        self.pending.push_back(Stage {
            name: format!("{}_y_q", spec.name),
            kind: StageKind::Requantized,
            quantized: fq.quantized.clone(),
            values: fq.dequantized.clone(),
            trace_width: y.width,
        });

        // flatten して全結合層へ
        if let Some(LayerSpec::Linear(l)) = next {
            self.pending.push_back(Stage {
                name: format!("{}_input", l.name),
                kind: StageKind::LayerInput,
                quantized: fq.quantized,
                values: fq.dequantized.clone(),
                trace_width: fq.dequantized.len(),
            });
        }

        log::trace!(
            "{}: {}x{}x{} (pad fill {})",
            spec.name,
            y.channels,
            y.height,
            y.width,
            spec.pad_fill.as_str()
        );
        self.current = FeatureMap::new(y.channels, y.height, y.width, fq.dequantized);
    }

    // =========================================================================
    // 全結合層
    // =========================================================================

    fn run_linear(&mut self, spec: &LinearSpec, p: &LayerParameters, next: Option<&LayerSpec>) {
        let net = self.net;
        let mut y = linear(&self.current.data, p.weight_real(), p.bias_real());
        if spec.relu {
            relu(&mut y);
        }

        let fq = net.quantizer.fake_quant(&y, p.output_scale);
        let (name, kind) = match next {
            Some(n) => (format!("{}_input", n.name()), StageKind::LayerInput),
            None => (format!("{}_output", spec.name), StageKind::Output),
        };
        self.pending.push_back(Stage {
            name,
            kind,
            quantized: fq.quantized,
            values: fq.dequantized.clone(),
            trace_width: y.len(),
        });

        if next.is_none() {
            self.logits = Some(fq.dequantized.clone());
        }
        self.current = FeatureMap::vector(fq.dequantized);
    }

    fn run_layer(&mut self, index: usize) {
        let net = self.net;
        let spec = &net.topology.layers[index];
        let params = &net.params.layers[index];
        let next = net.topology.layers.get(index + 1);
        match spec {
            LayerSpec::Conv(c) => self.run_conv(c, params, next),
            LayerSpec::Linear(l) => self.run_linear(l, params, next),
        }
    }
}

impl Iterator for ForwardPass<'_> {
    type Item = Stage;

    fn next(&mut self) -> Option<Stage> {
        loop {
            if let Some(stage) = self.pending.pop_front() {
                return Some(stage);
            }
            if let Some(x) = self.input.take() {
                self.run_input(x);
                continue;
            }
            if self.next_layer < self.net.topology.layers.len() {
                let index = self.next_layer;
                self.next_layer += 1;
                self.run_layer(index);
                continue;
            }
            return None;
        }
    }
}
