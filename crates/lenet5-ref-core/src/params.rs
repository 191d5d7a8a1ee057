//! 層パラメータの読み込み
//!
//! 層ごとに次のファイルを読む（`<layer>` は層名）。
//!
//! ```text
//! <layer>_weight_quantized.txt   int8  [out, in, (k, k)]
//! <layer>_bias_quantized.txt     int16 [out]
//! <layer>_weight_scale_inv.txt   1/weight_scale
//! <layer>_bias_scale_inv.txt     1/bias_scale
//! <layer>_output_scale_inv.txt   1/output_scale
//! input_scale_inv.txt            1/input_scale
//! ```
//!
//! 実数の重み・バイアスは読み込み時に一度だけ `q * scale` で作り、実行中は不変。

use crate::codec::{decode, encode_parameter};
use crate::error::{RefError, Result};
use crate::io::read_text;
use crate::scale::{Scale, load_scale};
use crate::tensor::{BitWidth, QuantizedTensor};
use crate::topology::{LayerSpec, Topology};
use std::path::Path;

/// 入力 scale のファイル名
pub const INPUT_SCALE_FILE: &str = "input_scale_inv.txt";

/// 層ごとのファイル名
pub struct LayerFiles {
    pub weight: String,
    pub bias: String,
    pub weight_scale: String,
    pub bias_scale: String,
    pub output_scale: String,
}

impl LayerFiles {
    pub fn for_layer(name: &str) -> Self {
        Self {
            weight: format!("{name}_weight_quantized.txt"),
            bias: format!("{name}_bias_quantized.txt"),
            weight_scale: format!("{name}_weight_scale_inv.txt"),
            bias_scale: format!("{name}_bias_scale_inv.txt"),
            output_scale: format!("{name}_output_scale_inv.txt"),
        }
    }
}

/// 1層分のパラメータ
#[derive(Debug, Clone)]
pub struct LayerParameters {
    pub name: String,
    pub weight: QuantizedTensor,
    pub bias: QuantizedTensor,
    pub weight_scale: Scale,
    pub bias_scale: Scale,
    pub output_scale: Scale,
    weight_real: Vec<f32>,
    bias_real: Vec<f32>,
}

impl LayerParameters {
    /// 量子化値と scale から作成し、実数値を導出する
    pub fn new(
        name: impl Into<String>,
        weight: QuantizedTensor,
        bias: QuantizedTensor,
        weight_scale: Scale,
        bias_scale: Scale,
        output_scale: Scale,
    ) -> Self {
        let weight_real = weight.dequantize(weight_scale.scale());
        let bias_real = bias.dequantize(bias_scale.scale());
        Self {
            name: name.into(),
            weight,
            bias,
            weight_scale,
            bias_scale,
            output_scale,
            weight_real,
            bias_real,
        }
    }

    /// ディレクトリから1層分を読み込む
    pub fn load(dir: &Path, spec: &LayerSpec) -> Result<Self> {
        let name = spec.name();
        let files = LayerFiles::for_layer(name);

        let weight = load_tensor(&dir.join(&files.weight), &spec.weight_shape(), BitWidth::W8)?;
        let bias = load_tensor(&dir.join(&files.bias), &spec.bias_shape(), BitWidth::W16)?;
        let weight_scale = load_scale(dir.join(&files.weight_scale))?;
        let bias_scale = load_scale(dir.join(&files.bias_scale))?;
        let output_scale = load_scale(dir.join(&files.output_scale))?;

        log::debug!(
            "{name}: weight {:?}, bias {:?}, output scale {}",
            weight.shape(),
            bias.shape(),
            output_scale.scale()
        );

        Ok(Self::new(name, weight, bias, weight_scale, bias_scale, output_scale))
    }

    /// 逆量子化済み重み
    pub fn weight_real(&self) -> &[f32] {
        &self.weight_real
    }

    /// 逆量子化済みバイアス
    pub fn bias_real(&self) -> &[f32] {
        &self.bias_real
    }
}

fn load_tensor(path: &Path, shape: &[usize], bit_width: BitWidth) -> Result<QuantizedTensor> {
    decode(&read_text(path)?, shape, bit_width, &path.display().to_string())
}

/// ネットワーク全体のパラメータ
#[derive(Debug, Clone)]
pub struct NetworkParameters {
    pub input_scale: Scale,
    pub layers: Vec<LayerParameters>,
}

impl NetworkParameters {
    /// トポロジの層順にディレクトリから読み込む
    pub fn load(dir: &Path, topology: &Topology) -> Result<Self> {
        topology.validate()?;
        let input_scale = load_scale(dir.join(INPUT_SCALE_FILE))?;
        let layers = topology
            .layers
            .iter()
            .map(|spec| LayerParameters::load(dir, spec))
            .collect::<Result<Vec<_>>>()?;
        log::info!("loaded {} layer(s) from {}", layers.len(), dir.display());
        Ok(Self {
            input_scale,
            layers,
        })
    }

    /// トポロジと形状が一致するか確認
    pub fn check_against(&self, topology: &Topology) -> Result<()> {
        if self.layers.len() != topology.layers.len() {
            return Err(RefError::config(format!(
                "{} parameter set(s) for {} layer(s)",
                self.layers.len(),
                topology.layers.len()
            )));
        }
        for (p, spec) in self.layers.iter().zip(&topology.layers) {
            if p.name != spec.name()
                || p.weight.shape() != spec.weight_shape().as_slice()
                || p.bias.shape() != spec.bias_shape().as_slice()
            {
                return Err(RefError::config(format!(
                    "parameters {} {:?}/{:?} do not match layer {}",
                    p.name,
                    p.weight.shape(),
                    p.bias.shape(),
                    spec.name()
                )));
            }
        }
        Ok(())
    }

    /// 全ファイルを書き出す（ディレクトリは作成する）
    pub fn write(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| RefError::io(dir, e))?;
        write_input_scale(dir, self.input_scale)?;
        for layer in &self.layers {
            write_layer_files(dir, layer)?;
        }
        Ok(())
    }
}

/// 1層分のパラメータファイルを書き出す（`load` の逆）
pub fn write_layer_files(dir: &Path, params: &LayerParameters) -> Result<()> {
    let files = LayerFiles::for_layer(&params.name);
    let outputs = [
        (files.weight, encode_parameter(&params.weight, params.weight_scale.scale())),
        (files.bias, encode_parameter(&params.bias, params.bias_scale.scale())),
        (files.weight_scale, format_scale_inv(params.weight_scale)),
        (files.bias_scale, format_scale_inv(params.bias_scale)),
        (files.output_scale, format_scale_inv(params.output_scale)),
    ];
    for (name, text) in outputs {
        let path = dir.join(name);
        std::fs::write(&path, text).map_err(|e| RefError::io(&path, e))?;
    }
    Ok(())
}

/// 入力 scale ファイルを書き出す
pub fn write_input_scale(dir: &Path, scale: Scale) -> Result<()> {
    let path = dir.join(INPUT_SCALE_FILE);
    std::fs::write(&path, format_scale_inv(scale)).map_err(|e| RefError::io(&path, e))
}

fn format_scale_inv(scale: Scale) -> String {
    format!("{:?}\n", 1.0 / scale.scale())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::LinearSpec;

    fn tiny_linear() -> LayerSpec {
        LayerSpec::Linear(LinearSpec {
            name: "fc".to_owned(),
            in_features: 3,
            out_features: 2,
            relu: false,
        })
    }

    #[test]
    fn test_write_then_load_layer() {
        let dir = tempfile::tempdir().unwrap();
        let weight = QuantizedTensor::new(vec![2, 3], BitWidth::W8, vec![1, -2, 3, -128, 0, 127]).unwrap();
        let bias = QuantizedTensor::new(vec![2], BitWidth::W16, vec![-300, 1000]).unwrap();
        let params = LayerParameters::new(
            "fc",
            weight.clone(),
            bias.clone(),
            Scale::new(0.5).unwrap(),
            Scale::new(0.25).unwrap(),
            Scale::new(2.0).unwrap(),
        );
        write_layer_files(dir.path(), &params).unwrap();

        let loaded = LayerParameters::load(dir.path(), &tiny_linear()).unwrap();
        assert_eq!(loaded.weight, weight);
        assert_eq!(loaded.bias, bias);
        assert_eq!(loaded.weight_real(), &[0.5, -1.0, 1.5, -64.0, 0.0, 63.5]);
        assert_eq!(loaded.bias_real(), &[-75.0, 250.0]);
        assert_eq!(loaded.output_scale.scale(), 2.0);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LayerParameters::load(dir.path(), &tiny_linear()).unwrap_err();
        assert!(matches!(err, RefError::Io { .. }));
        assert!(err.to_string().contains("fc_weight_quantized.txt"));
    }
}
