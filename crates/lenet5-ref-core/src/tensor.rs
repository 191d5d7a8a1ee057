//! 量子化テンソルと特徴マップ

use crate::error::{RefError, Result};

/// 量子化値の格納ビット幅
///
/// 重み・活性は 8bit、バイアスは 16bit で保持される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitWidth {
    W8,
    W16,
}

impl BitWidth {
    /// ビット数
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
        }
    }

    /// 符号なし表現の法（256 / 65536）
    pub const fn modulus(self) -> u32 {
        1 << self.bits()
    }

    /// 符号付き最大値（127 / 32767）
    pub const fn signed_max(self) -> i32 {
        (1 << (self.bits() - 1)) - 1
    }

    /// 符号付き最小値（-128 / -32768）
    pub const fn signed_min(self) -> i32 {
        -(1 << (self.bits() - 1))
    }

    /// 16進表記の桁数
    pub const fn hex_digits(self) -> usize {
        (self.bits() / 4) as usize
    }

    /// 符号なし値を2の補数として符号付きに写像
    pub fn to_signed(self, raw: u32) -> i32 {
        if raw as i64 > self.signed_max() as i64 {
            raw as i32 - self.modulus() as i32
        } else {
            raw as i32
        }
    }

    /// 符号付き値を2の補数の符号なし表現に写像
    pub fn to_unsigned(self, value: i32) -> u32 {
        (value as u32) & (self.modulus() - 1)
    }
}

/// 量子化テンソル
///
/// 値は `i16` に格納する（8bit 値も 16bit 値もそのまま収まる）。
/// 不変条件: `values.len() == shape.iter().product()`、各値は `bit_width` の符号付き範囲内。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedTensor {
    shape: Vec<usize>,
    bit_width: BitWidth,
    values: Vec<i16>,
}

impl QuantizedTensor {
    /// 形状と範囲を検証して作成
    pub fn new(shape: Vec<usize>, bit_width: BitWidth, values: Vec<i16>) -> Result<Self> {
        let expected = element_count(&shape);
        if values.len() != expected {
            return Err(RefError::ShapeMismatch {
                origin: format!("tensor {shape:?}"),
                expected,
                actual: values.len(),
                skipped: 0,
            });
        }
        if let Some(&v) = values
            .iter()
            .find(|&&v| (v as i32) < bit_width.signed_min() || (v as i32) > bit_width.signed_max())
        {
            return Err(RefError::config(format!(
                "value {v} out of range for {}-bit tensor",
                bit_width.bits()
            )));
        }
        Ok(Self {
            shape,
            bit_width,
            values,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn bit_width(&self) -> BitWidth {
        self.bit_width
    }

    pub fn values(&self) -> &[i16] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 実数値に逆量子化（`q * scale`、f32 演算）
    pub fn dequantize(&self, scale: f64) -> Vec<f32> {
        let scale = scale as f32;
        self.values.iter().map(|&q| q as f32 * scale).collect()
    }
}

/// 形状の要素数
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// 浮動小数点の特徴マップ（CHW、行優先）
///
/// 1サンプルの順伝播中だけ存在する。全結合層の入出力は `height = width = 1` で表す。
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl FeatureMap {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    /// 1次元ベクトルとして作成
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            channels: data.len(),
            height: 1,
            width: 1,
            data,
        }
    }

    #[inline]
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
