//! Fake-Quantization Engine
//!
//! 量子化境界ごとに `round → clamp → dequantize` を f32 で再現する。
//!
//! ```text
//! q  = clamp(round(x * scale_inv + zp), -128, 127)
//! dq = (q - zp) * scale
//! ```
//!
//! クランプ範囲は格納幅に関係なく常に符号付き 8bit。活性の量子化境界は
//! すべて 8bit 精度を対象とする（16bit はバイアスの格納にしか使わない）。

use crate::scale::Scale;
use serde::{Deserialize, Serialize};

/// 量子化後の最小値
pub const QMIN: i32 = -128;
/// 量子化後の最大値
pub const QMAX: i32 = 127;

/// 丸めモード
///
/// ハードウェアの丸めと bit 単位で一致させる必要がある。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// 最近接偶数丸め（banker's rounding）
    #[default]
    HalfEven,
    /// 0 から遠い方へ丸める
    HalfAwayFromZero,
}

impl RoundingMode {
    /// 文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HalfEven => "half_even",
            Self::HalfAwayFromZero => "half_away_from_zero",
        }
    }

    #[inline]
    pub fn round(self, x: f32) -> f32 {
        match self {
            Self::HalfEven => x.round_ties_even(),
            Self::HalfAwayFromZero => x.round(),
        }
    }
}

impl std::fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RoundingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "half_even" | "half-even" => Ok(Self::HalfEven),
            "half_away_from_zero" | "half-away-from-zero" => Ok(Self::HalfAwayFromZero),
            _ => Err(format!("unknown rounding mode: {s}")),
        }
    }
}

/// fake quantization の結果
#[derive(Debug, Clone, PartialEq)]
pub struct FakeQuant {
    /// 量子化コード（トレース・比較専用）
    pub quantized: Vec<i8>,
    /// 逆量子化値（次段の浮動小数点演算に流れる）
    pub dequantized: Vec<f32>,
}

/// fake quantization 演算器
///
/// ゼロ点は 0 固定（対称量子化）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quantizer {
    rounding: RoundingMode,
    zero_point: i32,
}

impl Quantizer {
    pub const fn new(rounding: RoundingMode) -> Self {
        Self {
            rounding,
            zero_point: 0,
        }
    }

    pub fn rounding(&self) -> RoundingMode {
        self.rounding
    }

    /// 1要素を量子化し `(q, dq)` を返す
    ///
    /// `dq` は f32 の `q` から計算するので、`round(-0.4) = -0.0` の符号も残る。
    #[inline]
    pub fn quantize_one(&self, x: f32, scale: Scale) -> (i8, f32) {
        let zp = self.zero_point as f32;
        let scaled = x * scale.scale_inv() as f32 + zp;
        let q = self.rounding.round(scaled).clamp(QMIN as f32, QMAX as f32);
        let dq = (q - zp) * scale.scale() as f32;
        (q as i8, dq)
    }

    /// テンソル全体を fake quantization
    pub fn fake_quant(&self, x: &[f32], scale: Scale) -> FakeQuant {
        let mut quantized = Vec::with_capacity(x.len());
        let mut dequantized = Vec::with_capacity(x.len());
        for &v in x {
            let (q, dq) = self.quantize_one(v, scale);
            quantized.push(q);
            dequantized.push(dq);
        }
        FakeQuant {
            quantized,
            dequantized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(s: f64) -> Scale {
        Scale::new(s).unwrap()
    }

    #[test]
    fn test_clamp_boundaries() {
        let q = Quantizer::default();
        // scale 0.5 → x * 2
        let r = q.fake_quant(&[100.0, -150.0], scale(0.5));
        assert_eq!(r.quantized, vec![127, -128]);
        assert_eq!(r.dequantized, vec![63.5, -64.0]);
    }

    #[test]
    fn test_half_even_vs_away_from_zero() {
        let even = Quantizer::new(RoundingMode::HalfEven);
        let away = Quantizer::new(RoundingMode::HalfAwayFromZero);
        let x = [0.5f32, 1.5, 2.5, -0.5, -2.5];
        assert_eq!(even.fake_quant(&x, Scale::unit()).quantized, vec![0, 2, 2, 0, -2]);
        assert_eq!(away.fake_quant(&x, Scale::unit()).quantized, vec![1, 2, 3, -1, -3]);
    }

    #[test]
    fn test_negative_zero_survives() {
        let q = Quantizer::default();
        let (code, dq) = q.quantize_one(-0.424, Scale::unit());
        assert_eq!(code, 0);
        assert!(dq == 0.0 && dq.is_sign_negative());
    }

    #[test]
    fn test_requantization_is_stable() {
        let q = Quantizer::default();
        let s = scale(0.037);
        let x: Vec<f32> = (-300..300).map(|i| i as f32 * 0.0173).collect();
        let first = q.fake_quant(&x, s);
        let second = q.fake_quant(&first.dequantized, s);
        assert_eq!(first.quantized, second.quantized);
        assert_eq!(first.dequantized, second.dequantized);
    }

    #[test]
    fn test_rounding_mode_parse() {
        assert_eq!("half_even".parse::<RoundingMode>().unwrap(), RoundingMode::HalfEven);
        assert_eq!(
            "half-away-from-zero".parse::<RoundingMode>().unwrap(),
            RoundingMode::HalfAwayFromZero
        );
        assert!("nearest".parse::<RoundingMode>().is_err());
    }
}
