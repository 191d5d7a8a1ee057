//! Tensor Codec
//!
//! 量子化パラメータのテキスト形式の読み書きと、ハードウェアトレース互換の行形式。
//!
//! # パラメータ形式
//!
//! ```text
//! (00, 00, 02, 03) 0xfe, -0.0123
//! (05) 0x01a4, 0.00042
//! ```
//!
//! 読み込み時は各行の `0x` 付き16進トークンだけを見る。先頭のアドレス注記と
//! 後続の実数値は無視する。
//!
//! # トレース形式
//!
//! ```text
//! (cc, yy, xx) 0xHH, d.dddddd
//! ```

use crate::error::{RefError, Result};
use crate::tensor::{BitWidth, QuantizedTensor, element_count};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;

static HEX_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"0x[0-9a-fA-F]+").expect("hex token pattern is valid")
});

// =============================================================================
// 読み込み
// =============================================================================

/// パラメータテキストを量子化テンソルに復元
///
/// 要素は行優先（最終次元が最速）で `shape` に割り当てる。
/// 16進トークンのない行は警告を出して読み飛ばす。要素数が `shape` の積と
/// 一致しなければ `ShapeMismatch`。
pub fn decode(
    text: &str,
    shape: &[usize],
    bit_width: BitWidth,
    origin: &str,
) -> Result<QuantizedTensor> {
    let mut values = Vec::with_capacity(element_count(shape));
    let mut skipped = 0usize;

    for (i, line) in text.lines().enumerate() {
        let Some(token) = HEX_TOKEN.find(line) else {
            log::warn!("{origin}: line {}: no hex value found: {:?}", i + 1, line.trim());
            skipped += 1;
            continue;
        };
        values.push(parse_hex_token(token.as_str(), bit_width, origin, i + 1)?);
    }

    let expected = element_count(shape);
    if values.len() != expected {
        return Err(RefError::ShapeMismatch {
            origin: origin.to_owned(),
            expected,
            actual: values.len(),
            skipped,
        });
    }

    QuantizedTensor::new(shape.to_vec(), bit_width, values)
}

/// `0x..` トークンを符号付き値に変換
fn parse_hex_token(token: &str, bit_width: BitWidth, origin: &str, line: usize) -> Result<i16> {
    let digits = &token[2..];
    let raw = u32::from_str_radix(digits, 16).ok().filter(|&v| v < bit_width.modulus());
    let Some(raw) = raw else {
        return Err(RefError::Format {
            origin: origin.to_owned(),
            line,
            detail: format!("{token} does not fit in {} bits", bit_width.bits()),
        });
    };
    Ok(bit_width.to_signed(raw) as i16)
}

// =============================================================================
// パラメータ書き出し
// =============================================================================

/// 量子化テンソルをパラメータ形式で書き出す（`decode` の逆変換）
///
/// インデックスは各次元 2 桁ゼロ詰め、16進は 8bit なら 2 桁、16bit なら 4 桁。
/// 実数値は `q * scale`。
pub fn encode_parameter(tensor: &QuantizedTensor, scale: f64) -> String {
    let shape = tensor.shape();
    let digits = tensor.bit_width().hex_digits();
    let mut out = String::with_capacity(tensor.len() * 32);
    let mut index = vec![0usize; shape.len()];

    for &q in tensor.values() {
        let indices: Vec<String> = index.iter().map(|i| format!("{i:02}")).collect();
        let raw = tensor.bit_width().to_unsigned(q as i32);
        let real = q as f64 * scale;
        let _ = writeln!(out, "({}) 0x{raw:0digits$x}, {real:?}", indices.join(", "));
        advance_index(&mut index, shape);
    }
    out
}

/// 行優先の多次元インデックスを1つ進める
fn advance_index(index: &mut [usize], shape: &[usize]) {
    for d in (0..shape.len()).rev() {
        index[d] += 1;
        if index[d] < shape[d] {
            return;
        }
        index[d] = 0;
    }
}

// =============================================================================
// トレース形式
// =============================================================================

/// 線形インデックスを `(channel, row, col)` に分解
///
/// `width` を行・列の両方の幅として使う。全結合層のベクトルは
/// `width = 長さ` とすることで `(0, 0, idx)` になる。
#[inline]
pub fn trace_address(idx: usize, width: usize) -> (usize, usize, usize) {
    let plane = width * width;
    (idx / plane, (idx % plane) / width, idx % width)
}

/// トレース1行を書式化（末尾改行なし）
///
/// 負値は `256 + q` の2の補数で2桁16進にする。
pub fn format_trace_line(q: i8, value: f32, address: (usize, usize, usize)) -> String {
    let (c, y, x) = address;
    let raw = q as u8;
    format!("({c:02}, {y:02}, {x:02}) 0x{raw:02x}, {value:.6}")
}

/// テンソル全体をトレース形式に書式化
pub fn encode_trace(quantized: &[i8], values: &[f32], width: usize) -> Result<String> {
    if width == 0 {
        return Err(RefError::config("trace width must be positive"));
    }
    if quantized.len() != values.len() {
        return Err(RefError::ShapeMismatch {
            origin: "trace".to_owned(),
            expected: quantized.len(),
            actual: values.len(),
            skipped: 0,
        });
    }
    let mut out = String::with_capacity(quantized.len() * 32);
    for (idx, (&q, &v)) in quantized.iter().zip(values).enumerate() {
        out.push_str(&format_trace_line(q, v, trace_address(idx, width)));
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_sign_mapping() {
        let text = "(00) 0xff, -0.1\n(01) 0x80, -12.8\n(02) 0x7f, 12.7\n";
        let t = decode(text, &[3], BitWidth::W8, "test").unwrap();
        assert_eq!(t.values(), &[-1, -128, 127]);
    }

    #[test]
    fn test_decode_ignores_address_and_real() {
        // アドレス注記の数字や実数値を16進と誤認しない
        let text = "(12, 34) 0x0a, 0.5\n(12, 35) 0x1F\n";
        let t = decode(text, &[1, 2], BitWidth::W8, "test").unwrap();
        assert_eq!(t.values(), &[10, 31]);
        assert_eq!(t.shape(), &[1, 2]);
    }

    #[test]
    fn test_decode_16bit() {
        let text = "0xffff\n0x8000\n0x7fff\n0x0001\n";
        let t = decode(text, &[4], BitWidth::W16, "bias").unwrap();
        assert_eq!(t.values(), &[-1, -32768, 32767, 1]);
    }

    #[test]
    fn test_decode_skips_lines_without_token() {
        let text = "0x01\nnot a value\n0x02\n";
        let t = decode(text, &[2], BitWidth::W8, "test").unwrap();
        assert_eq!(t.values(), &[1, 2]);
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let text = "0x01\n0x02\n0x03\n";
        let err = decode(text, &[2, 2], BitWidth::W8, "w.txt").unwrap_err();
        assert!(matches!(
            err,
            RefError::ShapeMismatch {
                expected: 4,
                actual: 3,
                skipped: 0,
                ..
            }
        ));
        assert!(decode("0x01\n0x02\n0x03\n0x04\n", &[2, 2], BitWidth::W8, "w.txt").is_ok());
    }

    #[test]
    fn test_decode_rejects_oversized_token() {
        let err = decode("0x1ff\n", &[1], BitWidth::W8, "w.txt").unwrap_err();
        assert!(matches!(err, RefError::Format { line: 1, .. }));
        assert!(decode("0x1ff\n", &[1], BitWidth::W16, "b.txt").is_ok());
    }

    #[test]
    fn test_encode_parameter_format() {
        let t = QuantizedTensor::new(vec![1, 2], BitWidth::W8, vec![-2, 3]).unwrap();
        let text = encode_parameter(&t, 0.5);
        assert_eq!(text, "(00, 00) 0xfe, -1.0\n(00, 01) 0x03, 1.5\n");

        let b = QuantizedTensor::new(vec![2], BitWidth::W16, vec![-1, 420]).unwrap();
        assert_eq!(encode_parameter(&b, 1.0), "(00) 0xffff, -1.0\n(01) 0x01a4, 420.0\n");
    }

    #[test]
    fn test_trace_address() {
        assert_eq!(trace_address(14 * 14 * 2 + 14 * 3 + 5, 14), (2, 3, 5));
        assert_eq!(trace_address(0, 32), (0, 0, 0));
        assert_eq!(trace_address(399, 400), (0, 0, 399));
    }

    #[test]
    fn test_format_trace_line() {
        assert_eq!(format_trace_line(-1, -0.25, (0, 1, 2)), "(00, 01, 02) 0xff, -0.250000");
        assert_eq!(format_trace_line(127, 3.5, (5, 13, 13)), "(05, 13, 13) 0x7f, 3.500000");
        assert_eq!(format_trace_line(0, -0.0, (0, 0, 0)), "(00, 00, 00) 0x00, -0.000000");
        assert_eq!(format_trace_line(3, 3.0, (0, 0, 123)), "(00, 00, 123) 0x03, 3.000000");
    }

    #[test]
    fn test_encode_trace_length_mismatch() {
        assert!(encode_trace(&[1, 2], &[1.0], 2).is_err());
        assert!(encode_trace(&[1], &[1.0], 0).is_err());
    }

    #[test]
    fn test_roundtrip_full_8bit_range() {
        let values: Vec<i16> = (-128..=127).collect();
        let t = QuantizedTensor::new(vec![16, 16], BitWidth::W8, values).unwrap();
        let decoded = decode(&encode_parameter(&t, 0.5), &[16, 16], BitWidth::W8, "w").unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn test_roundtrip_full_16bit_range() {
        let values: Vec<i16> = (i16::MIN..=i16::MAX).collect();
        let t = QuantizedTensor::new(vec![values.len()], BitWidth::W16, values).unwrap();
        let decoded = decode(&encode_parameter(&t, 1e-3), &[65536], BitWidth::W16, "b").unwrap();
        assert_eq!(decoded, t);
    }

    proptest! {
        #[test]
        fn prop_roundtrip_8bit(values in prop::collection::vec(-128i16..=127, 1..64)) {
            let shape = vec![values.len()];
            let t = QuantizedTensor::new(shape.clone(), BitWidth::W8, values).unwrap();
            let decoded = decode(&encode_parameter(&t, 0.01), &shape, BitWidth::W8, "p").unwrap();
            prop_assert_eq!(decoded, t);
        }

        #[test]
        fn prop_roundtrip_16bit(values in prop::collection::vec(i16::MIN..=i16::MAX, 1..64)) {
            let shape = vec![values.len()];
            let t = QuantizedTensor::new(shape.clone(), BitWidth::W16, values).unwrap();
            let decoded = decode(&encode_parameter(&t, 1e-4), &shape, BitWidth::W16, "p").unwrap();
            prop_assert_eq!(decoded, t);
        }

        #[test]
        fn prop_trace_hex_roundtrip(q in i8::MIN..=i8::MAX) {
            let line = format_trace_line(q, 0.0, (0, 0, 0));
            let decoded = decode(&line, &[1], BitWidth::W8, "trace").unwrap();
            prop_assert_eq!(decoded.values()[0], q as i16);
        }
    }
}
