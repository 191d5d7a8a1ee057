//! 浮動小数点の層演算
//!
//! - `pad`: 定数値による周囲パディング
//! - `conv2d`: 正方カーネル・stride 1 の畳み込み
//! - `relu`: max(0, x)
//! - `max_pool2d`: 非重複 max pooling
//! - `linear`: 全結合アフィン変換（入力×重み + バイアス）
//!
//! すべて逆量子化済み（実数）の重み・活性で計算する。積和は f32 で、
//! バイアスは積和の後に加算する。

use crate::tensor::FeatureMap;

/// 周囲に `pad` 画素ずつ `value` を埋める
pub fn pad(input: &FeatureMap, pad: usize, value: f32) -> FeatureMap {
    if pad == 0 {
        return input.clone();
    }
    let h = input.height + 2 * pad;
    let w = input.width + 2 * pad;
    let mut data = vec![value; input.channels * h * w];
    for c in 0..input.channels {
        for y in 0..input.height {
            let src = (c * input.height + y) * input.width;
            let dst = (c * h + y + pad) * w + pad;
            data[dst..dst + input.width].copy_from_slice(&input.data[src..src + input.width]);
        }
    }
    FeatureMap::new(input.channels, h, w, data)
}

/// 畳み込みの順伝播
///
/// `weight` は `[out, in, k, k]` の行優先、`bias` は `[out]`。
/// パディングは `padding` 画素を `pad_value` で埋めた上で valid 畳み込みとして計算する。
pub fn conv2d(
    input: &FeatureMap,
    weight: &[f32],
    bias: &[f32],
    kernel: usize,
    padding: usize,
    pad_value: f32,
) -> FeatureMap {
    let padded = pad(input, padding, pad_value);
    let out_channels = bias.len();
    let in_channels = padded.channels;
    debug_assert_eq!(weight.len(), out_channels * in_channels * kernel * kernel);

    let oh = padded.height - kernel + 1;
    let ow = padded.width - kernel + 1;
    let mut out = Vec::with_capacity(out_channels * oh * ow);

    for (oc, &b) in bias.iter().enumerate() {
        let w_oc = &weight[oc * in_channels * kernel * kernel..(oc + 1) * in_channels * kernel * kernel];
        for y in 0..oh {
            for x in 0..ow {
                let mut acc = 0.0f32;
                for ic in 0..in_channels {
                    let w_ic = &w_oc[ic * kernel * kernel..(ic + 1) * kernel * kernel];
                    for ky in 0..kernel {
                        let row = (ic * padded.height + y + ky) * padded.width + x;
                        let w_row = &w_ic[ky * kernel..(ky + 1) * kernel];
                        for (kx, &w) in w_row.iter().enumerate() {
                            acc += padded.data[row + kx] * w;
                        }
                    }
                }
                out.push(acc + b);
            }
        }
    }

    FeatureMap::new(out_channels, oh, ow, out)
}

/// ReLU（その場で適用）
pub fn relu(values: &mut [f32]) {
    for v in values.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

/// 非重複 max pooling（窓 `size`、stride `size`）
pub fn max_pool2d(input: &FeatureMap, size: usize) -> FeatureMap {
    let oh = input.height / size;
    let ow = input.width / size;
    let mut out = Vec::with_capacity(input.channels * oh * ow);
    for c in 0..input.channels {
        for y in 0..oh {
            for x in 0..ow {
                let mut m = f32::NEG_INFINITY;
                for dy in 0..size {
                    for dx in 0..size {
                        let v = input.at(c, y * size + dy, x * size + dx);
                        if v > m {
                            m = v;
                        }
                    }
                }
                out.push(m);
            }
        }
    }
    FeatureMap::new(input.channels, oh, ow, out)
}

/// 全結合層の順伝播
///
/// `weight` は `[out, in]` の行優先。
pub fn linear(input: &[f32], weight: &[f32], bias: &[f32]) -> Vec<f32> {
    let in_dim = input.len();
    debug_assert_eq!(weight.len(), bias.len() * in_dim);
    bias.iter()
        .enumerate()
        .map(|(o, &b)| {
            let row = &weight[o * in_dim..(o + 1) * in_dim];
            let acc = row.iter().zip(input).fold(0.0f32, |acc, (&w, &x)| acc + w * x);
            acc + b
        })
        .collect()
}

/// 最大値のインデックス（同値なら小さい方）
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, m)) if v <= m => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
