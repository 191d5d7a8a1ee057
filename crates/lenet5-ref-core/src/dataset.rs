//! MNIST テストセットの読み込みと入力正規化
//!
//! IDX 形式（ビッグエンディアンのヘッダ + 生バイト列）を直接読む。
//! `.gz` のままでもよく、torchvision の配置（`<dir>/MNIST/raw/`）も探す。

use crate::error::{RefError, Result};
use crate::io::{find_with_gz, read_bytes};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

/// 入力正規化定数
///
/// 学習時の正規化と一致していなければならない。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Normalization {
    pub mean: f64,
    pub std: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: 0.1307,
            std: 0.3081,
        }
    }
}

impl Normalization {
    /// 画素値 [0, 255] → `(p / 255 - mean) / std`（f32 演算）
    pub fn normalize(&self, pixels: &[u8]) -> Vec<f32> {
        let mean = self.mean as f32;
        let std = self.std as f32;
        pixels.iter().map(|&p| (p as f32 / 255.0 - mean) / std).collect()
    }

    /// 画素値 0 の正規化後の値（パディングの埋め値）
    pub fn background(&self) -> f32 {
        ((0.0 - self.mean) / self.std) as f32
    }
}

/// 1枚の画像とラベル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub pixels: Vec<u8>,
    pub label: u8,
}

/// MNIST テストセット（10,000枚）を読み込む
pub fn load_mnist_test(dir: &Path) -> Result<Vec<Sample>> {
    let candidates = candidate_dirs(dir);
    let images_path = find_with_gz(&candidates, TEST_IMAGES).ok_or_else(|| missing(dir, TEST_IMAGES))?;
    let labels_path = find_with_gz(&candidates, TEST_LABELS).ok_or_else(|| missing(dir, TEST_LABELS))?;

    let (pixels_per_image, images) = parse_images(&read_bytes(&images_path)?, &images_path)?;
    let labels = parse_labels(&read_bytes(&labels_path)?, &labels_path)?;

    if images.len() != labels.len() {
        return Err(RefError::Dataset {
            origin: dir.display().to_string(),
            detail: format!("{} images but {} labels", images.len(), labels.len()),
        });
    }

    log::info!(
        "loaded {} MNIST test samples ({pixels_per_image} px) from {}",
        images.len(),
        images_path.display()
    );
    Ok(images
        .into_iter()
        .zip(labels)
        .map(|(pixels, label)| Sample { pixels, label })
        .collect())
}

fn candidate_dirs(dir: &Path) -> Vec<PathBuf> {
    vec![dir.to_path_buf(), dir.join("MNIST").join("raw")]
}

fn missing(dir: &Path, name: &str) -> RefError {
    RefError::Dataset {
        origin: dir.display().to_string(),
        detail: format!("{name}(.gz) not found"),
    }
}

fn read_u32_be(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// 画像 IDX（magic 2051, count, rows, cols, data）
pub fn parse_images(bytes: &[u8], path: &Path) -> Result<(usize, Vec<Vec<u8>>)> {
    let err = |detail: String| RefError::Dataset {
        origin: path.display().to_string(),
        detail,
    };
    let header: Option<[u32; 4]> = (|| {
        Some([
            read_u32_be(bytes, 0)?,
            read_u32_be(bytes, 4)?,
            read_u32_be(bytes, 8)?,
            read_u32_be(bytes, 12)?,
        ])
    })();
    let Some([magic, count, rows, cols]) = header else {
        return Err(err("truncated image header".to_owned()));
    };
    if magic != IMAGES_MAGIC {
        return Err(err(format!("invalid image magic {magic}, expected {IMAGES_MAGIC}")));
    }
    let sizes = (rows as usize).checked_mul(cols as usize).and_then(|per_image| {
        let expected = (count as usize).checked_mul(per_image)?.checked_add(16)?;
        Some((per_image, expected))
    });
    let Some((per_image, expected)) = sizes else {
        return Err(err(format!("image header {count} x {rows}x{cols} overflows")));
    };
    if per_image == 0 || bytes.len() < expected {
        return Err(err(format!(
            "expected {expected} bytes for {count} {rows}x{cols} images, got {}",
            bytes.len()
        )));
    }
    let images = bytes[16..expected].chunks(per_image).map(<[u8]>::to_vec).collect();
    Ok((per_image, images))
}

/// ラベル IDX（magic 2049, count, data）
pub fn parse_labels(bytes: &[u8], path: &Path) -> Result<Vec<u8>> {
    let err = |detail: String| RefError::Dataset {
        origin: path.display().to_string(),
        detail,
    };
    let (Some(magic), Some(count)) = (read_u32_be(bytes, 0), read_u32_be(bytes, 4)) else {
        return Err(err("truncated label header".to_owned()));
    };
    if magic != LABELS_MAGIC {
        return Err(err(format!("invalid label magic {magic}, expected {LABELS_MAGIC}")));
    }
    let Some(expected) = (count as usize).checked_add(8) else {
        return Err(err(format!("label count {count} overflows")));
    };
    if bytes.len() < expected {
        return Err(err(format!("expected {count} labels, got {}", bytes.len().saturating_sub(8))));
    }
    Ok(bytes[8..expected].to_vec())
}

/// IDX 画像ファイルのバイト列を組み立てる（テスト・フィクスチャ生成用）
pub fn encode_images(images: &[Vec<u8>], rows: u32, cols: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + images.len() * (rows * cols) as usize);
    for v in [IMAGES_MAGIC, images.len() as u32, rows, cols] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    for img in images {
        out.extend_from_slice(img);
    }
    out
}

/// IDX ラベルファイルのバイト列を組み立てる
pub fn encode_labels(labels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + labels.len());
    out.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
    out.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    out.extend_from_slice(labels);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalization_constants() {
        let n = Normalization::default();
        let x = n.normalize(&[0, 255]);
        assert!((x[0] - (-0.4242129)).abs() < 1e-6);
        assert!((x[1] - 2.8214867).abs() < 1e-5);
        assert!((n.background() - x[0]).abs() < 1e-6);
    }

    #[test]
    fn test_parse_idx_roundtrip() {
        let images = vec![vec![1u8, 2, 3, 4], vec![5, 6, 7, 8]];
        let bytes = encode_images(&images, 2, 2);
        let (per, parsed) = parse_images(&bytes, Path::new("img")).unwrap();
        assert_eq!(per, 4);
        assert_eq!(parsed, images);

        let labels = parse_labels(&encode_labels(&[7, 2]), Path::new("lbl")).unwrap();
        assert_eq!(labels, vec![7, 2]);
    }

    #[test]
    fn test_parse_idx_rejects_bad_magic_and_truncation() {
        let mut bytes = encode_images(&[vec![0u8; 4]], 2, 2);
        assert!(parse_images(&bytes[..10], Path::new("img")).is_err());
        bytes.truncate(18);
        assert!(parse_images(&bytes, Path::new("img")).is_err());
        assert!(parse_labels(&encode_images(&[], 2, 2), Path::new("lbl")).is_err());
    }

    #[test]
    fn test_parse_images_overflowing_header_is_error() {
        let mut bytes = Vec::new();
        for v in [2051u32, u32::MAX, u32::MAX, u32::MAX] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let err = parse_images(&bytes, Path::new("img")).unwrap_err();
        assert!(matches!(err, RefError::Dataset { .. }), "{err}");

        // 掛け算は収まるが実データが足りない
        let mut bytes = Vec::new();
        for v in [2051u32, u32::MAX, 28, 28] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        assert!(matches!(parse_images(&bytes, Path::new("img")), Err(RefError::Dataset { .. })));
    }

    #[test]
    fn test_load_mnist_test_torchvision_layout_gz() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("MNIST").join("raw");
        std::fs::create_dir_all(&raw).unwrap();

        let f = std::fs::File::create(raw.join(format!("{TEST_IMAGES}.gz"))).unwrap();
        let mut enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        enc.write_all(&encode_images(&[vec![9u8; 4]], 2, 2)).unwrap();
        enc.finish().unwrap();
        std::fs::write(raw.join(TEST_LABELS), encode_labels(&[3])).unwrap();

        let samples = load_mnist_test(dir.path()).unwrap();
        assert_eq!(samples, vec![Sample { pixels: vec![9; 4], label: 3 }]);
    }

    #[test]
    fn test_load_mnist_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TEST_IMAGES), encode_images(&[vec![0u8; 4]], 2, 2)).unwrap();
        std::fs::write(dir.path().join(TEST_LABELS), encode_labels(&[1, 2])).unwrap();
        assert!(matches!(load_mnist_test(dir.path()), Err(RefError::Dataset { .. })));
    }
}
