//! Scale Store
//!
//! scale はファイル上では逆数 `1/scale` として保存される。

use crate::error::{RefError, Result};
use crate::io::read_text;
use std::path::Path;

/// scale と逆数の組
///
/// `scale_inv` はファイルの値をそのまま使わず `1 / scale` として再計算する。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    scale: f64,
    scale_inv: f64,
}

impl Scale {
    /// scale から作成（`scale > 0` かつ有限であること）
    pub fn new(scale: f64) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RefError::config(format!("scale must be positive and finite, got {scale}")));
        }
        Ok(Self {
            scale,
            scale_inv: 1.0 / scale,
        })
    }

    /// scale = 1
    pub const fn unit() -> Self {
        Self {
            scale: 1.0,
            scale_inv: 1.0,
        }
    }

    /// ファイルに保存された逆数から作成
    pub fn from_stored_inverse(stored: f64, origin: &str) -> Result<Self> {
        if stored == 0.0 {
            return Err(RefError::DivideByZero {
                origin: origin.to_owned(),
            });
        }
        Self::new(1.0 / stored).map_err(|e| match e {
            RefError::Configuration(msg) => RefError::Configuration(format!("{origin}: {msg}")),
            other => other,
        })
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    #[inline]
    pub fn scale_inv(&self) -> f64 {
        self.scale_inv
    }
}

/// scale ファイルのテキストを解釈する（単一の実数 = `1/scale`）
pub fn parse_scale(text: &str, origin: &str) -> Result<Scale> {
    let trimmed = text.trim();
    let stored: f64 = trimmed.parse().map_err(|_| RefError::Format {
        origin: origin.to_owned(),
        line: 1,
        detail: format!("not a real number: {trimmed:?}"),
    })?;
    Scale::from_stored_inverse(stored, origin)
}

/// scale ファイルを読み込む
pub fn load_scale<P: AsRef<Path>>(path: P) -> Result<Scale> {
    let p = path.as_ref();
    let scale = parse_scale(&read_text(p)?, &p.display().to_string())?;
    log::debug!("{}: scale={} (inv={})", p.display(), scale.scale, scale.scale_inv);
    Ok(scale)
}
