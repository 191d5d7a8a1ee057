//! 参照モデルのエラー型
//!
//! パラメータファイル・データセット・設定のいずれで失敗しても実行全体を中断する。
//! 比較対象の RTL トレースと食い違う出力を黙って生成するよりは停止する方が安全なため、
//! リトライや部分回復は持たない。

use std::path::PathBuf;

/// 参照モデル全体で使うエラー
#[derive(thiserror::Error, Debug)]
pub enum RefError {
    /// 16進トークンはあるが、宣言されたビット幅に収まらない
    #[error("{origin}: line {line}: {detail}")]
    Format {
        origin: String,
        line: usize,
        detail: String,
    },

    /// 要素数が shape の積と一致しない
    #[error(
        "{origin}: expected {expected} values, but got {actual} ({skipped} line(s) without a hex token were skipped)"
    )]
    ShapeMismatch {
        origin: String,
        expected: usize,
        actual: usize,
        skipped: usize,
    },

    /// scale ファイルの値が 0（逆数を取れない）
    #[error("{origin}: stored scale inverse is zero")]
    DivideByZero { origin: String },

    /// 実行設定・トポロジ・scale 値の不整合
    #[error("configuration error: {0}")]
    Configuration(String),

    /// MNIST IDX ファイルの破損
    #[error("{origin}: {detail}")]
    Dataset { origin: String, detail: String },

    /// ファイル I/O エラー
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RefError {
    /// パス付き I/O エラーを作る
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 設定エラーを作る
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// 参照モデルの Result 型
pub type Result<T> = std::result::Result<T, RefError>;
