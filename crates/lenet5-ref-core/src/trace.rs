//! Trace Emitter
//!
//! 段のスナップショットを RTL シミュレーションのトレースと同じ行形式で書き出す。
//! 行の並び（channel → row → col）がハードウェアの走査順と一致していないと
//! diff が通らないため、サンプルは必ず1つずつ順番に書く。

use crate::codec::encode_trace;
use crate::error::{RefError, Result};
use crate::io::open_text_writer;
use crate::pipeline::{PADDED_INPUT_STAGE, Stage, StageKind};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// 書き込みモード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// 末尾に追記（複数サンプルの累積トレース）
    Append,
    /// 上書き
    Overwrite,
}

/// 出力するトレースの範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    /// 何も書かない
    Off,
    /// パディング済み入力のみ（サンプルごとに追記）
    PaddedInput,
    /// 全段（1サンプル実行時のみ）
    Full,
}

impl TraceLevel {
    /// 評価枚数から決める
    ///
    /// - 1枚: `Full`
    /// - `partial_limit` 枚以下: `PaddedInput`
    /// - それ以上: `Off`
    pub fn for_run(sample_count: usize, partial_limit: usize) -> Self {
        if sample_count == 1 {
            Self::Full
        } else if sample_count <= partial_limit {
            Self::PaddedInput
        } else {
            Self::Off
        }
    }

    /// この段を書き出すか
    pub fn wants(self, kind: StageKind) -> bool {
        match self {
            Self::Off => false,
            Self::PaddedInput => kind == StageKind::PaddedInput,
            Self::Full => true,
        }
    }

    /// 文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::PaddedInput => "padded_input",
            Self::Full => "full",
        }
    }
}

/// 段の書き込みモード（パディング済み入力だけが累積）
pub fn mode_for(kind: StageKind) -> TraceMode {
    match kind {
        StageKind::PaddedInput => TraceMode::Append,
        _ => TraceMode::Overwrite,
    }
}

/// テンソルを1ファイルへ書き出す
pub fn emit(
    quantized: &[i8],
    values: &[f32],
    destination: &Path,
    width: usize,
    mode: TraceMode,
) -> Result<()> {
    let text = encode_trace(quantized, values, width)?;
    let mut w = open_text_writer(destination, mode == TraceMode::Append)?;
    w.write_all(text.as_bytes())
        .and_then(|_| w.flush())
        .map_err(|e| RefError::io(destination, e))
}

/// トレースディレクトリへの書き出し係
pub struct TraceWriter {
    dir: PathBuf,
    level: TraceLevel,
}

impl TraceWriter {
    pub fn new(dir: impl Into<PathBuf>, level: TraceLevel) -> Self {
        Self {
            dir: dir.into(),
            level,
        }
    }

    pub fn level(&self) -> TraceLevel {
        self.level
    }

    /// 段名に対応するファイルパス
    pub fn path_for(&self, stage_name: &str) -> PathBuf {
        self.dir.join(format!("{stage_name}.txt"))
    }

    /// 実行開始時の準備
    ///
    /// 前回のパディング済み入力トレースはレベルに関係なく削除する。
    /// ディレクトリは書き出すときだけ作る。
    pub fn begin_run(&self) -> Result<()> {
        if self.level != TraceLevel::Off {
            std::fs::create_dir_all(&self.dir).map_err(|e| RefError::io(&self.dir, e))?;
        }
        let padded = self.path_for(PADDED_INPUT_STAGE);
        match std::fs::remove_file(&padded) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RefError::io(&padded, e)),
        }
    }

    /// 段を受け取り、レベルに応じて書き出す（書いたら true）
    pub fn record(&self, stage: &Stage) -> Result<bool> {
        if !self.level.wants(stage.kind) {
            return Ok(false);
        }
        let path = self.path_for(&stage.name);
        emit(
            &stage.quantized,
            &stage.values,
            &path,
            stage.trace_width,
            mode_for(stage.kind),
        )?;
        log::debug!("trace {} ({} lines)", path.display(), stage.quantized.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, kind: StageKind, q: Vec<i8>, v: Vec<f32>, width: usize) -> Stage {
        Stage {
            name: name.to_owned(),
            kind,
            quantized: q,
            values: v,
            trace_width: width,
        }
    }

    #[test]
    fn test_trace_level_for_run() {
        assert_eq!(TraceLevel::for_run(1, 100), TraceLevel::Full);
        assert_eq!(TraceLevel::for_run(2, 100), TraceLevel::PaddedInput);
        assert_eq!(TraceLevel::for_run(100, 100), TraceLevel::PaddedInput);
        assert_eq!(TraceLevel::for_run(101, 100), TraceLevel::Off);
        assert!(!TraceLevel::PaddedInput.wants(StageKind::Output));
        assert!(TraceLevel::Full.wants(StageKind::PostActivation));
    }

    #[test]
    fn test_emit_append_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        emit(&[-1, 2], &[-0.5, 1.0], &path, 2, TraceMode::Overwrite).unwrap();
        emit(&[3], &[1.5], &path, 2, TraceMode::Append).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "(00, 00, 00) 0xff, -0.500000\n(00, 00, 01) 0x02, 1.000000\n(00, 00, 00) 0x03, 1.500000\n"
        );

        emit(&[4], &[2.0], &path, 1, TraceMode::Overwrite).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "(00, 00, 00) 0x04, 2.000000\n");
    }

    #[test]
    fn test_writer_partial_level_accumulates_padded_input_only() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::new(dir.path().join("trace"), TraceLevel::PaddedInput);
        writer.begin_run().unwrap();

        let padded = stage(PADDED_INPUT_STAGE, StageKind::PaddedInput, vec![1], vec![1.0], 1);
        let out = stage("fc3_output", StageKind::Output, vec![1], vec![1.0], 1);
        assert!(writer.record(&padded).unwrap());
        assert!(writer.record(&padded).unwrap());
        assert!(!writer.record(&out).unwrap());

        let text = std::fs::read_to_string(writer.path_for(PADDED_INPUT_STAGE)).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(!writer.path_for("fc3_output").exists());

        // 次の実行では累積をリセット
        writer.begin_run().unwrap();
        assert!(!writer.path_for(PADDED_INPUT_STAGE).exists());
    }

    #[test]
    fn test_writer_off_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let trace_dir = dir.path().join("never");
        let writer = TraceWriter::new(&trace_dir, TraceLevel::Off);
        writer.begin_run().unwrap();
        let padded = stage(PADDED_INPUT_STAGE, StageKind::PaddedInput, vec![1], vec![1.0], 1);
        assert!(!writer.record(&padded).unwrap());
        assert!(!trace_dir.exists());
    }

    #[test]
    fn test_off_run_removes_previous_padded_trace() {
        let dir = tempfile::tempdir().unwrap();
        let partial = TraceWriter::new(dir.path(), TraceLevel::PaddedInput);
        partial.begin_run().unwrap();
        let padded = stage(PADDED_INPUT_STAGE, StageKind::PaddedInput, vec![1], vec![1.0], 1);
        partial.record(&padded).unwrap();
        assert!(partial.path_for(PADDED_INPUT_STAGE).exists());

        let off = TraceWriter::new(dir.path(), TraceLevel::Off);
        off.begin_run().unwrap();
        assert!(!off.path_for(PADDED_INPUT_STAGE).exists());
    }
}
