//! ファイルI/Oユーティリティ（gzip対応）

use crate::error::{RefError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

/// `.gz` 拡張子なら透過的に展開するリーダーを開く
pub fn open_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    let f = File::open(p).map_err(|e| RefError::io(p, e))?;
    if is_gzip(p) {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// ファイル全体を文字列として読む
pub fn read_text<P: AsRef<Path>>(path: P) -> Result<String> {
    let p = path.as_ref();
    let mut text = String::new();
    open_reader(p)?.read_to_string(&mut text).map_err(|e| RefError::io(p, e))?;
    Ok(text)
}

/// ファイル全体をバイト列として読む
pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let p = path.as_ref();
    let mut bytes = Vec::new();
    open_reader(p)?.read_to_end(&mut bytes).map_err(|e| RefError::io(p, e))?;
    Ok(bytes)
}

/// `name` と `name.gz` のうち、最初に存在するものを候補ディレクトリから探す
pub fn find_with_gz(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    let gz_name = format!("{name}.gz");
    dirs.iter()
        .flat_map(|d| [d.join(name), d.join(&gz_name)])
        .find(|p| p.is_file())
}

/// テキスト出力用ライターを開く（`append = true` なら末尾追記）
pub fn open_text_writer<P: AsRef<Path>>(path: P, append: bool) -> Result<BufWriter<File>> {
    let p = path.as_ref();
    let f = if append {
        OpenOptions::new().create(true).append(true).open(p)
    } else {
        File::create(p)
    }
    .map_err(|e| RefError::io(p, e))?;
    Ok(BufWriter::new(f))
}

fn is_gzip(p: &Path) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_text_plain_and_gz() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("a.txt");
        std::fs::write(&plain, "12.5\n").unwrap();

        let gz = dir.path().join("b.txt.gz");
        let f = File::create(&gz).unwrap();
        let mut enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        enc.write_all(b"hello\n").unwrap();
        enc.finish().unwrap();

        assert_eq!(read_text(&plain).unwrap(), "12.5\n");
        assert_eq!(read_text(&gz).unwrap(), "hello\n");
    }

    #[test]
    fn test_find_with_gz_prefers_plain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.bin.gz"), b"").unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        assert_eq!(find_with_gz(&dirs, "x.bin"), Some(dir.path().join("x.bin.gz")));

        std::fs::write(dir.path().join("x.bin"), b"").unwrap();
        assert_eq!(find_with_gz(&dirs, "x.bin"), Some(dir.path().join("x.bin")));
        assert_eq!(find_with_gz(&dirs, "missing"), None);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = read_text("/nonexistent/dir/file.txt").err().unwrap();
        assert!(err.to_string().contains("/nonexistent/dir/file.txt"));
    }
}
