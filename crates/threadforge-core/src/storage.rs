//! Write-once artifact store for threads, images and batch reports.
//!
//! File names are `<prefix>_<timestamp>[_<sanitized title>].<ext>`; a numeric suffix is
//! added when a name is already taken, so concurrent writers never overwrite each other.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Characters of a title kept in a file name.
const MAX_TITLE_CHARS: usize = 30;

/// Errors from writing artifacts.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Local timestamp used in artifact names, e.g. `20250301_142233`.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Reduce a title to file-name-safe characters.
///
/// Keeps letters (including CJK), digits, `_`, `-` and whitespace; whitespace becomes `_`;
/// the result is trimmed and cut to `max_chars`.
pub fn sanitize_title(title: &str, max_chars: usize) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    kept.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .take(max_chars)
        .collect()
}

/// A directory of write-once artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the file stem for an artifact.
    pub fn stem(prefix: &str, title: Option<&str>) -> String {
        let ts = timestamp();
        match title.map(|t| sanitize_title(t, MAX_TITLE_CHARS)) {
            Some(safe) if !safe.is_empty() => format!("{}_{}_{}", prefix, ts, safe),
            _ => format!("{}_{}", prefix, ts),
        }
    }

    /// Serialize `value` as pretty JSON under a generated name.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        prefix: &str,
        title: Option<&str>,
        value: &T,
    ) -> Result<PathBuf, StoreError> {
        let json = serde_json::to_vec_pretty(value)?;
        self.write_new(&self.root, &Self::stem(prefix, title), "json", &json)
    }

    /// Write text under a generated name.
    pub fn write_text(
        &self,
        prefix: &str,
        title: Option<&str>,
        ext: &str,
        contents: &str,
    ) -> Result<PathBuf, StoreError> {
        self.write_new(&self.root, &Self::stem(prefix, title), ext, contents.as_bytes())
    }

    /// Write raw bytes as `<subdir>/<name>.<ext>` below the store root.
    pub fn write_bytes_in(
        &self,
        subdir: &str,
        name: &str,
        ext: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(subdir);
        self.write_new(&dir, name, ext, bytes)
    }

    fn write_new(
        &self,
        dir: &Path,
        stem: &str,
        ext: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut attempt = 1usize;
        loop {
            let file_name = if attempt == 1 {
                format!("{}.{}", stem, ext)
            } else {
                format!("{}_{}.{}", stem, attempt, ext)
            };
            let path = dir.join(file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_or_remove(file, &path, bytes)?;
                    tracing::debug!("Wrote artifact {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(StoreError::Io { path, source }),
            }
        }
    }
}

/// Write `bytes` to the freshly created `path`; a partial file is removed on failure.
fn write_or_remove(mut writer: impl Write, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let result = writer.write_all(bytes).and_then(|()| writer.flush());
    result.map_err(|source| {
        drop(writer);
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to remove partial file {}: {}", path.display(), e);
        }
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_cjk_and_replaces_spaces() {
        assert_eq!(sanitize_title("AI编程工具 上线!?", 30), "AI编程工具_上线");
        assert_eq!(sanitize_title("  a/b\\c: d  ", 30), "abc_d");
    }

    #[test]
    fn test_sanitize_truncates_by_chars() {
        let long = "字".repeat(40);
        assert_eq!(sanitize_title(&long, 30).chars().count(), 30);
    }

    #[test]
    fn test_stem_without_title() {
        let stem = ArtifactStore::stem("batch", Some("???"));
        assert!(stem.starts_with("batch_"));
        assert_eq!(stem.matches('_').count(), 2, "prefix + date_time only: {stem}");
    }

    #[test]
    fn test_same_name_gets_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let a = store.write_bytes_in("img", "cover", "png", b"1").unwrap();
        let b = store.write_bytes_in("img", "cover", "png", b"2").unwrap();
        assert_ne!(a, b);
        assert!(b.ends_with("cover_2.png"));
        assert_eq!(fs::read(&a).unwrap(), b"1");
        assert_eq!(fs::read(&b).unwrap(), b"2");
    }

    struct DiskFull;

    impl Write for DiskFull {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_leaves_no_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("thread.json");
        fs::write(&path, b"").unwrap();

        let err = write_or_remove(DiskFull, &path, b"[]").unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(err.to_string().contains("no space left"));
        assert!(!path.exists());
    }

    #[test]
    fn test_successful_write_keeps_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("thread.json");
        let file = fs::File::create(&path).unwrap();
        write_or_remove(file, &path, b"[1]").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"[1]");
    }
}
