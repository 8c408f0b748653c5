//! File system access
//!
//! The resolver and orchestrator only touch the disk through [`FileSystem`],
//! which keeps them usable against in-memory or sandboxed trees.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::common::{Error, Result};

/// File system primitives used by the pipeline
pub trait FileSystem: Send + Sync {
    /// Read a whole file as UTF-8 text
    fn read_text(&self, path: &Path) -> Result<String>;

    /// Write text to a file, replacing existing contents
    fn write_text(&self, path: &Path, contents: &str) -> Result<()>;

    /// List every file below `dir`, recursively, in a stable order
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Delete a file
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Last write time, if the file exists
    fn modified(&self, path: &Path) -> Option<SystemTime>;

    fn is_file(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;
}

/// [`FileSystem`] backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn read_text(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))
    }

    fn write_text(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::file_read(dir, e))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn modified(&self, path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_files_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StdFileSystem;
        fs.write_text(&dir.path().join("b.js"), "").unwrap();
        fs.write_text(&dir.path().join("a/c.js"), "").unwrap();

        let files = fs.list_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("a/c.js"), PathBuf::from("b.js")]);
    }

    #[test]
    fn test_read_missing_file_is_file_read_error() {
        let err = StdFileSystem.read_text(Path::new("/no/such/file.js")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
