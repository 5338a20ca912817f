use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::constants::corpus::CSV_EXTENSION;
use crate::errors::LedgerError;

/// Replace `path` with `contents` via a temp file in the same directory and an atomic rename.
///
/// Readers observe either the previous file or the complete new one.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), LedgerError> {
    ensure_parent_dir(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut staged = NamedTempFile::new_in(&dir)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|err| LedgerError::Io(err.error))?;
    Ok(())
}

/// Create the parent directory of `path` when it has one.
pub fn ensure_parent_dir(path: &Path) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// True if the path has a `.csv` extension (case-insensitive).
pub fn is_csv_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(CSV_EXTENSION))
        .unwrap_or(false)
}

/// Resolve a corpus location into the CSV files it names.
///
/// A file path is returned as-is; a directory yields every `.csv` below it in
/// lexicographic order so repeated loads concatenate files identically.
pub fn collect_csv_files(root: &Path) -> Result<Vec<PathBuf>, LedgerError> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(LedgerError::Corpus(format!(
            "corpus path '{}' does not exist",
            root.display()
        )));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_csv_file(entry.path()))
        .map(|entry| entry.path().to_path_buf())
        .collect();
    files.sort();
    Ok(files)
}
