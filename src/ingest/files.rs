//! Filesystem plumbing for batch-file replay: finding `.json` files and
//! routing them to the archive or error sink once classified.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where a processed file ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    Archived,
    Errored,
}

/// Collect every `.json` file under `dir`, depth-first, skipping anything
/// inside `excluded` subtrees (the archive and error sinks usually live
/// under the watched directory).
pub fn list_json_files(dir: &Path, excluded: &[&Path]) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        if excluded.iter().any(|ex| current.starts_with(ex)) {
            continue;
        }
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Move `path` into `dest_dir`, preserving the file name. Falls back to
/// copy-and-remove when a rename crosses filesystems.
pub fn move_into(path: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")
    })?;
    let dest = dest_dir.join(file_name);
    match fs::rename(path, &dest) {
        Ok(()) => Ok(dest),
        Err(_) => {
            fs::copy(path, &dest)?;
            fs::remove_file(path)?;
            Ok(dest)
        }
    }
}
