//! Filesystem relocation shared by the batch and sort stages.
//!
//! These helpers block; async callers run them on `spawn_blocking`.

use core_runtime::config::TransferMode;
use filetime::FileTime;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Move or copy `source` to `dest`, creating parent directories.
///
/// Moves try a rename first and fall back to copy-then-remove when the
/// rename fails for any reason other than a missing source (for example
/// across filesystems). Copies keep the source modification time.
pub fn relocate(source: &Path, dest: &Path, mode: TransferMode) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    match mode {
        TransferMode::Move => match fs::rename(source, dest) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(err),
            Err(err) => {
                debug!(
                    source = %source.display(),
                    error = %err,
                    "Rename failed, falling back to copy"
                );
                copy_preserving_mtime(source, dest)?;
                fs::remove_file(source)
            }
        },
        TransferMode::Copy => copy_preserving_mtime(source, dest),
    }
}

fn copy_preserving_mtime(source: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::metadata(source)?;
    fs::copy(source, dest)?;
    filetime::set_file_mtime(dest, FileTime::from_last_modification_time(&metadata))
}

/// Put a relocated file back where [`relocate`] found it.
///
/// A move is reversed; a copy is deleted.
pub fn undo_relocation(source: &Path, dest: &Path, mode: TransferMode) -> io::Result<()> {
    match mode {
        TransferMode::Move => relocate(dest, source, TransferMode::Move),
        TransferMode::Copy => fs::remove_file(dest),
    }
}

/// Candidate paths for `file_name` inside `dir`, in preference order:
/// the plain name, then `stem_1.ext`, `stem_2.ext`, ...
pub fn destination_candidates<'a>(
    dir: &'a Path,
    file_name: &'a OsStr,
) -> impl Iterator<Item = PathBuf> + 'a {
    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    std::iter::once(dir.join(file_name))
        .chain((1u64..).map(move |n| dir.join(format!("{}_{}{}", stem, n, extension))))
}

/// First path for `file_name` inside `dir` that does not exist on disk.
pub fn available_destination(dir: &Path, file_name: &OsStr) -> PathBuf {
    destination_candidates(dir, file_name)
        .find(|path| !path.exists())
        .unwrap_or_else(|| dir.join(file_name))
}
