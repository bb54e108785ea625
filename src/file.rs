//! # File
//!
//! Reads a binary from disk, runs a [`Patcher`] over it and writes the result back to the same path

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::patcher::Patcher;

/// Errors when patching a file on disk
#[derive(Debug, Error)]
pub enum FileError<E> {
    /// Error while reading the binary
    #[error("failed to read `{}`", .path.display())]
    Read {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
    /// Error while writing the patched binary
    #[error("failed to write `{}`", .path.display())]
    Write {
        /// Path that was written
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    Patch(E),
}

/// What to do with a successfully patched image
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the file with the patched image
    #[default]
    InPlace,
    /// Leave the file untouched
    DryRun,
}

/// Outcome of a successful [`patch_file`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReport {
    /// Path of the binary
    pub path: PathBuf,
    /// Offset of the patch site in the file
    pub offset: usize,
    /// Instruction bytes at the patch site before patching
    pub before: Vec<u8>,
    /// Instruction bytes at the patch site after patching
    pub after: Vec<u8>,
    /// Whether the file was rewritten
    pub written: bool,
}

/// Patches the file at `path` in place.
///
/// The whole file is read into memory and only written back, in full, once `patcher` succeeds. The patched image goes
/// to a temporary file in the same directory which is then renamed over `path`, so on any error the file is left as
/// it was.
pub fn patch_file<P: Patcher>(
    path: impl AsRef<Path>,
    patcher: &P,
    mode: WriteMode,
) -> Result<FileReport, FileError<P::Error>> {
    let path = path.as_ref();
    let image = fs::read(path).map_err(|source| FileError::Read {
        path: path.to_owned(),
        source,
    })?;
    debug!(path = %path.display(), len = image.len(), "read binary");

    let patched = patcher.patch(&image).map_err(FileError::Patch)?;
    let report = FileReport {
        path: path.to_owned(),
        offset: patched.offset(),
        before: patched.original_site(),
        after: patched.site().to_vec(),
        written: mode == WriteMode::InPlace,
    };

    match mode {
        WriteMode::InPlace => {
            replace_file(path, patched.image()).map_err(|source| FileError::Write {
                path: path.to_owned(),
                source,
            })?;
            info!(path = %path.display(), "wrote patched binary");
        }
        WriteMode::DryRun => info!(path = %path.display(), "dry run, binary left untouched"),
    }

    Ok(report)
}

/// Writes `image` to a temporary file next to `path` and renames it over `path`, keeping the permissions of the file
/// it replaces
fn replace_file(path: &Path, image: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path)?.permissions();

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(image)?;
    temp.as_file().sync_all()?;
    temp.as_file().set_permissions(permissions)?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
