//! Write-to-temp-then-rename file replacement.

use std::io::{self, Write};
use std::path::Path;

/// Prefix of the temp files created next to a document while it is written.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Suffix shared by temp files and documents.
pub const TEMP_SUFFIX: &str = ".json";

/// Replaces `path` with `bytes` so that readers see either the old or the
/// new content, never a mix.
///
/// The temp file lives in the destination directory so the final rename
/// stays on one file system. If anything fails before the rename, the temp
/// file is removed when it drops and `path` is untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], fsync: bool) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "document path has no parent")
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    if fsync {
        tmp.as_file().sync_all()?;
    }

    tmp.persist(path).map_err(|e| e.error)?;

    if fsync {
        sync_dir(dir)?;
    }
    Ok(())
}

/// Makes a rename or unlink inside `dir` durable.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Returns true for names produced by [`write_atomic`] before the rename.
pub(crate) fn is_temp_file_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}
