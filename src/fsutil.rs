// src/fsutil.rs

//! Filesystem primitives (spec §4.6): atomic rename, fsync discipline,
//! same-device detection, advisory locks, and safe path joining.
//!
//! Grounded on the teacher's `move_file_atomic` fsync discipline and
//! `daemon/lock.rs`'s `fs2`-based flock usage.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

/// Rename `src` to `dst` with a single `rename(2)` syscall. Unlike the
/// teacher's `move_file_atomic`, this does **not** fall back to copy+delete
/// on `EXDEV` — spec invariant 5 requires the Transaction Manager to fail
/// fast on cross-device commits rather than silently degrade atomicity.
/// The fsync of the destination parent directory is the caller's
/// responsibility (the commit protocol fsyncs around the rename itself).
pub fn atomic_rename(src: &Path, dst: &Path) -> io::Result<()> {
    fs::rename(src, dst)
}

/// Flush a file's data and metadata to stable storage.
pub fn fsync_file(f: &File) -> io::Result<()> {
    f.sync_all()
}

/// Open a directory read-only and sync it. Not all filesystems support
/// fsyncing a directory descriptor; such platforms are expected to no-op
/// successfully rather than error (spec §4.6).
pub fn fsync_dir(path: &Path) -> io::Result<()> {
    match File::open(path) {
        Ok(dir) => match dir.sync_all() {
            Ok(()) => Ok(()),
            // Not all filesystems/platforms support directory fsync.
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(()),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

/// Create/truncate `path`, write `bytes`, fsync the file, and fsync its
/// parent directory. Used for marker files and manifests, which must be
/// durable as a single atomic unit.
pub fn write_file_sync(path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = file.set_permissions(fs::Permissions::from_mode(mode));
    }
    #[cfg(not(unix))]
    let _ = mode;

    {
        use std::io::Write;
        let mut file = &file;
        file.write_all(bytes)?;
    }
    fsync_file(&file)?;
    drop(file);

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Write `bytes` to a temp file in the same directory as `path`, fsync it,
/// then atomically rename into place and fsync the parent. This is the
/// "same-directory temp file + rename" idiom used for files (like
/// `metrics.json`) that must never be observed half-written.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("write"),
        std::process::id()
    ));

    {
        let mut tmp = File::create(&tmp_path)?;
        {
            use std::io::Write;
            tmp.write_all(bytes)?;
        }
        fsync_file(&tmp)?;
    }

    fs::rename(&tmp_path, path)?;
    fsync_dir(parent)?;
    Ok(())
}

/// Return true if `a` and `b` reside on the same filesystem device. On
/// platforms without device identifiers this fails open (returns true) —
/// spec §4.6.
pub fn check_same_device(a: &Path, b: &Path) -> io::Result<bool> {
    let meta_a = fs::metadata(a)?;
    let meta_b = fs::metadata(b)?;
    Ok(meta_a.dev() == meta_b.dev())
}

/// Acquire an exclusive advisory lock on `f`, blocking until available.
pub fn flock_exclusive(f: &File) -> io::Result<()> {
    f.lock_exclusive()
}

/// Acquire a shared advisory lock on `f`, blocking until available.
pub fn flock_shared(f: &File) -> io::Result<()> {
    f.lock_shared()
}

/// Release an advisory lock on `f`.
pub fn flock_unlock(f: &File) -> io::Result<()> {
    fs2::FileExt::unlock(f)
}

/// Sanitize an untrusted relative/absolute path: reject `..` traversal,
/// skip `.` components, strip leading slashes. Grounded on the teacher's
/// `filesystem/path.rs::sanitize_path`.
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();
    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::validation(format!(
                    "path traversal rejected: {path_str}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::validation("empty path after sanitization"));
    }

    Ok(normalized)
}

/// Safely join `root` with an untrusted destination path.
pub fn safe_join(root: &Path, path: &Path) -> Result<PathBuf> {
    let sanitized = sanitize_path(path)?;
    Ok(root.join(sanitized))
}
