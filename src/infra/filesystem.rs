//! Filesystem operations
//!
//! Handles file and directory operations.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::FilesystemError;

/// `EXDEV`: rename across filesystems
const CROSS_DEVICE_LINK: i32 = 18;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a directory and all its contents
pub fn remove_dir_all(path: &Path) -> Result<(), FilesystemError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| FilesystemError::RemoveDir {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    Ok(())
}

/// Remove an empty directory
pub fn remove_dir(path: &Path) -> Result<(), FilesystemError> {
    fs::remove_dir(path).map_err(|e| FilesystemError::RemoveDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a file or symlink
pub fn remove_file(path: &Path) -> Result<(), FilesystemError> {
    fs::remove_file(path).map_err(|e| FilesystemError::RemoveFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Write content to a file
pub fn write_file(path: &Path, content: &str) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Entries of one directory; an unreadable entry is an error
pub fn read_dir_entries(dir: &Path) -> Result<Vec<fs::DirEntry>, FilesystemError> {
    let entries = fs::read_dir(dir).map_err(|e| FilesystemError::ReadFile {
        path: dir.to_path_buf(),
        error: e.to_string(),
    })?;
    collect_entries(dir, entries)
}

fn collect_entries<T>(
    dir: &Path,
    entries: impl Iterator<Item = io::Result<T>>,
) -> Result<Vec<T>, FilesystemError> {
    entries
        .map(|entry| {
            entry.map_err(|e| FilesystemError::Walk {
                path: dir.to_path_buf(),
                error: e.to_string(),
            })
        })
        .collect()
}

/// Copy a single file, preserving its permissions
pub fn copy_file(from: &Path, to: &Path) -> Result<u64, FilesystemError> {
    fs::copy(from, to).map_err(|e| FilesystemError::WriteFile {
        path: to.to_path_buf(),
        error: format!("copy from '{}': {e}", from.display()),
    })
}

/// Size of a file in bytes
pub fn file_size(path: &Path) -> Result<u64, FilesystemError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| FilesystemError::ReadFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
}

/// Create a symlink at `path` pointing to `target`
pub fn symlink(target: &Path, path: &Path) -> Result<(), FilesystemError> {
    std::os::unix::fs::symlink(target, path).map_err(|e| FilesystemError::Symlink {
        path: path.to_path_buf(),
        target: target.to_path_buf(),
        error: e.to_string(),
    })
}

/// Create (or truncate) `path` as a sparse file of `size` bytes
pub fn create_sparse_file(path: &Path, size: u64) -> Result<(), FilesystemError> {
    let file = File::create(path).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    file.set_len(size).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Move a file or directory, copying across filesystems when a rename is not possible
///
/// Like `mv`, moving onto an existing directory places the source inside it.
pub fn move_path(from: &Path, to: &Path) -> Result<PathBuf, FilesystemError> {
    let dest = match (to.is_dir(), from.file_name()) {
        (true, Some(name)) => to.join(name),
        _ => to.to_path_buf(),
    };

    let rename_err = |e: std::io::Error| FilesystemError::Rename {
        from: from.to_path_buf(),
        to: dest.clone(),
        error: e.to_string(),
    };

    match fs::rename(from, &dest) {
        Ok(()) => Ok(dest),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_LINK) => {
            copy_tree(from, &dest).map_err(rename_err)?;
            if from.is_dir() {
                remove_dir_all(from)?;
            } else {
                remove_file(from)?;
            }
            Ok(dest)
        }
        Err(e) => Err(rename_err(e)),
    }
}

/// Recursive copy preserving symlinks and permissions
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(from).map_err(std::io::Error::other)?;
        let dest = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
            fs::set_permissions(&dest, entry.metadata()?.permissions())?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Append the contents of `source` to `output` in fixed-size chunks
pub fn append_file(
    source: &Path,
    output: &mut impl Write,
    chunk_size: usize,
) -> Result<u64, FilesystemError> {
    let read_err = |e: std::io::Error| FilesystemError::ReadFile {
        path: source.to_path_buf(),
        error: e.to_string(),
    };

    let mut input = File::open(source).map_err(read_err)?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buf[..n])
            .map_err(|e| FilesystemError::WriteFile {
                path: source.to_path_buf(),
                error: e.to_string(),
            })?;
        total += n as u64;
    }
    Ok(total)
}

/// An output file that only appears at its final path once committed
///
/// Bytes go to a hidden sibling `.<name>.partial`; [`PendingFile::commit`]
/// renames it into place. Dropping an uncommitted file removes the partial.
#[derive(Debug)]
pub struct PendingFile {
    target: PathBuf,
    partial: PathBuf,
    file: Option<File>,
}

impl PendingFile {
    /// Start writing the file that will end up at `target`
    pub fn create(target: &Path) -> Result<Self, FilesystemError> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        let partial = target.with_file_name(format!(".{name}.partial"));
        if let Some(parent) = target.parent() {
            create_dir_all(parent)?;
        }

        let file = File::create(&partial).map_err(|e| FilesystemError::WriteFile {
            path: partial.clone(),
            error: e.to_string(),
        })?;

        Ok(Self {
            target: target.to_path_buf(),
            partial,
            file: Some(file),
        })
    }

    /// Path of the in-progress file
    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    /// Take the underlying file handle, e.g. to hand it to a child process
    pub fn take_file(&mut self) -> Option<File> {
        self.file.take()
    }

    /// Writable handle to the in-progress file
    pub fn file_mut(&mut self) -> Option<&mut File> {
        self.file.as_mut()
    }

    /// Flush and move the file into place
    pub fn commit(mut self) -> Result<PathBuf, FilesystemError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .and_then(|()| file.sync_all())
                .map_err(|e| FilesystemError::WriteFile {
                    path: self.partial.clone(),
                    error: e.to_string(),
                })?;
        }
        fs::rename(&self.partial, &self.target).map_err(|e| FilesystemError::Rename {
            from: self.partial.clone(),
            to: self.target.clone(),
            error: e.to_string(),
        })?;
        Ok(self.target.clone())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        self.file.take();
        if self.partial.exists() {
            if let Err(e) = fs::remove_file(&self.partial) {
                tracing::warn!("Failed to remove {}: {e}", self.partial.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unreadable_dir_entry_is_an_error() {
        let entries = vec![Ok("a"), Err(io::Error::other("stale handle")), Ok("b")];

        let err = collect_entries(Path::new("/modules/5.14.0"), entries.into_iter()).unwrap_err();

        assert!(matches!(err, FilesystemError::Walk { ref path, .. } if path == Path::new("/modules/5.14.0")));
        assert!(err.to_string().contains("stale handle"));
    }

    #[test]
    fn test_read_dir_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("modules.dep"), b"").unwrap();

        let names: Vec<_> = read_dir_entries(dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names, ["modules.dep"]);
        assert!(matches!(
            read_dir_entries(&dir.path().join("missing")),
            Err(FilesystemError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_append_file_in_small_chunks() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, b"0123456789").unwrap();

        let mut out = Vec::new();
        let n = append_file(&src, &mut out, 3).unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, b"0123456789");
    }

    #[test]
    fn test_pending_file_commit() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.img");

        let mut pending = PendingFile::create(&target).unwrap();
        pending.file_mut().unwrap().write_all(b"data").unwrap();
        assert!(!target.exists());
        assert!(pending.partial_path().exists());

        let path = pending.commit().unwrap();
        assert_eq!(path, target);
        assert_eq!(fs::read(&target).unwrap(), b"data");
        assert!(!dir.path().join(".out.img.partial").exists());
    }

    #[test]
    fn test_pending_file_dropped_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.img");
        {
            let mut pending = PendingFile::create(&target).unwrap();
            pending.file_mut().unwrap().write_all(b"half").unwrap();
        }
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_move_path_into_directory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("5.14.0");
        fs::create_dir_all(src.join("kernel")).unwrap();
        let dest_dir = dir.path().join("modules");
        fs::create_dir_all(&dest_dir).unwrap();

        let moved = move_path(&src, &dest_dir).unwrap();
        assert_eq!(moved, dest_dir.join("5.14.0"));
        assert!(moved.join("kernel").is_dir());
        assert!(!src.exists());
    }

    #[test]
    fn test_sparse_file_has_requested_length() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("fs.img");
        create_sparse_file(&img, 1 << 20).unwrap();
        assert_eq!(file_size(&img).unwrap(), 1 << 20);
    }
}
