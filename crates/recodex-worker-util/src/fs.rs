//! Filesystem primitives used by the cache, the archive tasks, and the
//! sandboxed task wrapper. A thin wrapper (`Fs`) rather than free functions,
//! matching the `Fs` handle `maelstrom-run` threads through its job tracker.

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::fs;
use std::fs::Permissions;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct Fs;

impl Fs {
    pub fn new() -> Self {
        Fs
    }

    /// Writes `contents` to `path` by first writing a uniquely-named
    /// sibling temp file, then renaming it over `path`. The rename is
    /// atomic on POSIX filesystems, so concurrent readers never observe a
    /// partial file.
    pub fn atomic_write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!(
            "{}.{}.tmp",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            random_suffix(10)
        ));
        fs::write(&tmp, contents)
            .with_context(|| format!("writing temp file {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }

    /// Like [`Self::atomic_write`] but copies an existing file's contents
    /// instead of an in-memory buffer, and grants group/other write
    /// permission on the final file so an external cleanup daemon can
    /// delete it later.
    pub fn atomic_copy_world_writable(&self, src: &Path, dst: &Path) -> Result<()> {
        let dir = dst.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!(
            "{}.{}.tmp",
            dst.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            random_suffix(10)
        ));
        fs::copy(src, &tmp)
            .with_context(|| format!("copying {} to {}", src.display(), tmp.display()))?;
        let mut perms = fs::metadata(&tmp)?.permissions();
        perms.set_mode(perms.mode() | 0o022);
        fs::set_permissions(&tmp, perms)?;
        fs::rename(&tmp, dst)
            .with_context(|| format!("renaming {} to {}", tmp.display(), dst.display()))?;
        Ok(())
    }

    /// Touches a file's mtime to "now", the way a cache `get` marks an
    /// entry as recently used for an external LRU-style cleanup daemon.
    pub fn touch(&self, path: &Path) -> Result<()> {
        filetime::set_file_mtime(path, filetime::FileTime::now())
            .with_context(|| format!("touching mtime of {}", path.display()))
    }

    pub fn make_executable(&self, path: &Path) -> Result<bool> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("statting {}", path.display()))?;
        let mode = metadata.permissions().mode();
        if mode & 0o111 != 0 {
            return Ok(false);
        }
        let new_mode = mode | 0o111;
        fs::set_permissions(path, Permissions::from_mode(new_mode))
            .with_context(|| format!("chmod {}", path.display()))?;
        Ok(true)
    }

    /// Recursively copies `src` into `dst`, preserving hardlinks *within the
    /// copied subtree*: the first time a given (device, inode) pair is
    /// seen, the file is copied; every subsequent occurrence is hardlinked
    /// to the first copy instead of duplicated.
    pub fn copy_tree_preserving_hardlinks(&self, src: &Path, dst: &Path) -> Result<()> {
        let mut seen: HashMap<(u64, u64), PathBuf> = HashMap::new();
        self.copy_tree_inner(src, dst, &mut seen)
    }

    fn copy_tree_inner(
        &self,
        src: &Path,
        dst: &Path,
        seen: &mut HashMap<(u64, u64), PathBuf>,
    ) -> Result<()> {
        let metadata = fs::symlink_metadata(src)
            .with_context(|| format!("statting {}", src.display()))?;
        if metadata.is_dir() {
            fs::create_dir_all(dst)
                .with_context(|| format!("creating directory {}", dst.display()))?;
            for entry in fs::read_dir(src)
                .with_context(|| format!("reading directory {}", src.display()))?
            {
                let entry = entry?;
                self.copy_tree_inner(&entry.path(), &dst.join(entry.file_name()), seen)?;
            }
            return Ok(());
        }

        let key = (metadata.dev(), metadata.ino());
        if let Some(existing) = seen.get(&key) {
            fs::hard_link(existing, dst).with_context(|| {
                format!(
                    "hardlinking {} to already-copied {}",
                    dst.display(),
                    existing.display()
                )
            })?;
            return Ok(());
        }

        fs::copy(src, dst)
            .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
        seen.insert(key, dst.to_path_buf());
        Ok(())
    }
}

/// An alphanumeric suffix for cache temp files and sandboxed-task IO file
/// names, standing in for `helpers::random_alphanum_string` on the original.
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_produces_full_content_and_no_tmp_leftover() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");
        Fs::new().atomic_write(&path, b"hello world").unwrap();
        assert_eq!(stdfs::read(&path).unwrap(), b"hello world");
        let leftover = stdfs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn copy_tree_preserves_hardlinks() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        stdfs::write(src.path().join("a"), b"data").unwrap();
        stdfs::hard_link(src.path().join("a"), src.path().join("b")).unwrap();

        Fs::new()
            .copy_tree_preserving_hardlinks(src.path(), &dst.path().join("out"))
            .unwrap();

        let meta_a = stdfs::metadata(dst.path().join("out/a")).unwrap();
        let meta_b = stdfs::metadata(dst.path().join("out/b")).unwrap();
        assert_eq!(meta_a.ino(), meta_b.ino());
    }

    #[test]
    fn make_executable_adds_bits_only_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bin");
        stdfs::write(&path, b"#!/bin/sh\n").unwrap();
        stdfs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();

        let changed = Fs::new().make_executable(&path).unwrap();
        assert!(changed);
        let mode = stdfs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);

        let changed_again = Fs::new().make_executable(&path).unwrap();
        assert!(!changed_again);
    }
}
