//! Content-addressed local staging directory (spec.md §4.1).
//!
//! `get` fails with [`CacheMiss`] when the logical name isn't cached,
//! otherwise copies the cached file out and touches its mtime so an
//! external age-based cleanup daemon sees it as recently used. `put` writes
//! to a uniquely-suffixed temp file inside `cache_dir` then renames it
//! atomically over the final name; concurrent `put`s of the same name are
//! safe because each uses its own random suffix and only the winner of the
//! final rename determines the cached content (spec.md property 5).

use anyhow::{Context, Result};
use recodex_worker_util::fs::{random_suffix, Fs};
use std::path::{Path, PathBuf};
use thiserror_like_error::CacheMiss;

mod thiserror_like_error {
    use std::fmt;

    /// A small local error type rather than pulling in `thiserror` for a
    /// single variant; callers match on it with `downcast_ref`.
    #[derive(Debug)]
    pub struct CacheMiss(pub String);

    impl fmt::Display for CacheMiss {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "cache miss for {:?}", self.0)
        }
    }

    impl std::error::Error for CacheMiss {}
}

pub struct FileCache {
    cache_dir: PathBuf,
    fs: Fs,
}

impl FileCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("creating cache directory {}", cache_dir.display()))?;
        Ok(Self {
            cache_dir,
            fs: Fs::new(),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    /// Copies the cached file named `name` to `dst` and touches its mtime.
    /// Returns [`CacheMiss`] (downcastable from the returned error) if the
    /// name isn't present.
    pub fn get(&self, name: &str, dst: &Path) -> Result<()> {
        let src = self.path_for(name);
        if !src.exists() {
            return Err(CacheMiss(name.to_string()).into());
        }
        std::fs::copy(&src, dst)
            .with_context(|| format!("copying cached {} to {}", src.display(), dst.display()))?;
        self.fs.touch(&src)?;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    /// Atomically populates (or overwrites) the cache entry `name` from
    /// `src`, granting group/other write permission on the final file so a
    /// separate cleanup process can delete it.
    pub fn put(&self, src: &Path, name: &str) -> Result<()> {
        let dst = self.path_for(name);
        let tmp = self
            .cache_dir
            .join(format!("{name}-{}.tmp", random_suffix(10)));
        std::fs::copy(src, &tmp)
            .with_context(|| format!("staging cache entry {} from {}", tmp.display(), src.display()))?;
        let mut perms = std::fs::metadata(&tmp)?.permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(perms.mode() | 0o022);
        std::fs::set_permissions(&tmp, perms)?;
        std::fs::rename(&tmp, &dst)
            .with_context(|| format!("renaming {} into cache as {}", tmp.display(), dst.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn get_misses_for_unknown_name() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let dst = dir.path().join("out");
        let err = cache.get("nope", &dst).unwrap_err();
        assert!(err.downcast_ref::<CacheMiss>().is_some());
    }

    #[test]
    fn put_then_get_round_trips_contents() {
        let dir = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();

        let src = src_dir.path().join("payload");
        std::fs::write(&src, b"payload bytes").unwrap();
        cache.put(&src, "logical-name").unwrap();

        assert!(cache.contains("logical-name"));
        let dst = src_dir.path().join("fetched");
        cache.get("logical-name", &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload bytes");
    }
}
