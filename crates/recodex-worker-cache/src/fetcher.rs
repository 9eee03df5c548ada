//! C3: get tries cache then falls back to a remote fileman endpoint,
//! populating the cache best-effort on a remote hit; put always goes
//! straight to the remote (spec.md §4.2).

use crate::FileCache;
use anyhow::{bail, Context, Result};
use recodex_worker_base::FilemanCfg;
use slog::{warn, Logger};
use std::path::Path;

pub struct Fetcher {
    cache: FileCache,
    filemans: Vec<FilemanCfg>,
    client: reqwest::blocking::Client,
    logger: Logger,
}

impl Fetcher {
    pub fn new(cache: FileCache, filemans: Vec<FilemanCfg>, logger: Logger) -> Self {
        Self {
            cache,
            filemans,
            client: reqwest::blocking::Client::new(),
            logger,
        }
    }

    fn fileman_for(&self, url: &str) -> Option<&FilemanCfg> {
        self.filemans
            .iter()
            .find(|f| url.starts_with(&f.hostname))
    }

    /// Fetches `name` (a logical cache name, and also a URL when the cache
    /// misses) into `dst`: try the cache first; on a miss, GET from the
    /// remote fileman, write the response to `dst`, then best-effort
    /// populate the cache so the next `get` for the same name hits it.
    /// A failure to populate the cache after a successful remote fetch is
    /// `Advisory` (spec.md §7): log and continue rather than fail the job.
    pub fn get(&self, name: &str, url: &str, dst: &Path) -> Result<()> {
        if self.cache.get(name, dst).is_ok() {
            return Ok(());
        }

        let mut request = self.client.get(url);
        if let Some(fileman) = self.fileman_for(url) {
            request = request.basic_auth(&fileman.username, Some(&fileman.password));
        }
        let response = request
            .send()
            .with_context(|| format!("fetching {url}"))?
            .error_for_status()
            .with_context(|| format!("fetching {url}"))?;
        let bytes = response.bytes().context("reading response body")?;
        std::fs::write(dst, &bytes).with_context(|| format!("writing {}", dst.display()))?;

        if let Err(e) = self.cache.put(dst, name) {
            warn!(self.logger, "failed to populate cache after remote fetch"; "name" => name, "error" => %e);
        }
        Ok(())
    }

    /// Uploads `src` to `url`, always remote (no cache write-through).
    /// Errors from the remote propagate as `Transient`.
    pub fn put(&self, src: &Path, url: &str) -> Result<()> {
        let bytes = std::fs::read(src).with_context(|| format!("reading {}", src.display()))?;
        let mut request = self.client.put(url).body(bytes);
        if let Some(fileman) = self.fileman_for(url) {
            request = request.basic_auth(&fileman.username, Some(&fileman.password));
        }
        let response = request.send().with_context(|| format!("uploading to {url}"))?;
        if !response.status().is_success() {
            bail!("upload to {url} failed with status {}", response.status());
        }
        Ok(())
    }
}
