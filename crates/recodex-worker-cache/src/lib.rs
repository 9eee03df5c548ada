//! C2 (file cache) and C3 (fetcher).

pub mod cache;
pub mod fetcher;

pub use cache::FileCache;
pub use fetcher::Fetcher;
