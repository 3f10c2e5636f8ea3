//! Cache priming
//!
//! Walks a directory tree through the caching source before serving starts,
//! so every listing is cached and every small file's content is in memory.

use std::io;
use std::ops::AddAssign;
use std::time::Instant;

use tracing::{info, trace, Level};

use super::provider::CachingFileSource;
use crate::source::{join_path, normalize_path, FileInfo, FileSource};

/// Files visited and bytes read during a priming walk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheSize {
    pub entries: u64,
    pub bytes: u64,
}

impl AddAssign for CacheSize {
    fn add_assign(&mut self, other: Self) {
        self.entries += other.entries;
        self.bytes += other.bytes;
    }
}

impl<S: FileSource> CachingFileSource<S> {
    /// Prime the cache for the whole source, starting at the root
    pub fn prime_cache(&self) -> io::Result<CacheSize> {
        let started = tracing::enabled!(Level::INFO).then(Instant::now);

        info!("Priming the cache");
        let size = self.prime_subtree("/")?;

        if let Some(started) = started {
            info!(
                entries = size.entries,
                bytes = size.bytes,
                elapsed = ?started.elapsed(),
                "Cache primed with {} entries totalling {} bytes",
                size.entries,
                size.bytes
            );
        }

        Ok(size)
    }

    /// Prime every listing and file below `root`
    ///
    /// Files are read in full so cacheable content is memoized. Paths that
    /// disappear mid-walk are skipped; read faults abort the walk.
    pub fn prime_subtree(&self, root: &str) -> io::Result<CacheSize> {
        let mut size = CacheSize::default();
        let mut pending = vec![normalize_path(root)];

        while let Some(dir) = pending.pop() {
            trace!(path = %dir, "Priming cache");
            let listing = self.get_directory_contents(&dir);

            // Reverse so subdirectories are visited in listing order
            for entry in listing.entries().iter().rev() {
                let path = join_path(&dir, entry.name());
                if entry.is_directory() {
                    pending.push(path);
                } else {
                    size += self.prime_file(&path)?;
                }
            }
        }

        Ok(size)
    }

    fn prime_file(&self, path: &str) -> io::Result<CacheSize> {
        let file_info = self.get_file_info(path);
        if !file_info.exists() {
            trace!(path = %path, "File vanished while priming");
            return Ok(CacheSize::default());
        }

        let mut stream = file_info.create_read_stream()?;
        let bytes = io::copy(&mut stream, &mut io::sink())?;
        Ok(CacheSize { entries: 1, bytes })
    }
}
