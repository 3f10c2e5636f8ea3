//! Disk-backed file source
//!
//! Serves files below a content root and hands out change tokens driven by a
//! recursive `notify` watcher on that root.

use std::collections::HashMap;
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, trace, warn};

use super::errors::SourceError;
use super::{
    normalize_path, ChangeToken, DirectoryContents, FileInfo, FileSource, ReadStream,
    WeakChangeToken,
};

/// Registry size below which dropped tokens are left alone
const MIN_PRUNE_THRESHOLD: usize = 64;

/// Outstanding tokens by normalized path
///
/// Only weak handles are kept: a token nobody holds any more is dead weight
/// and is swept out once the map has doubled since the last sweep.
#[derive(Default)]
struct Tokens {
    by_path: HashMap<String, WeakChangeToken>,
    prune_at: usize,
}

impl Tokens {
    /// Live unfired token for `key`, or a fresh one
    fn token_for(&mut self, key: String) -> ChangeToken {
        if let Some(token) = self
            .by_path
            .get(&key)
            .and_then(WeakChangeToken::upgrade)
            .filter(|token| !token.has_changed())
        {
            return token;
        }

        let token = ChangeToken::new();
        self.by_path.insert(key, token.downgrade());

        if self.by_path.len() > self.prune_at.max(MIN_PRUNE_THRESHOLD) {
            self.by_path.retain(|_, token| token.is_alive());
            self.prune_at = self.by_path.len() * 2;
            trace!(live = self.by_path.len(), "Pruned dropped change tokens");
        }
        token
    }

    /// Remove the tokens affected by a change to `path`
    ///
    /// That is the path itself, everything below it (a moved or deleted
    /// directory takes its contents along) and its parent directory.
    fn take_affected(&mut self, path: &str, fired: &mut Vec<(String, ChangeToken)>) {
        let parent = match path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &path[..idx],
        };
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };

        let affected: Vec<String> = self
            .by_path
            .keys()
            .filter(|key| *key == path || *key == parent || key.starts_with(&prefix))
            .cloned()
            .collect();

        for key in affected {
            if let Some(token) = self.by_path.remove(&key).and_then(|t| t.upgrade()) {
                fired.push((key, token));
            }
        }
    }
}

type TokenRegistry = Arc<Mutex<Tokens>>;

/// File or directory on disk
#[derive(Debug)]
pub struct PhysicalFileInfo {
    name: String,
    path: PathBuf,
    /// `None` when the path does not exist (or is not servable)
    metadata: Option<Metadata>,
}

impl PhysicalFileInfo {
    fn new(name: String, path: PathBuf, metadata: Metadata) -> Self {
        Self {
            name,
            path,
            metadata: Some(metadata),
        }
    }

    fn not_found(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            metadata: None,
        }
    }
}

impl FileInfo for PhysicalFileInfo {
    fn exists(&self) -> bool {
        self.metadata.is_some()
    }

    fn is_directory(&self) -> bool {
        self.metadata.as_ref().is_some_and(Metadata::is_dir)
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.metadata.as_ref().and_then(|m| m.modified().ok())
    }

    fn length(&self) -> u64 {
        match &self.metadata {
            Some(m) if m.is_file() => m.len(),
            _ => 0,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn physical_path(&self) -> Option<&Path> {
        self.metadata.as_ref().map(|_| self.path.as_path())
    }

    fn create_read_stream(&self) -> io::Result<ReadStream> {
        match &self.metadata {
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", self.path.display()),
            )),
            Some(m) if m.is_dir() => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", self.path.display()),
            )),
            Some(_) => Ok(Box::new(File::open(&self.path)?)),
        }
    }
}

/// File source rooted at a directory on disk
pub struct PhysicalFileSource {
    root: PathBuf,
    tokens: TokenRegistry,
    /// Held to keep the watcher thread alive
    watcher: Option<Mutex<RecommendedWatcher>>,
}

impl PhysicalFileSource {
    /// Create a source for `root` with change notifications enabled
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = Self::resolve_root(root.as_ref())?;
        let tokens = TokenRegistry::default();

        let handler_root = root.clone();
        let handler_tokens = Arc::clone(&tokens);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => dispatch_event(&handler_root, &handler_tokens, &event),
            Err(e) => warn!(error = %e, "File watcher error"),
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| SourceError::WatchPath {
                path: root.clone(),
                source,
            })?;

        debug!(root = %root.display(), "Watching content root");

        Ok(Self {
            root,
            tokens,
            watcher: Some(Mutex::new(watcher)),
        })
    }

    /// Create a source whose change tokens never fire
    pub fn without_watching(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = Self::resolve_root(root.as_ref())?;
        Ok(Self {
            root,
            tokens: TokenRegistry::default(),
            watcher: None,
        })
    }

    /// The canonical content root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_root(root: &Path) -> Result<PathBuf, SourceError> {
        let canonical = fs::canonicalize(root).map_err(|source| SourceError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        if !canonical.is_dir() {
            return Err(SourceError::NotADirectory { path: canonical });
        }
        Ok(canonical)
    }

    /// Map a request path to a location below the root
    ///
    /// Returns `None` for paths that try to climb out of the root.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let normalized = normalize_path(path);
        let mut full = self.root.clone();
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return None;
            }
            full.push(segment);
        }
        Some(full)
    }
}

impl FileSource for PhysicalFileSource {
    fn get_directory_contents(&self, path: &str) -> DirectoryContents {
        let Some(dir) = self.resolve(path) else {
            return DirectoryContents::not_found();
        };

        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                trace!(path = %path, error = %e, "Directory not listable");
                return DirectoryContents::not_found();
            }
        };

        let mut entries: Vec<PhysicalFileInfo> = read_dir
            .flatten()
            .filter_map(|entry| {
                let entry_path = entry.path();
                // Follow symlinks so linked assets report their target's metadata
                let metadata = fs::metadata(&entry_path).ok()?;
                let name = entry.file_name().to_string_lossy().into_owned();
                Some(PhysicalFileInfo::new(name, entry_path, metadata))
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        DirectoryContents::new(
            entries
                .into_iter()
                .map(|e| Arc::new(e) as Arc<dyn FileInfo>)
                .collect(),
        )
    }

    fn get_file_info(&self, path: &str) -> Arc<dyn FileInfo> {
        let name = normalize_path(path)
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let Some(full) = self.resolve(path) else {
            return Arc::new(PhysicalFileInfo::not_found(name, self.root.clone()));
        };

        match fs::metadata(&full) {
            Ok(metadata) if metadata.is_file() => {
                Arc::new(PhysicalFileInfo::new(name, full, metadata))
            }
            _ => Arc::new(PhysicalFileInfo::not_found(name, full)),
        }
    }

    fn watch(&self, filter: &str) -> ChangeToken {
        if self.watcher.is_none() {
            return ChangeToken::never();
        }

        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token_for(normalize_path(filter))
    }
}

/// Fire the tokens affected by a watcher event
///
/// A change to a path fires the tokens for that path, for anything below it
/// and for its parent directory, whose listing is now different.
fn dispatch_event(root: &Path, tokens: &TokenRegistry, event: &Event) {
    if event.kind.is_access() {
        return;
    }

    let mut fired = Vec::new();
    {
        let mut tokens = tokens.lock().unwrap_or_else(PoisonError::into_inner);
        for path in &event.paths {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let normalized = normalize_path(&relative.to_string_lossy());
            tokens.take_affected(&normalized, &mut fired);
        }
    }

    for (key, token) in fired {
        trace!(path = %key, kind = ?event.kind, "Signalling change token");
        token.signal();
    }
}
