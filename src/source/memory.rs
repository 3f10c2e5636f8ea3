//! In-memory file source for tests
//!
//! Counts every call made against it so tests can assert which requests were
//! served from the cache and which were delegated.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::{
    join_path, normalize_path, ChangeToken, DirectoryContents, FileInfo, FileSource, ReadStream,
};

#[derive(Default)]
struct Inner {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    tokens: Mutex<HashMap<String, ChangeToken>>,
    list_calls: AtomicUsize,
    stat_calls: AtomicUsize,
    open_calls: AtomicUsize,
    watch_calls: AtomicUsize,
    fail_reads: AtomicBool,
}

#[derive(Clone, Default)]
pub(crate) struct MemoryFileSource {
    inner: Arc<Inner>,
}

impl MemoryFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        self.set_file(path, content);
        self
    }

    pub fn set_file(&self, path: &str, content: &[u8]) {
        self.inner
            .files
            .lock()
            .unwrap()
            .insert(normalize_path(path), content.to_vec());
    }

    pub fn remove_file(&self, path: &str) {
        self.inner.files.lock().unwrap().remove(&normalize_path(path));
    }

    /// Fire the pending token for `path`, as a filesystem watcher would
    pub fn fire(&self, path: &str) {
        let token = self.inner.tokens.lock().unwrap().remove(&normalize_path(path));
        if let Some(token) = token {
            token.signal();
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn stat_calls(&self) -> usize {
        self.inner.stat_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.inner.open_calls.load(Ordering::SeqCst)
    }

    pub fn watch_calls(&self) -> usize {
        self.inner.watch_calls.load(Ordering::SeqCst)
    }

    fn is_directory(files: &BTreeMap<String, Vec<u8>>, path: &str) -> bool {
        path == "/" || files.keys().any(|k| k.starts_with(&join_path(path, "")))
    }
}

enum Kind {
    File(u64),
    Directory,
    Missing,
}

struct MemoryFileInfo {
    inner: Arc<Inner>,
    path: String,
    name: String,
    kind: Kind,
}

impl FileInfo for MemoryFileInfo {
    fn exists(&self) -> bool {
        !matches!(self.kind, Kind::Missing)
    }

    fn is_directory(&self) -> bool {
        matches!(self.kind, Kind::Directory)
    }

    fn last_modified(&self) -> Option<SystemTime> {
        None
    }

    fn length(&self) -> u64 {
        match self.kind {
            Kind::File(len) => len,
            _ => 0,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn physical_path(&self) -> Option<&Path> {
        None
    }

    fn create_read_stream(&self) -> io::Result<ReadStream> {
        self.inner.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        let files = self.inner.files.lock().unwrap();
        match files.get(&self.path) {
            Some(content) => Ok(Box::new(Cursor::new(content.clone()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, self.path.clone())),
        }
    }
}

impl FileSource for MemoryFileSource {
    fn get_directory_contents(&self, path: &str) -> DirectoryContents {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        let dir = normalize_path(path);
        let files = self.inner.files.lock().unwrap();
        if !Self::is_directory(&files, &dir) {
            return DirectoryContents::not_found();
        }

        let prefix = join_path(&dir, "");
        let mut dirs = BTreeSet::new();
        let mut entries: Vec<Arc<dyn FileInfo>> = Vec::new();
        for (key, content) in files.iter() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    dirs.insert(child.to_string());
                }
                None => entries.push(Arc::new(MemoryFileInfo {
                    inner: Arc::clone(&self.inner),
                    path: key.clone(),
                    name: rest.to_string(),
                    kind: Kind::File(content.len() as u64),
                })),
            }
        }
        for child in dirs {
            entries.push(Arc::new(MemoryFileInfo {
                inner: Arc::clone(&self.inner),
                path: join_path(&dir, &child),
                name: child,
                kind: Kind::Directory,
            }));
        }

        DirectoryContents::new(entries)
    }

    fn get_file_info(&self, path: &str) -> Arc<dyn FileInfo> {
        self.inner.stat_calls.fetch_add(1, Ordering::SeqCst);
        let path = normalize_path(path);
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let kind = match self.inner.files.lock().unwrap().get(&path) {
            Some(content) => Kind::File(content.len() as u64),
            None => Kind::Missing,
        };
        Arc::new(MemoryFileInfo {
            inner: Arc::clone(&self.inner),
            path,
            name,
            kind,
        })
    }

    fn watch(&self, filter: &str) -> ChangeToken {
        self.inner.watch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .tokens
            .lock()
            .unwrap()
            .entry(normalize_path(filter))
            .or_default()
            .clone()
    }
}
