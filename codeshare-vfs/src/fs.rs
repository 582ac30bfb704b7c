//! Hierarchical, path-addressed storage.
//!
//! Paths are absolute and `/`-separated (`/project/src/a.move`). Two backends:
//! [`MemoryFs`], an in-process tree that counts file writes, and [`DiskFs`],
//! rooted in a host directory via `tokio::fs`.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// The node at the path has the wrong kind for the operation.
    pub fn is_kind_conflict(&self) -> bool {
        matches!(self, FsError::IsADirectory(_) | FsError::NotADirectory(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

/// Async storage API the reconciler runs against.
pub trait FileSystem: Send + Sync {
    /// Kind of the node at `path`, or `None` if nothing is there.
    fn kind(&self, path: &str) -> impl Future<Output = Result<Option<NodeKind>, FsError>> + Send;

    fn exists(&self, path: &str) -> impl Future<Output = Result<bool, FsError>> + Send {
        async move { Ok(self.kind(path).await?.is_some()) }
    }

    /// Create `path` and any missing ancestors.
    fn mkdir(&self, path: &str) -> impl Future<Output = Result<(), FsError>> + Send;

    /// Direct children of a directory, sorted by name.
    fn read_dir(&self, path: &str) -> impl Future<Output = Result<Vec<DirEntry>, FsError>> + Send;

    fn read_file(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, FsError>> + Send;

    /// Create or truncate a file. The parent directory must exist.
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<(), FsError>> + Send;

    /// Remove a file, or a directory with everything below it.
    fn remove(&self, path: &str) -> impl Future<Output = Result<(), FsError>> + Send;
}

impl<F: FileSystem> FileSystem for Arc<F> {
    async fn kind(&self, path: &str) -> Result<Option<NodeKind>, FsError> {
        (**self).kind(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<(), FsError> {
        (**self).mkdir(path).await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        (**self).read_dir(path).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        (**self).read_file(path).await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError> {
        (**self).write_file(path, data).await
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        (**self).remove(path).await
    }
}

// ─── Path helpers ────────────────────────────────────────────

/// Canonical form: leading `/`, no empty, `.` or `..` segments.
pub fn normalize(path: &str) -> Result<String, FsError> {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(FsError::InvalidPath(path.to_string()));
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Join a relative `/`-separated path onto `base`.
pub fn join(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{base}/{rel}")
    }
}

/// Parent of a normalised path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

// ─── MemoryFs ────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// In-memory tree keyed by normalised absolute path.
#[derive(Debug)]
pub struct MemoryFs {
    nodes: Mutex<BTreeMap<String, Node>>,
    writes: AtomicUsize,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            nodes: Mutex::new(nodes),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful `write_file` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Every path currently stored, sorted (root excluded).
    pub fn paths(&self) -> Vec<String> {
        self.nodes()
            .keys()
            .filter(|p| p.as_str() != "/")
            .cloned()
            .collect()
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Node>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn child_prefix(path: &str) -> String {
        if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        }
    }
}

impl FileSystem for MemoryFs {
    async fn kind(&self, path: &str) -> Result<Option<NodeKind>, FsError> {
        let path = normalize(path)?;
        Ok(self.nodes().get(&path).map(|node| match node {
            Node::Dir => NodeKind::Dir,
            Node::File(_) => NodeKind::File,
        }))
    }

    async fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let path = normalize(path)?;
        let mut nodes = self.nodes();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            match nodes.get(&current) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => return Err(FsError::NotADirectory(current)),
                None => {
                    nodes.insert(current.clone(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let path = normalize(path)?;
        let nodes = self.nodes();
        match nodes.get(&path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(FsError::NotADirectory(path)),
            None => return Err(FsError::NotFound(path)),
        }

        let prefix = Self::child_prefix(&path);
        let entries = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, node)| {
                let name = &key[prefix.len()..];
                if name.is_empty() || name.contains('/') {
                    return None;
                }
                let kind = match node {
                    Node::Dir => NodeKind::Dir,
                    Node::File(_) => NodeKind::File,
                };
                Some(DirEntry {
                    name: name.to_string(),
                    kind,
                })
            })
            .collect();
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let path = normalize(path)?;
        match self.nodes().get(&path) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Dir) => Err(FsError::IsADirectory(path)),
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let path = normalize(path)?;
        let parent_path = parent(&path).ok_or_else(|| FsError::IsADirectory(path.clone()))?;
        let mut nodes = self.nodes();
        match nodes.get(parent_path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(FsError::NotADirectory(parent_path.to_string())),
            None => return Err(FsError::NotFound(parent_path.to_string())),
        }
        if let Some(Node::Dir) = nodes.get(&path) {
            return Err(FsError::IsADirectory(path));
        }
        nodes.insert(path, Node::File(data.to_vec()));
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        let path = normalize(path)?;
        let mut nodes = self.nodes();
        if !nodes.contains_key(&path) {
            return Err(FsError::NotFound(path));
        }
        let prefix = Self::child_prefix(&path);
        nodes.retain(|key, _| key == "/" || (key != &path && !key.starts_with(&prefix)));
        Ok(())
    }
}

// ─── DiskFs ──────────────────────────────────────────────────

/// Virtual paths mapped below a host directory.
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf), FsError> {
        let path = normalize(path)?;
        let mut host = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            host.push(segment);
        }
        Ok((path, host))
    }
}

fn io_error(path: &str, source: std::io::Error) -> FsError {
    match source.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        _ => FsError::Io {
            path: path.to_string(),
            source,
        },
    }
}

async fn host_kind(host: &Path) -> Option<NodeKind> {
    match tokio::fs::symlink_metadata(host).await {
        Ok(meta) if meta.is_dir() => Some(NodeKind::Dir),
        Ok(_) => Some(NodeKind::File),
        Err(_) => None,
    }
}

impl FileSystem for DiskFs {
    async fn kind(&self, path: &str) -> Result<Option<NodeKind>, FsError> {
        let (_, host) = self.resolve(path)?;
        Ok(host_kind(&host).await)
    }

    async fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let (path, host) = self.resolve(path)?;
        match tokio::fs::create_dir_all(&host).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(FsError::NotADirectory(path)),
            Err(e) => match host_kind(&host).await {
                Some(NodeKind::File) => Err(FsError::NotADirectory(path)),
                _ => Err(io_error(&path, e)),
            },
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let (path, host) = self.resolve(path)?;
        if host_kind(&host).await == Some(NodeKind::File) {
            return Err(FsError::NotADirectory(path));
        }
        let mut dir = tokio::fs::read_dir(&host)
            .await
            .map_err(|e| io_error(&path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(&path, e))? {
            let file_type = entry.file_type().await.map_err(|e| io_error(&path, e))?;
            let kind = if file_type.is_dir() {
                NodeKind::Dir
            } else {
                NodeKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let (path, host) = self.resolve(path)?;
        if host_kind(&host).await == Some(NodeKind::Dir) {
            return Err(FsError::IsADirectory(path));
        }
        tokio::fs::read(&host).await.map_err(|e| io_error(&path, e))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let (path, host) = self.resolve(path)?;
        if host_kind(&host).await == Some(NodeKind::Dir) {
            return Err(FsError::IsADirectory(path));
        }
        tokio::fs::write(&host, data)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        let (path, host) = self.resolve(path)?;
        let result = match host_kind(&host).await {
            Some(NodeKind::Dir) => tokio::fs::remove_dir_all(&host).await,
            Some(NodeKind::File) => tokio::fs::remove_file(&host).await,
            None => return Err(FsError::NotFound(path)),
        };
        result.map_err(|e| io_error(&path, e))
    }
}
