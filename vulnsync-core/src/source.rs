//! Source tree access
//!
//! The update engine only needs three capabilities from a version-controlled
//! corpus: resolve a commit to its root tree, read a tree by hash, and read a
//! blob by hash. `TreeReader` captures exactly that. `MemorySource` is an
//! in-memory content-addressed object store implementing it, used for fixtures
//! and tests; `GitSource` (see `git_source`) reads a real git repository.

use crate::object::{Blob, Commit, ObjectId, ObjectKind, Tree, TreeEntry};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Result type for source operations
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors raised while reading the source tree
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{kind:?} {id} not found")]
    NotFound { kind: ObjectKind, id: ObjectId },

    #[error("commit {0} not found")]
    CommitNotFound(ObjectId),

    #[error("invalid commit {id}: {reason}")]
    InvalidCommit { id: ObjectId, reason: String },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("source backend error: {0}")]
    Backend(String),
}

/// What the engine needs to know about the commit being synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: ObjectId,
    pub tree_id: ObjectId,
    pub time: DateTime<Utc>,
}

/// Read access to a content-addressed snapshot of the corpus
pub trait TreeReader {
    /// Resolve a commit to its root tree and timestamp
    fn commit(&self, id: &ObjectId) -> Result<CommitInfo>;

    /// Read a directory object
    fn tree(&self, id: &ObjectId) -> Result<Tree>;

    /// Read file content
    fn blob(&self, id: &ObjectId) -> Result<Bytes>;
}

impl<R: TreeReader + ?Sized> TreeReader for &R {
    fn commit(&self, id: &ObjectId) -> Result<CommitInfo> {
        (**self).commit(id)
    }

    fn tree(&self, id: &ObjectId) -> Result<Tree> {
        (**self).tree(id)
    }

    fn blob(&self, id: &ObjectId) -> Result<Bytes> {
        (**self).blob(id)
    }
}

enum StoredObject {
    Blob(Bytes),
    Tree(Tree),
    Commit(Commit),
}

/// In-memory object store
pub struct MemorySource {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, id: ObjectId, object: StoredObject) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| SourceError::Backend("object map lock poisoned".into()))?
            .insert(id, object);
        Ok(())
    }

    /// Store file content and return its id
    pub fn write_blob(&self, data: &[u8]) -> Result<ObjectId> {
        let id = Blob::from_bytes(data.to_vec()).id();
        self.insert(id.clone(), StoredObject::Blob(Bytes::copy_from_slice(data)))?;
        Ok(id)
    }

    /// Store a directory object and return its id
    pub fn write_tree(&self, tree: Tree) -> Result<ObjectId> {
        let id = tree.id()?;
        self.insert(id.clone(), StoredObject::Tree(tree))?;
        Ok(id)
    }

    /// Build the nested trees for a set of `path -> content` files and
    /// return the root tree id. Paths use `/` separators.
    pub fn write_files<'a, I>(&self, files: I) -> Result<ObjectId>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut root = DirNode::default();
        for (path, content) in files {
            root.add(path.trim_matches('/'), content);
        }
        self.write_node(&root)
    }

    fn write_node(&self, node: &DirNode) -> Result<ObjectId> {
        let mut tree = Tree::new();
        for (name, sub) in &node.dirs {
            let id = self.write_node(sub)?;
            tree.insert(TreeEntry::new(name.as_str(), id, ObjectKind::Tree));
        }
        for (name, content) in &node.files {
            let id = self.write_blob(content)?;
            tree.insert(TreeEntry::new(name.as_str(), id, ObjectKind::Blob));
        }
        self.write_tree(tree)
    }

    /// Record a commit pointing at `tree_id`
    pub fn write_commit(
        &self,
        tree_id: ObjectId,
        parents: Vec<ObjectId>,
        message: &str,
        timestamp: i64,
    ) -> Result<ObjectId> {
        let commit = Commit::new(tree_id, parents, message.to_string(), timestamp);
        let id = commit.id()?;
        self.insert(id.clone(), StoredObject::Commit(commit))?;
        Ok(id)
    }

    /// Convenience: write the files and commit them in one step
    pub fn commit_files<'a, I>(&self, files: I, timestamp: i64) -> Result<ObjectId>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let tree_id = self.write_files(files)?;
        self.write_commit(tree_id, vec![], "snapshot", timestamp)
    }
}

#[derive(Default)]
struct DirNode {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeMap<String, DirNode>,
}

impl DirNode {
    fn add(&mut self, path: &str, content: &[u8]) {
        match path.split_once('/') {
            Some((dir, rest)) => self.dirs.entry(dir.to_string()).or_default().add(rest, content),
            None => {
                self.files.insert(path.to_string(), content.to_vec());
            }
        }
    }
}

impl TreeReader for MemorySource {
    fn commit(&self, id: &ObjectId) -> Result<CommitInfo> {
        let objects = self
            .objects
            .read()
            .map_err(|_| SourceError::Backend("object map lock poisoned".into()))?;
        match objects.get(id) {
            Some(StoredObject::Commit(c)) => {
                let time = DateTime::from_timestamp(c.timestamp, 0).ok_or_else(|| {
                    SourceError::InvalidCommit {
                        id: id.clone(),
                        reason: format!("timestamp {} out of range", c.timestamp),
                    }
                })?;
                Ok(CommitInfo {
                    id: id.clone(),
                    tree_id: c.tree_id.clone(),
                    time,
                })
            }
            _ => Err(SourceError::CommitNotFound(id.clone())),
        }
    }

    fn tree(&self, id: &ObjectId) -> Result<Tree> {
        let objects = self
            .objects
            .read()
            .map_err(|_| SourceError::Backend("object map lock poisoned".into()))?;
        match objects.get(id) {
            Some(StoredObject::Tree(t)) => Ok(t.clone()),
            _ => Err(SourceError::NotFound {
                kind: ObjectKind::Tree,
                id: id.clone(),
            }),
        }
    }

    fn blob(&self, id: &ObjectId) -> Result<Bytes> {
        let objects = self
            .objects
            .read()
            .map_err(|_| SourceError::Backend("object map lock poisoned".into()))?;
        match objects.get(id) {
            Some(StoredObject::Blob(b)) => Ok(b.clone()),
            _ => Err(SourceError::NotFound {
                kind: ObjectKind::Blob,
                id: id.clone(),
            }),
        }
    }
}
