//! Content-addressed object model for source snapshots
//!
//! Trees and blobs are identified by the hex digest of their content, the same
//! way a git object database identifies them. Git uses 20-byte SHA-1 ids and
//! in-memory snapshots use 32-byte SHA-256 ids; both are carried as lowercase
//! hex so they compare and persist uniformly.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Unique identifier for any source object (lowercase hex digest)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    /// Compute ObjectId from data
    pub fn from_data(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Parse from hexadecimal string (20-byte or 32-byte digests)
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 20 && bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Self(hex::encode(bytes)))
    }

    /// Hexadecimal form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<git2::Oid> for ObjectId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

/// File content object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&self.data)
    }
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Blob,
    Tree,
}

/// Directory tree entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    /// Object ID (points to Blob or Tree)
    pub id: ObjectId,
    pub kind: ObjectKind,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, id: ObjectId, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            id,
            kind,
        }
    }
}

/// Directory object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Sorted entries for deterministic hashing
    pub entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update an entry
    pub fn insert(&mut self, entry: TreeEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    /// Compute the object ID over the serialized entries
    pub fn id(&self) -> Result<ObjectId, bincode::Error> {
        Ok(ObjectId::from_data(&bincode::serialize(self)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }
}

/// Commit object: a root tree plus the commit time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub tree_id: ObjectId,
    pub parents: Vec<ObjectId>,
    pub message: String,
    /// Commit timestamp (Unix seconds)
    pub timestamp: i64,
}

impl Commit {
    pub fn new(tree_id: ObjectId, parents: Vec<ObjectId>, message: String, timestamp: i64) -> Self {
        Self {
            tree_id,
            parents,
            message,
            timestamp,
        }
    }

    pub fn id(&self) -> Result<ObjectId, bincode::Error> {
        Ok(ObjectId::from_data(&bincode::serialize(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        let id = ObjectId::from_data(b"hello world");
        assert_eq!(id.as_str().len(), 64);
        let id2 = ObjectId::from_hex(id.as_str()).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_object_id_accepts_git_length_and_normalizes_case() {
        let id = ObjectId::from_hex("0123456789ABCDEF0123456789abcdef01234567").unwrap();
        assert_eq!(id.as_str(), "0123456789abcdef0123456789abcdef01234567");
        assert!(ObjectId::from_hex("abcd").is_err());
        assert!(ObjectId::from_hex("not hex").is_err());
    }

    #[test]
    fn test_tree_id_depends_on_entries() {
        let mut a = Tree::new();
        a.insert(TreeEntry::new("CVE-2021-0001.json", Blob::from_bytes(b"{}".to_vec()).id(), ObjectKind::Blob));
        let mut b = a.clone();
        assert_eq!(a.id().unwrap(), b.id().unwrap());

        b.insert(TreeEntry::new("CVE-2021-0002.json", Blob::from_bytes(b"[]".to_vec()).id(), ObjectKind::Blob));
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn test_commit_id_changes_with_timestamp() {
        let tree = Tree::new().id().unwrap();
        let c1 = Commit::new(tree.clone(), vec![], "sync".into(), 1000);
        let c2 = Commit::new(tree, vec![], "sync".into(), 2000);
        assert_ne!(c1.id().unwrap(), c2.id().unwrap());
    }
}
