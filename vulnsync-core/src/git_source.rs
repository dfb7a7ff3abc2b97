//! `TreeReader` over a git repository

use crate::object::{ObjectId, ObjectKind, Tree, TreeEntry};
use crate::source::{CommitInfo, Result, SourceError, TreeReader};
use bytes::Bytes;
use chrono::DateTime;
use git2::{ErrorCode, ObjectType, Oid, Repository};
use std::path::Path;

/// Reads commits, trees and blobs from a local git repository
pub struct GitSource {
    repo: Repository,
}

impl GitSource {
    /// Open the repository at `path` (a work tree or a bare repository)
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            repo: Repository::open(path)?,
        })
    }

    pub fn from_repository(repo: Repository) -> Self {
        Self { repo }
    }

    /// Resolve a revision expression (`HEAD`, a branch, a hash) to a commit id
    pub fn resolve(&self, spec: &str) -> Result<ObjectId> {
        let commit = self.repo.revparse_single(spec)?.peel_to_commit()?;
        Ok(commit.id().into())
    }
}

fn to_oid(id: &ObjectId) -> Result<Oid> {
    Ok(Oid::from_str(id.as_str())?)
}

impl TreeReader for GitSource {
    fn commit(&self, id: &ObjectId) -> Result<CommitInfo> {
        let commit = match self.repo.find_commit(to_oid(id)?) {
            Ok(c) => c,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Err(SourceError::CommitNotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let seconds = commit.committer().when().seconds();
        let time = DateTime::from_timestamp(seconds, 0).ok_or_else(|| SourceError::InvalidCommit {
            id: id.clone(),
            reason: format!("committer time {} out of range", seconds),
        })?;
        Ok(CommitInfo {
            id: id.clone(),
            tree_id: commit.tree_id().into(),
            time,
        })
    }

    fn tree(&self, id: &ObjectId) -> Result<Tree> {
        let git_tree = match self.repo.find_tree(to_oid(id)?) {
            Ok(t) => t,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Err(SourceError::NotFound {
                    kind: ObjectKind::Tree,
                    id: id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let mut tree = Tree::new();
        for entry in git_tree.iter() {
            // Submodule links and non-UTF-8 names can't hold records.
            let kind = match entry.kind() {
                Some(ObjectType::Tree) => ObjectKind::Tree,
                Some(ObjectType::Blob) => ObjectKind::Blob,
                _ => continue,
            };
            let Some(name) = entry.name() else {
                continue;
            };
            tree.insert(TreeEntry::new(name, entry.id().into(), kind));
        }
        Ok(tree)
    }

    fn blob(&self, id: &ObjectId) -> Result<Bytes> {
        match self.repo.find_blob(to_oid(id)?) {
            Ok(blob) => Ok(Bytes::copy_from_slice(blob.content())),
            Err(e) if e.code() == ErrorCode::NotFound => Err(SourceError::NotFound {
                kind: ObjectKind::Blob,
                id: id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Signature, Time};
    use tempfile::TempDir;

    fn init_with_one_file(dir: &Path) -> Oid {
        let repo = Repository::init(dir).unwrap();
        let blob = repo.blob(b"{\"hello\": 1}").unwrap();
        let mut sub = repo.treebuilder(None).unwrap();
        sub.insert("CVE-2020-0001.json", blob, 0o100644).unwrap();
        let sub_id = sub.write().unwrap();
        let mut root = repo.treebuilder(None).unwrap();
        root.insert("2020", sub_id, 0o040000).unwrap();
        let root_id = root.write().unwrap();
        let tree = repo.find_tree(root_id).unwrap();
        let sig = Signature::new("tester", "tester@example.com", &Time::new(1_600_000_000, 0)).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "add record", &tree, &[]).unwrap()
    }

    #[test]
    fn test_reads_commit_tree_and_blob() {
        let tmp = TempDir::new().unwrap();
        let commit_oid = init_with_one_file(tmp.path());

        let src = GitSource::open(tmp.path()).unwrap();
        let head = src.resolve("HEAD").unwrap();
        assert_eq!(head, ObjectId::from(commit_oid));

        let info = src.commit(&head).unwrap();
        assert_eq!(info.time.timestamp(), 1_600_000_000);

        let root = src.tree(&info.tree_id).unwrap();
        let dir = root.get("2020").unwrap();
        assert_eq!(dir.kind, ObjectKind::Tree);

        let sub = src.tree(&dir.id).unwrap();
        let file = sub.get("CVE-2020-0001.json").unwrap();
        assert_eq!(file.kind, ObjectKind::Blob);
        assert_eq!(src.blob(&file.id).unwrap().as_ref(), b"{\"hello\": 1}");
    }

    #[test]
    fn test_missing_commit() {
        let tmp = TempDir::new().unwrap();
        init_with_one_file(tmp.path());
        let src = GitSource::open(tmp.path()).unwrap();
        let bogus = ObjectId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();
        assert!(matches!(src.commit(&bogus), Err(SourceError::CommitNotFound(_))));
    }
}
