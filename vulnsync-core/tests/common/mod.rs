//! Shared fixtures for integration tests: a CVE corpus in a real git
//! repository inside a temporary directory.

#![allow(dead_code)]

use git2::{IndexAddOption, Repository, Signature, Time};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use vulnsync_core::ObjectId;

pub struct Corpus {
    pub dir: TempDir,
    pub repo: Repository,
}

impl Corpus {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Self { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, path: &str, content: &[u8]) {
        let full = self.dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    pub fn remove(&self, path: &str) {
        fs::remove_file(self.dir.path().join(path)).unwrap();
    }

    /// Commit the work tree as it stands, on top of HEAD if there is one
    pub fn commit(&self, message: &str, timestamp: i64) -> ObjectId {
        let mut index = self.repo.index().unwrap();
        index.add_all(["*"], IndexAddOption::DEFAULT, None).unwrap();
        index.update_all(["*"], None).unwrap();
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::new("corpus", "corpus@example.com", &Time::new(timestamp, 0)).unwrap();
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
            .into()
    }
}

pub fn cve(id: &str, state: &str, url: &str) -> Vec<u8> {
    serde_json::to_vec_pretty(&serde_json::json!({
        "CVE_data_meta": {"ID": id, "ASSIGNER": "cve@mitre.org", "STATE": state},
        "description": {"description_data": [{"lang": "eng", "value": format!("{} description", id)}]},
        "references": {"reference_data": [{"url": url, "refsource": "MISC"}]}
    }))
    .unwrap()
}

/// Path of a CVE file in the usual `<year>/<n>xxx/` layout
pub fn cve_path(year: u32, number: u64) -> String {
    format!("{}/{}xxx/CVE-{}-{:04}.json", year, number / 1000, year, number)
}
