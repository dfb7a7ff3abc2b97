//! Finding the CVE files in a commit and arranging them for the updater

use crate::config::FileNaming;
use crate::object::{ObjectId, ObjectKind, Tree};
use crate::source::TreeReader;
use crate::store::CveKey;
use crate::update::UpdateError;
use std::collections::HashSet;

/// A CVE file found in the corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    /// Directory containing the file, relative to the corpus root
    pub dir_path: String,
    pub filename: String,
    /// Hash of the containing directory
    pub tree_hash: ObjectId,
    /// Hash of the file content
    pub blob_hash: ObjectId,
    pub year: u32,
    pub number: u64,
}

impl RepoFile {
    /// The CVE id: the filename without its extension
    pub fn id(&self) -> &str {
        self.filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.filename)
    }

    pub fn key(&self) -> CveKey {
        CveKey::new(self.year, self.number)
    }

    /// Path of the file relative to the corpus root
    pub fn path(&self) -> String {
        if self.dir_path.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.dir_path, self.filename)
        }
    }
}

impl FileNaming {
    /// Whether `name` is a CVE file: `<prefix>-...<.extension>`
    pub fn is_cve_filename(&self, name: &str) -> bool {
        self.split(name).is_some()
    }

    fn split<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')
    }

    /// Parse the year and number out of a CVE filename.
    ///
    /// The year is exactly four digits; the number is everything between the
    /// second dash and the extension.
    pub fn parse(&self, name: &str) -> Result<(u32, u64), UpdateError> {
        let malformed = || UpdateError::MalformedFilename(name.to_string());
        let middle = self.split(name).ok_or_else(malformed)?;
        let (year, number) = middle.split_at_checked(4).ok_or_else(malformed)?;
        let number = number.strip_prefix('-').ok_or_else(malformed)?;
        if !is_digits(year) || !is_digits(number) {
            return Err(malformed());
        }
        let year = year.parse().map_err(|_| malformed())?;
        // Stores keep the number in a signed 64-bit column.
        let number: u64 = number.parse().map_err(|_| malformed())?;
        if i64::try_from(number).is_err() {
            return Err(malformed());
        }
        Ok((year, number))
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// All CVE files in a commit, sorted by (year, number).
pub fn repo_cve_files<R: TreeReader + ?Sized>(
    reader: &R,
    root: &ObjectId,
    naming: &FileNaming,
) -> Result<Vec<RepoFile>, UpdateError> {
    let tree = reader.tree(root)?;
    let mut files = Vec::new();
    walk_files(reader, &tree, root, "", naming, &mut files)?;
    sort_files(&mut files);
    Ok(files)
}

/// Collect CVE files from `tree` (whose hash is `tree_hash`) and below
pub fn walk_files<R: TreeReader + ?Sized>(
    reader: &R,
    tree: &Tree,
    tree_hash: &ObjectId,
    dir_path: &str,
    naming: &FileNaming,
    files: &mut Vec<RepoFile>,
) -> Result<(), UpdateError> {
    for entry in tree.iter() {
        match entry.kind {
            ObjectKind::Tree => {
                let sub = reader.tree(&entry.id)?;
                let sub_path = if dir_path.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", dir_path, entry.name)
                };
                walk_files(reader, &sub, &entry.id, &sub_path, naming, files)?;
            }
            ObjectKind::Blob if naming.is_cve_filename(&entry.name) => {
                let (year, number) = naming.parse(&entry.name)?;
                files.push(RepoFile {
                    dir_path: dir_path.to_string(),
                    filename: entry.name.clone(),
                    tree_hash: tree_hash.clone(),
                    blob_hash: entry.id.clone(),
                    year,
                    number,
                });
            }
            ObjectKind::Blob => {}
        }
    }
    Ok(())
}

/// Sort by year and number as integers. Sorting by id would put
/// CVE-2014-100009 before CVE-2014-10001.
pub fn sort_files(files: &mut [RepoFile]) {
    files.sort_by_key(RepoFile::key);
}

/// Split sorted files into runs sharing a directory. Every directory must
/// form exactly one run; the directory hash check depends on it.
pub fn group_files_by_directory(files: &[RepoFile]) -> Result<Vec<&[RepoFile]>, UpdateError> {
    let groups: Vec<&[RepoFile]> = files.chunk_by(|a, b| a.dir_path == b.dir_path).collect();
    let mut seen = HashSet::new();
    for group in &groups {
        if !seen.insert(group[0].dir_path.as_str()) {
            return Err(UpdateError::NonContiguousDirectory(group[0].dir_path.clone()));
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use proptest::prelude::*;

    fn file(dir: &str, year: u32, number: u64) -> RepoFile {
        let hash = ObjectId::from_data(dir.as_bytes());
        RepoFile {
            dir_path: dir.to_string(),
            filename: format!("CVE-{}-{:04}.json", year, number),
            tree_hash: hash.clone(),
            blob_hash: hash,
            year,
            number,
        }
    }

    #[test]
    fn test_parse_filenames() {
        let naming = FileNaming::default();
        assert_eq!(naming.parse("CVE-2021-3114.json").unwrap(), (2021, 3114));
        assert_eq!(naming.parse("CVE-2014-100009.json").unwrap(), (2014, 100009));
        assert_eq!(naming.parse("CVE-2021-9223372036854775807.json").unwrap(), (2021, i64::MAX as u64));
        assert!(naming.is_cve_filename("CVE-2021-3114.json"));
        assert!(!naming.is_cve_filename("README.md"));
        assert!(!naming.is_cve_filename("CVE-2021-3114.yaml"));
    }

    #[test]
    fn test_malformed_filenames_are_errors() {
        let naming = FileNaming::default();
        for name in [
            "CVE-20x1-0001.json",
            "CVE-2021-00a1.json",
            "CVE-2021-.json",
            "CVE-202-0001.json",
            "CVE-2021.json",
            "CVE-2021-9223372036854775808.json",
            "CVE-2021-99999999999999999999999.json",
        ] {
            assert!(
                matches!(naming.parse(name), Err(UpdateError::MalformedFilename(_))),
                "{} should be malformed",
                name
            );
        }
    }

    #[test]
    fn test_custom_naming() {
        let naming = FileNaming {
            prefix: "GHSA".into(),
            extension: "yaml".into(),
        };
        assert_eq!(naming.parse("GHSA-2022-17.yaml").unwrap(), (2022, 17));
        assert!(!naming.is_cve_filename("CVE-2022-17.json"));
    }

    #[test]
    fn test_repo_file_id_and_path() {
        let f = file("2021/3xxx", 2021, 3114);
        assert_eq!(f.id(), "CVE-2021-3114");
        assert_eq!(f.path(), "2021/3xxx/CVE-2021-3114.json");
        assert_eq!(file("", 2021, 1).path(), "CVE-2021-0001.json");
    }

    #[test]
    fn test_walk_collects_files_with_directory_hashes() {
        let src = MemorySource::new();
        let root = src
            .write_files([
                ("2014/10xxx/CVE-2014-10001.json", b"a".as_slice()),
                ("2014/100xxx/CVE-2014-100009.json", b"b".as_slice()),
                ("2014/0xxx/CVE-2014-0009.json", b"c".as_slice()),
                ("2014/0xxx/notes.txt", b"ignored".as_slice()),
                ("README.md", b"ignored".as_slice()),
            ])
            .unwrap();

        let files = repo_cve_files(&src, &root, &FileNaming::default()).unwrap();
        let ids: Vec<&str> = files.iter().map(RepoFile::id).collect();
        assert_eq!(ids, vec!["CVE-2014-0009", "CVE-2014-10001", "CVE-2014-100009"]);

        let root_tree = src.tree(&root).unwrap();
        let year = src.tree(&root_tree.get("2014").unwrap().id).unwrap();
        assert_eq!(files[0].tree_hash, year.get("0xxx").unwrap().id);
        assert_eq!(files[0].dir_path, "2014/0xxx");
    }

    #[test]
    fn test_walk_fails_on_malformed_name() {
        let src = MemorySource::new();
        let root = src
            .write_files([
                ("2021/CVE-2021-0001.json", b"a".as_slice()),
                ("2021/CVE-2021-xxxx.json", b"b".as_slice()),
            ])
            .unwrap();
        let err = repo_cve_files(&src, &root, &FileNaming::default()).unwrap_err();
        assert!(matches!(err, UpdateError::MalformedFilename(ref n) if n == "CVE-2021-xxxx.json"));
    }

    #[test]
    fn test_group_contiguous() {
        let files = vec![file("a", 2020, 1), file("a", 2020, 2), file("b", 2020, 3)];
        let groups = group_files_by_directory(&files).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1][0].dir_path, "b");
        assert!(group_files_by_directory(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_group_rejects_non_contiguous() {
        let files = vec![file("a", 2020, 1), file("b", 2020, 2), file("a", 2020, 3)];
        let err = group_files_by_directory(&files).unwrap_err();
        assert!(matches!(err, UpdateError::NonContiguousDirectory(ref d) if d == "a"));
    }

    proptest! {
        #[test]
        fn prop_sort_is_numeric(keys in proptest::collection::vec((1999u32..2030, 0u64..2_000_000), 0..64)) {
            let mut keys = keys;
            let mut files: Vec<RepoFile> = keys.iter().map(|&(y, n)| file("d", y, n)).collect();
            sort_files(&mut files);
            keys.sort();
            let sorted: Vec<(u32, u64)> = files.iter().map(|f| (f.year, f.number)).collect();
            prop_assert_eq!(sorted, keys);
        }
    }
}
