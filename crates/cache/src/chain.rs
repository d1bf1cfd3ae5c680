//! Hash chains over the configuration hierarchy.
//!
//! ```text
//! source_hash = H(base_url ‖ data_dir ‖ H(file_digest(c)) for c in cached files)
//! api_hash    = H(name ‖ H(source_hash(s)) for s in sources)
//! ```
//!
//! Children are folded in persisted (`id`) order. The results are computed on
//! demand from the files currently on disk; they are never stored.

use crate::error::{ErrorKind, Result};
use crate::hash::file_digest;
use crate::models::{Api, CachedFile, Source};
use exn::OptionExt;

/// An API with its sources and their cached files, in persisted order.
#[derive(Clone, Debug)]
pub struct ApiTree {
    pub api: Api,
    pub sources: Vec<SourceTree>,
}

#[derive(Clone, Debug)]
pub struct SourceTree {
    pub source: Source,
    pub cached_files: Vec<CachedFile>,
}

/// Computed fingerprints for an [`ApiTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeHashes {
    pub api: blake3::Hash,
    /// `(source id, source hash)` in persisted order.
    pub sources: Vec<(i64, blake3::Hash)>,
}

/// Digest of a source's identity and the current content of its cached files.
pub fn source_hash(source: &Source, cached_files: &[CachedFile]) -> Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.base_url.as_bytes());
    hasher.update(source.data_dir.to_str().ok_or_raise(|| ErrorKind::InvalidData("data dir"))?.as_bytes());
    for file in cached_files {
        let digest = file_digest(source.cached_file_path(file))?;
        hasher.update(blake3::hash(digest.as_bytes()).as_bytes());
    }
    Ok(hasher.finalize())
}

/// Digest of an API's name and its sources' hashes.
pub fn api_hash<'a>(api: &Api, source_hashes: impl IntoIterator<Item = &'a blake3::Hash>) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(api.name.as_bytes());
    for source_hash in source_hashes {
        hasher.update(blake3::hash(source_hash.as_bytes()).as_bytes());
    }
    hasher.finalize()
}

impl ApiTree {
    /// Hashes every source, then the API. Reads every cached file from disk.
    pub fn hashes(&self) -> Result<TreeHashes> {
        let sources = self
            .sources
            .iter()
            .map(|tree| Ok((tree.source.id, source_hash(&tree.source, &tree.cached_files)?)))
            .collect::<Result<Vec<_>>>()?;
        let api = api_hash(&self.api, sources.iter().map(|(_, hash)| hash));
        Ok(TreeHashes { api, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExpectedMode;
    use std::path::{Path, PathBuf};

    fn cached_file(id: i64, path: &str) -> CachedFile {
        CachedFile {
            id,
            source_id: 1,
            url: path.to_string(),
            url_params: None,
            path: PathBuf::from(path),
            last_download: None,
            last_update: None,
            refresh_interval: None,
            hash: None,
            cache_type: "cached_file".to_string(),
            size: None,
            is_archive: false,
            extract_to: None,
            expected_mode: ExpectedMode::SelfFile,
            meta: None,
        }
    }

    fn tree(data_dir: &Path) -> ApiTree {
        ApiTree {
            api: Api { id: 1, name: "acme".to_string(), description: None, hash: None },
            sources: vec![SourceTree {
                source: Source {
                    id: 1,
                    api_id: 1,
                    source_type: "source".to_string(),
                    base_url: "https://example.test".to_string(),
                    data_dir: data_dir.to_path_buf(),
                    meta: None,
                },
                cached_files: vec![cached_file(1, "one.csv"), cached_file(2, "two.csv")],
            }],
        }
    }

    #[test]
    fn test_mutating_a_file_propagates_up_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.csv"), b"a,b\n1,2\n").unwrap();
        std::fs::write(dir.path().join("two.csv"), b"c,d\n3,4\n").unwrap();
        let tree = tree(dir.path());
        let before = tree.hashes().unwrap();
        let one_before = file_digest(dir.path().join("one.csv")).unwrap();

        std::fs::write(dir.path().join("two.csv"), b"c,d\n3,5\n").unwrap();
        let after = tree.hashes().unwrap();

        assert_ne!(before.sources[0].1, after.sources[0].1);
        assert_ne!(before.api, after.api);
        // The sibling's own digest is untouched.
        assert_eq!(file_digest(dir.path().join("one.csv")).unwrap(), one_before);
    }

    #[test]
    fn test_hashes_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.csv"), b"a,b\n1,2\n").unwrap();
        let tree = tree(dir.path());
        assert_eq!(tree.hashes().unwrap(), tree.hashes().unwrap());
    }

    #[test]
    fn test_identity_fields_change_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tree(dir.path());
        let base = tree.hashes().unwrap();

        let mut renamed = tree.clone();
        renamed.api.name = "acme-2".to_string();
        let renamed = renamed.hashes().unwrap();
        assert_eq!(renamed.sources, base.sources);
        assert_ne!(renamed.api, base.api);

        let mut moved = tree.clone();
        moved.sources[0].source.base_url = "https://mirror.example.test".to_string();
        assert_ne!(moved.hashes().unwrap().api, base.api);
    }

    #[test]
    fn test_child_order_matters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.csv"), b"1").unwrap();
        std::fs::write(dir.path().join("two.csv"), b"2").unwrap();
        let tree = tree(dir.path());
        let mut reversed = tree.clone();
        reversed.sources[0].cached_files.reverse();
        assert_ne!(tree.hashes().unwrap().api, reversed.hashes().unwrap().api);
    }
}
