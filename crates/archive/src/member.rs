use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// A regular file stored inside a multi-member archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    /// Normalized, relative path of the member inside the archive.
    pub path: PathBuf,
    /// Uncompressed size in bytes.
    pub size: u64,
}

/// Normalizes an archive-internal path: `.` components are dropped, `..`
/// is resolved lexically. Absolute paths and paths that climb above the
/// archive root are rejected.
pub fn normalize_member_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let unsafe_path = || ErrorKind::UnsafePath(path.display().to_string());
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {},
            Component::ParentDir => {
                if !normalized.pop() {
                    exn::bail!(unsafe_path());
                }
            },
            Component::RootDir | Component::Prefix(_) => exn::bail!(unsafe_path()),
        }
    }
    if normalized.as_os_str().is_empty() {
        exn::bail!(unsafe_path());
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.csv", "a.csv")]
    #[case("./a.csv", "a.csv")]
    #[case("nested/./b.csv", "nested/b.csv")]
    #[case("nested/../a.csv", "a.csv")]
    fn test_normalize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_member_path(input).unwrap(), PathBuf::from(expected));
    }

    #[rstest]
    #[case("/etc/passwd")]
    #[case("../escape.csv")]
    #[case("nested/../../escape.csv")]
    #[case(".")]
    fn test_normalize_rejects(#[case] input: &str) {
        let err = normalize_member_path(input).unwrap_err();
        assert!(matches!(*err, ErrorKind::UnsafePath(_)));
    }
}
