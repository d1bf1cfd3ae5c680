//! Streaming content digests.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::io::{ErrorKind as IoErrorKind, Read};
use std::path::Path;

/// Bytes read per block while hashing.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Digest of the file at `path`, read in fixed [`BLOCK_SIZE`] blocks.
///
/// A missing path or a directory yields the digest of the empty input so
/// callers can always fold the result into a larger hash.
pub fn file_digest(path: impl AsRef<Path>) -> Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    let path = path.as_ref();
    if !path.is_file() {
        return Ok(hasher.finalize());
    }
    let mut file = match File::open(path) {
        Ok(file) => file,
        // Removed between the check and the open.
        Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(hasher.finalize()),
        Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
    };
    let mut buffer = vec![0; BLOCK_SIZE];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == IoErrorKind::Interrupted => continue,
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}

/// Lowercase hex form of [`file_digest`], as stored in `hash` columns.
pub fn file_hash(path: impl AsRef<Path>) -> Result<String> {
    Ok(file_digest(path)?.to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_in_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();
        assert_eq!(file_digest(&path).unwrap(), blake3::hash(b"a,b\n1,2\n"));
        assert_eq!(file_hash(&path).unwrap(), blake3::hash(b"a,b\n1,2\n").to_hex().to_string());
    }

    #[test]
    fn test_digest_spans_multiple_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.bin");
        let data: Vec<u8> = (0..(BLOCK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(file_digest(&path).unwrap(), blake3::hash(&data));
    }

    #[test]
    fn test_missing_and_directory_are_empty_digest() {
        let dir = tempfile::tempdir().unwrap();
        let empty = blake3::hash(b"");
        assert_eq!(file_digest(dir.path().join("missing")).unwrap(), empty);
        assert_eq!(file_digest(dir.path()).unwrap(), empty);
    }
}
