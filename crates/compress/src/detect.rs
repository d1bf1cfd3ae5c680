use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Magic numbers, checked in order.
const SIGNATURES: [(&[u8], Compression); 3] = [
    (&[0x42, 0x5A, 0x68], Compression::Bzip2),
    (&[0x1F, 0x8B], Compression::Gzip),
    (&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], Compression::Xz),
];
/// Enough leading bytes to match any signature.
const SNIFF_LEN: u64 = 6;

impl Compression {
    /// Detect compression from the file suffix alone.
    ///
    /// A dotfile such as `.gz` has no suffix and is therefore uncompressed.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let Some(ext) = path.as_ref().extension().and_then(|ext| ext.to_str()) else {
            return Compression::None;
        };
        match ext.to_ascii_lowercase().as_str() {
            "bz2" | "tbz2" => Compression::Bzip2,
            "gz" | "tgz" => Compression::Gzip,
            "xz" | "txz" | "lzma" => Compression::Xz,
            _ => Compression::None,
        }
    }

    /// Detect compression from leading bytes. Legacy `.lzma` streams carry
    /// no signature and are reported as [`None`](Self::None).
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        SIGNATURES
            .iter()
            .find(|(magic, _)| bytes.starts_with(magic))
            .map_or(Compression::None, |(_, compression)| *compression)
    }

    /// Detect compression of a file on disk: signature first, then suffix.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut head = Vec::new();
        File::open(path)
            .or_raise(|| ErrorKind::Io)?
            .take(SNIFF_LEN)
            .read_to_end(&mut head)
            .or_raise(|| ErrorKind::Io)?;
        Ok(match Self::from_magic_bytes(&head) {
            Compression::None => Self::from_path(path),
            detected => detected,
        })
    }
}
