use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ferry_compress::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::instrument;

const TAR_BLOCK: usize = 512;

/// A detected archive layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// A tar stream, optionally wrapped in a compression layer (`.tar.gz`, ...).
    Tar(Compression),
    Zip,
    /// A single gzip-compressed file.
    Gzip,
    /// A single xz or legacy lzma compressed file.
    Xz,
}

impl Format {
    /// Detect the archive format of the file at `path`.
    ///
    /// Content is checked first (tar header, zip central directory), then
    /// the suffix decides between the single-stream formats. Returns `None`
    /// if nothing matches.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn detect(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if let Some(compression) = tar_compression(path)? {
            return Ok(Some(Format::Tar(compression)));
        }
        if is_zip(path)? {
            return Ok(Some(Format::Zip));
        }
        Ok(match Compression::from_path(path) {
            Compression::Gzip => Some(Format::Gzip),
            Compression::Xz => Some(Format::Xz),
            _ => None,
        })
    }

    /// Whether the format holds exactly one unnamed output stream.
    #[must_use]
    pub fn is_single_stream(&self) -> bool {
        matches!(self, Format::Gzip | Format::Xz)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Tar(_) => "tar",
            Format::Zip => "zip",
            Format::Gzip => "gzip",
            Format::Xz => "xz",
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Format::Tar(Compression::None) => write!(f, "tar"),
            Format::Tar(compression) => write!(f, "tar+{compression}"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Returns the compression wrapping a tar stream, or `None` if the
/// (decoded) content does not start with a valid tar header.
fn tar_compression(path: &Path) -> Result<Option<Compression>> {
    let compression = Compression::from_file(path).or_raise(|| ErrorKind::Io)?;
    // A file that claims to be compressed but fails to decode is not a tar.
    let Ok(head) = compression.decode_head(path, TAR_BLOCK) else {
        return Ok(None);
    };
    Ok(is_tar_header(&head).then_some(compression))
}

/// Validates the header checksum of the first tar block.
fn is_tar_header(block: &[u8]) -> bool {
    if block.len() < TAR_BLOCK || block.iter().all(|b| *b == 0) {
        return false;
    }
    let mut header = tar::Header::from_byte_slice(&block[..TAR_BLOCK]).clone();
    let Ok(stored) = header.cksum() else {
        return false;
    };
    header.set_cksum();
    header.cksum().is_ok_and(|computed| computed == stored)
}

fn is_zip(path: &Path) -> Result<bool> {
    let file = File::open(path).or_raise(|| ErrorKind::Io)?;
    Ok(zip::ZipArchive::new(BufReader::new(file)).is_ok())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;
    use std::path::{Path, PathBuf};

    pub const MEMBER_A: &[u8] = b"a,b\n1,2\n";
    pub const MEMBER_B: &[u8] = b"c,d\n3,4\n5,6\n";

    fn tar_bytes() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in [("a.csv", MEMBER_A), ("nested/b.csv", MEMBER_B)] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    pub fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    pub fn xz(data: &[u8]) -> Vec<u8> {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    pub fn write_tar(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, tar_bytes()).unwrap();
        path
    }

    pub fn write_tar_gz(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, gzip(&tar_bytes())).unwrap();
        path
    }

    pub fn write_zip(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("nested/", options).unwrap();
        for (name, data) in [("a.csv", MEMBER_A), ("nested/b.csv", MEMBER_B)] {
            writer.start_file(name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }
}
