use crate::error::{ErrorKind, Result};
use crate::format::Format;
use crate::member::{Member, normalize_member_path};
use exn::{OptionExt, ResultExt};
use ferry_compress::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// A file on disk whose archive format has been detected.
#[derive(Clone, Debug)]
pub struct Archive {
    path: PathBuf,
    format: Format,
}

impl Archive {
    /// Detects the format of `path`.
    ///
    /// # Errors
    /// [`ErrorKind::Unsupported`] when the file is not a recognised archive.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = Format::detect(&path)?.ok_or_raise(|| ErrorKind::Unsupported(path.display().to_string()))?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Lists the regular files stored in a tar or zip archive, in archive order.
    pub fn members(&self) -> Result<Vec<Member>> {
        let mut members = Vec::new();
        match self.format {
            Format::Tar(compression) => {
                let mut archive = self.tar(compression)?;
                for entry in archive.entries().or_raise(|| ErrorKind::Corrupted)? {
                    let entry = entry.or_raise(|| ErrorKind::Corrupted)?;
                    if !entry.header().entry_type().is_file() {
                        continue;
                    }
                    let path = normalize_member_path(entry.path().or_raise(|| ErrorKind::Corrupted)?)?;
                    members.push(Member { path, size: entry.size() });
                }
            },
            Format::Zip => {
                let mut archive = self.zip()?;
                for index in 0..archive.len() {
                    let file = archive.by_index(index).or_raise(|| ErrorKind::Corrupted)?;
                    if !file.is_file() {
                        continue;
                    }
                    members.push(Member { path: zip_member_path(file.enclosed_name(), file.name())?, size: file.size() });
                }
            },
            Format::Gzip | Format::Xz => exn::bail!(ErrorKind::WrongFormat(self.format.as_str())),
        }
        Ok(members)
    }

    /// Extracts every regular file below `dest`, preserving archive-relative
    /// paths. `skip` is consulted with each member and its resolved target;
    /// returning `true` leaves that target untouched.
    ///
    /// Returns the targets that were written.
    #[instrument(skip_all, fields(archive = %self.path.display(), format = %self.format, dest = %dest.as_ref().display()))]
    pub fn extract_all<F>(&self, dest: impl AsRef<Path>, mut skip: F) -> Result<Vec<PathBuf>>
    where
        F: FnMut(&Member, &Path) -> bool,
    {
        let dest = dest.as_ref();
        let mut written = Vec::new();
        match self.format {
            Format::Tar(compression) => {
                let mut archive = self.tar(compression)?;
                for entry in archive.entries().or_raise(|| ErrorKind::Corrupted)? {
                    let mut entry = entry.or_raise(|| ErrorKind::Corrupted)?;
                    if !entry.header().entry_type().is_file() {
                        continue;
                    }
                    let path = normalize_member_path(entry.path().or_raise(|| ErrorKind::Corrupted)?)?;
                    let member = Member { path, size: entry.size() };
                    let target = dest.join(&member.path);
                    if skip(&member, &target) {
                        debug!(member = %member.path.display(), "skipping member");
                        continue;
                    }
                    write_target(&mut entry, &target)?;
                    written.push(target);
                }
            },
            Format::Zip => {
                let mut archive = self.zip()?;
                for index in 0..archive.len() {
                    let mut file = archive.by_index(index).or_raise(|| ErrorKind::Corrupted)?;
                    if !file.is_file() {
                        continue;
                    }
                    let member = Member { path: zip_member_path(file.enclosed_name(), file.name())?, size: file.size() };
                    let target = dest.join(&member.path);
                    if skip(&member, &target) {
                        debug!(member = %member.path.display(), "skipping member");
                        continue;
                    }
                    write_target(&mut file, &target)?;
                    written.push(target);
                }
            },
            Format::Gzip | Format::Xz => exn::bail!(ErrorKind::WrongFormat(self.format.as_str())),
        }
        Ok(written)
    }

    /// Copies the bytes of one member to `target`.
    ///
    /// Returns `None` if no regular file in the archive matches `member`
    /// (after normalization).
    #[instrument(skip(self), fields(archive = %self.path.display()))]
    pub fn extract_member(&self, member: &Path, target: &Path) -> Result<Option<u64>> {
        let wanted = normalize_member_path(member)?;
        match self.format {
            Format::Tar(compression) => {
                let mut archive = self.tar(compression)?;
                for entry in archive.entries().or_raise(|| ErrorKind::Corrupted)? {
                    let mut entry = entry.or_raise(|| ErrorKind::Corrupted)?;
                    if !entry.header().entry_type().is_file() {
                        continue;
                    }
                    let path = entry.path().or_raise(|| ErrorKind::Corrupted)?;
                    if normalize_member_path(path)? == wanted {
                        return write_target(&mut entry, target).map(Some);
                    }
                }
                Ok(None)
            },
            Format::Zip => {
                let mut archive = self.zip()?;
                for index in 0..archive.len() {
                    let mut file = archive.by_index(index).or_raise(|| ErrorKind::Corrupted)?;
                    if file.is_file() && zip_member_path(file.enclosed_name(), file.name())? == wanted {
                        return write_target(&mut file, target).map(Some);
                    }
                }
                Ok(None)
            },
            Format::Gzip | Format::Xz => exn::bail!(ErrorKind::WrongFormat(self.format.as_str())),
        }
    }

    /// Decodes a single-stream (gzip or xz) archive into `target`.
    #[instrument(skip(self), fields(archive = %self.path.display()))]
    pub fn decompress_to(&self, target: &Path) -> Result<u64> {
        let compression = match self.format {
            Format::Gzip => Compression::Gzip,
            Format::Xz => Compression::Xz,
            Format::Tar(_) | Format::Zip => exn::bail!(ErrorKind::WrongFormat(self.format.as_str())),
        };
        compression.decompress_file(&self.path, target).or_raise(|| ErrorKind::Decompression)
    }

    fn tar(&self, compression: Compression) -> Result<tar::Archive<Box<dyn Read>>> {
        let reader = BufReader::new(File::open(&self.path).or_raise(|| ErrorKind::Io)?);
        let decoder = compression.wrap_reader(reader).or_raise(|| ErrorKind::Decompression)?;
        Ok(tar::Archive::new(decoder))
    }

    fn zip(&self) -> Result<zip::ZipArchive<BufReader<File>>> {
        let reader = BufReader::new(File::open(&self.path).or_raise(|| ErrorKind::Io)?);
        zip::ZipArchive::new(reader).or_raise(|| ErrorKind::Corrupted)
    }
}

fn zip_member_path<P: AsRef<Path>>(enclosed: Option<P>, name: &str) -> Result<PathBuf> {
    let path = enclosed.ok_or_raise(|| ErrorKind::UnsafePath(name.to_string()))?;
    normalize_member_path(path)
}

fn write_target(reader: &mut impl Read, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
    }
    let mut writer = BufWriter::new(File::create(target).or_raise(|| ErrorKind::Io)?);
    let size = std::io::copy(reader, &mut writer).or_raise(|| ErrorKind::Corrupted)?;
    writer.flush().or_raise(|| ErrorKind::Io)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::fixtures::*;
    use rstest::rstest;

    type Writer = fn(&Path, &str) -> PathBuf;

    #[rstest]
    #[case::tar(write_tar as Writer, "bundle.tar")]
    #[case::tar_gz(write_tar_gz as Writer, "bundle.tar.gz")]
    #[case::zip(write_zip as Writer, "bundle.zip")]
    fn test_members(#[case] write: Writer, #[case] name: &str) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(write(dir.path(), name)).unwrap();
        let members = archive.members().unwrap();
        assert_eq!(
            members,
            vec![
                Member { path: PathBuf::from("a.csv"), size: MEMBER_A.len() as u64 },
                Member { path: PathBuf::from("nested/b.csv"), size: MEMBER_B.len() as u64 },
            ]
        );
    }

    #[rstest]
    #[case::tar(write_tar as Writer, "bundle.tar")]
    #[case::zip(write_zip as Writer, "bundle.zip")]
    fn test_extract_all(#[case] write: Writer, #[case] name: &str) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(write(dir.path(), name)).unwrap();
        let dest = dir.path().join("out");
        let written = archive.extract_all(&dest, |_, _| false).unwrap();
        assert_eq!(written, vec![dest.join("a.csv"), dest.join("nested/b.csv")]);
        assert_eq!(fs::read(dest.join("a.csv")).unwrap(), MEMBER_A);
        assert_eq!(fs::read(dest.join("nested/b.csv")).unwrap(), MEMBER_B);
    }

    #[test]
    fn test_extract_all_with_skip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(write_tar(dir.path(), "bundle.tar")).unwrap();
        let dest = dir.path().join("out");
        let written = archive.extract_all(&dest, |member, _| member.path == Path::new("a.csv")).unwrap();
        assert_eq!(written, vec![dest.join("nested/b.csv")]);
        assert!(!dest.join("a.csv").exists());
    }

    #[rstest]
    #[case::tar(write_tar as Writer, "bundle.tar")]
    #[case::zip(write_zip as Writer, "bundle.zip")]
    fn test_extract_member(#[case] write: Writer, #[case] name: &str) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(write(dir.path(), name)).unwrap();
        let target = dir.path().join("renamed").join("b.csv");
        let size = archive.extract_member(Path::new("./nested/b.csv"), &target).unwrap();
        assert_eq!(size, Some(MEMBER_B.len() as u64));
        assert_eq!(fs::read(&target).unwrap(), MEMBER_B);

        let missing = archive.extract_member(Path::new("missing.csv"), &dir.path().join("missing.csv")).unwrap();
        assert_eq!(missing, None);
        assert!(!dir.path().join("missing.csv").exists());
    }

    #[test]
    fn test_decompress_to() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(write_file(dir.path(), "data.csv.gz", &gzip(MEMBER_A))).unwrap();
        assert!(archive.format().is_single_stream());
        let target = dir.path().join("data.csv");
        assert_eq!(archive.decompress_to(&target).unwrap(), MEMBER_A.len() as u64);
        assert_eq!(fs::read(&target).unwrap(), MEMBER_A);

        let err = archive.members().unwrap_err();
        assert_eq!(*err, ErrorKind::WrongFormat("gzip"));
    }

    #[test]
    fn test_open_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Archive::open(write_file(dir.path(), "data.csv", MEMBER_A)).unwrap_err();
        assert!(matches!(*err, ErrorKind::Unsupported(_)));
    }
}
