//! Turning a downloaded cached file into expected-file descriptors.
//!
//! | Cached file                     | Result                                              |
//! |---------------------------------|-----------------------------------------------------|
//! | not an archive, or `self` mode  | one descriptor for the download itself              |
//! | tar/zip, `auto`                 | every member extracted, one descriptor per member   |
//! | tar/zip, `explicit`             | only declared members copied to their declared path |
//! | gzip/xz                         | one decoded file, see [`determine_target`]          |
//!
//! Descriptors are not persisted here; the orchestrator reconciles them with
//! the `expected_file` table. Paths in descriptors are relative to the
//! source's data directory unless a declared row already stores another form.
//!
//! Everything in this module blocks on file I/O.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ferry_archive::{Archive, Format, Member};
use ferry_cache::models::{CachedFile, ExpectedFile, ExpectedMode, NewExpectedFile, Source};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Derive expected-file descriptors for `file`, extracting archives as
/// needed.
///
/// `existing` holds the rows already stored for `file`. With `overwrite` off,
/// archive members whose target already exists with the member's size are
/// not rewritten. Content is not compared, so a changed member of the same
/// size keeps its old bytes.
///
/// # Errors
/// [`ErrorKind::InvalidConfiguration`] when a single-stream archive has the
/// wrong number of expected files for its mode; [`ErrorKind::Archive`] when
/// the download cannot be read as an archive.
#[instrument(skip_all, fields(cached_file = file.id, mode = %file.expected_mode))]
pub fn preprocess(
    source: &Source,
    file: &CachedFile,
    existing: &[ExpectedFile],
    overwrite: bool,
) -> Result<Vec<NewExpectedFile>> {
    let full_path = source.cached_file_path(file);
    if !file.is_archive || file.expected_mode == ExpectedMode::SelfFile {
        let mut descriptor = NewExpectedFile::new(file.id, source.relativize(&full_path));
        if let Ok(metadata) = fs::metadata(&full_path) {
            descriptor = descriptor.size(metadata.len());
        }
        return Ok(vec![descriptor]);
    }

    let archive = Archive::open(&full_path).or_raise(|| ErrorKind::Archive)?;
    let extract_dir = source.extract_dir(file);
    debug!(format = %archive.format(), dest = %extract_dir.display(), "preprocessing archive");
    match (archive.format(), file.expected_mode) {
        (Format::Gzip | Format::Xz, mode) => {
            let (target, stored) = determine_target(source, file, existing, mode, &extract_dir)?;
            let written = archive.decompress_to(&target).or_raise(|| ErrorKind::Archive)?;
            Ok(vec![NewExpectedFile::new(file.id, stored).size(written)])
        },
        (_, ExpectedMode::Auto) => extract_auto(source, file, existing, &archive, &extract_dir, overwrite),
        (_, _) => extract_explicit(source, file, existing, &archive, &extract_dir),
    }
}

/// Pick the output of a single-stream archive.
///
/// Returns the absolute target and the path to store in the descriptor.
///
/// - more than one declared row: always invalid.
/// - `auto` with no rows: `extract_dir/stem(download)`. A single row that
///   already points there is the one a previous `auto` run created.
/// - `explicit` with one row: that row's path.
/// - anything else is invalid.
pub fn determine_target(
    source: &Source,
    file: &CachedFile,
    existing: &[ExpectedFile],
    mode: ExpectedMode,
    extract_dir: &Path,
) -> Result<(PathBuf, PathBuf)> {
    if existing.len() > 1 {
        exn::bail!(ErrorKind::InvalidConfiguration(format!(
            "cached file {} is a single-stream archive but declares {} expected files",
            file.id,
            existing.len()
        )));
    }
    let derived = || {
        let full_path = source.cached_file_path(file);
        let stem = full_path.file_stem().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(&file.url));
        extract_dir.join(stem)
    };
    match (mode, existing.first()) {
        (ExpectedMode::Auto, None) => {
            let target = derived();
            let stored = source.relativize(&target);
            Ok((target, stored))
        },
        (ExpectedMode::Auto, Some(row)) if source.resolve(&row.path) == derived() => {
            Ok((source.resolve(&row.path), row.path.clone()))
        },
        (ExpectedMode::Explicit, Some(row)) => Ok((source.resolve(&row.path), row.path.clone())),
        (mode, row) => exn::bail!(ErrorKind::InvalidConfiguration(format!(
            "cached file {} is a single-stream archive in {mode} mode with {} expected files",
            file.id,
            usize::from(row.is_some())
        ))),
    }
}

fn extract_auto(
    source: &Source,
    file: &CachedFile,
    existing: &[ExpectedFile],
    archive: &Archive,
    extract_dir: &Path,
    overwrite: bool,
) -> Result<Vec<NewExpectedFile>> {
    // Resolved target -> path as stored, so known members keep their row.
    let known: HashMap<PathBuf, &Path> = existing.iter().map(|row| (source.resolve(&row.path), row.path.as_path())).collect();

    let members = archive.members().or_raise(|| ErrorKind::Archive)?;
    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(members.len());
    for Member { path, size } in &members {
        let target = extract_dir.join(path);
        if !seen.insert(target.clone()) {
            continue;
        }
        let stored = match known.get(&target) {
            Some(stored) => stored.to_path_buf(),
            None => source.relativize(&target),
        };
        descriptors.push(NewExpectedFile::new(file.id, stored).archive_path(path).size(*size));
    }

    let written = archive
        .extract_all(extract_dir, |member, target| {
            !overwrite && known.contains_key(target) && has_size(target, member.size)
        })
        .or_raise(|| ErrorKind::Archive)?;
    debug!(members = members.len(), written = written.len(), "extracted archive");
    Ok(descriptors)
}

fn extract_explicit(
    source: &Source,
    file: &CachedFile,
    existing: &[ExpectedFile],
    archive: &Archive,
    extract_dir: &Path,
) -> Result<Vec<NewExpectedFile>> {
    if existing.is_empty() {
        return Ok(Vec::new());
    }
    let sizes: HashMap<PathBuf, u64> =
        archive.members().or_raise(|| ErrorKind::Archive)?.into_iter().map(|m| (m.path, m.size)).collect();
    let mut descriptors = Vec::with_capacity(existing.len());
    for row in existing {
        let target = source.resolve(&row.path);
        let member = match &row.archive_path {
            Some(archive_path) => archive_path.clone(),
            None => target.strip_prefix(extract_dir).map(Path::to_path_buf).unwrap_or_else(|_| row.path.clone()),
        };
        let Some(&size) = sizes.get(&member) else {
            warn!(member = %member.display(), archive = %archive.path().display(), "declared member not found in archive");
            continue;
        };
        if archive.format() == Format::Zip && has_size(&target, size) {
            debug!(member = %member.display(), "target already present");
        } else {
            archive.extract_member(&member, &target).or_raise(|| ErrorKind::Archive)?;
        }
        descriptors.push(NewExpectedFile::new(file.id, row.path.clone()).archive_path(member).size(size));
    }
    Ok(descriptors)
}

fn has_size(path: &Path, size: u64) -> bool {
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file() && metadata.len() == size)
}
