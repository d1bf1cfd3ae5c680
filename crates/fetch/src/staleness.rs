//! Deciding whether a local copy has to be fetched again.

use std::fs;
use std::path::Path;
use time::{Duration, OffsetDateTime};

/// Returns `true` when `target` must be (re)downloaded.
///
/// A local copy is current when its size equals `remote_size`, or when the
/// remote size is unknown and the copy was modified strictly less than
/// `refresh_interval` before `now`. Anything else, including a missing or
/// unreadable file, is stale.
pub fn requires_update(
    target: &Path,
    remote_size: Option<u64>,
    refresh_interval: Duration,
    now: OffsetDateTime,
) -> bool {
    let Ok(metadata) = fs::metadata(target) else {
        return true;
    };
    match remote_size {
        Some(remote) => metadata.len() != remote,
        None => {
            let Ok(modified) = metadata.modified() else {
                return true;
            };
            let age = now - OffsetDateTime::from(modified);
            age >= refresh_interval
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn hello_world() -> (NamedTempFile, OffsetDateTime) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();
        let modified = OffsetDateTime::from(file.as_file().metadata().unwrap().modified().unwrap());
        (file, modified)
    }

    #[test]
    fn test_missing_file_requires_update() {
        let now = OffsetDateTime::now_utc();
        assert!(requires_update(Path::new("some/file"), Some(1), Duration::days(1), now));
        assert!(requires_update(Path::new("some/file"), None, Duration::days(1), now));
    }

    #[test]
    fn test_matching_size_is_current_regardless_of_age() {
        let (file, modified) = hello_world();
        let much_later = modified + Duration::days(365);
        assert!(!requires_update(file.path(), Some(11), Duration::ZERO, much_later));
        assert!(requires_update(file.path(), Some(12), Duration::days(1), modified));
    }

    #[test]
    fn test_unknown_size_uses_refresh_interval() {
        let (file, modified) = hello_world();
        assert!(!requires_update(file.path(), None, Duration::days(1), modified + Duration::hours(1)));
        assert!(requires_update(file.path(), None, Duration::ZERO, modified));
    }

    #[test]
    fn test_refresh_interval_boundary_is_stale() {
        let (file, modified) = hello_world();
        let interval = Duration::days(7);
        assert!(requires_update(file.path(), None, interval, modified + interval));
        assert!(!requires_update(file.path(), None, interval, modified + interval - Duration::seconds(1)));
    }
}
