//! Layered configuration for ferry.
//!
//! Values are resolved from built-in defaults, then an optional TOML, YAML or
//! JSON file, then `FERRY_` prefixed environment variables (nested keys joined
//! with `__`, e.g. `FERRY_EXTRACT__WORKERS=8`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "FERRY_";
const DATABASE_FILENAME: &str = "ferry.db";
const CONFIG_FILENAME: &str = "ferry.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database holding the cache metadata.
    pub database: PathBuf,
    pub http: HttpSettings,
    pub s3: Option<S3Settings>,
    pub extract: ExtractSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Settings {
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub key_secret: Option<String>,
}

/// How already-downloaded files are recognised when `skip_existing_files` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnDiskCheck {
    /// A file counts as present when it exists locally.
    #[default]
    Full,
    /// A file counts as present when it has a recorded hash.
    Hash,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    #[default]
    Sync,
    Multiprocess,
    Async,
}

/// Which cached files get their archive members reconciled after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    /// Only files that were fetched in this run.
    #[default]
    Incremental,
    /// Every cached file of the API.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    pub skip_existing_files: bool,
    pub on_disk_check: OnDiskCheck,
    pub concurrency: Concurrency,
    /// Parallel fetches for [`Concurrency::Multiprocess`].
    pub workers: usize,
    pub batch_size: usize,
    pub expected_file_generation: Generation,
    /// Download even when the local copy looks current.
    pub force_download: bool,
    /// Rewrite archive members that already exist on disk with the same size.
    pub overwrite_on_extract: bool,
    /// Write buffer size for downloads, in bytes.
    pub block_size: usize,
    /// Refresh interval for cached files that do not set one, in seconds.
    pub default_refresh_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let database = ProjectDirs::from("", "", "ferry")
            .map(|dirs| dirs.data_dir().join(DATABASE_FILENAME))
            .unwrap_or_else(|| PathBuf::from(DATABASE_FILENAME));
        Self { database, http: HttpSettings::default(), s3: None, extract: ExtractSettings::default() }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            connect_timeout_secs: 30,
            user_agent: concat!("ferry/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            skip_existing_files: false,
            on_disk_check: OnDiskCheck::default(),
            concurrency: Concurrency::default(),
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            batch_size: 10_000,
            expected_file_generation: Generation::default(),
            force_download: false,
            overwrite_on_extract: false,
            block_size: 16 * 1024,
            default_refresh_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ExtractSettings {
    pub fn default_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.default_refresh_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            exn::bail!(ErrorKind::Invalid("extract.workers must be at least 1"));
        }
        if self.batch_size == 0 {
            exn::bail!(ErrorKind::Invalid("extract.batch_size must be at least 1"));
        }
        if self.block_size == 0 {
            exn::bail!(ErrorKind::Invalid("extract.block_size must be at least 1"));
        }
        Ok(())
    }
}

impl Settings {
    /// Default location of the configuration file, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ferry").map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
    }

    /// Build the provider stack without extracting it.
    ///
    /// An explicit `path` must exist; the default location is used only when
    /// a file is present there.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|p| p.is_file()),
        };
        if let Some(file) = file {
            if !file.is_file() {
                exn::bail!(ErrorKind::Invalid("configuration file does not exist"));
            }
            tracing::debug!(path = %file.display(), "loading configuration file");
            figment = match file.extension().and_then(|e| e.to_str()) {
                Some("toml") => figment.merge(Toml::file(&file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(&file)),
                Some("json") => figment.merge(Json::file(&file)),
                other => exn::bail!(ErrorKind::UnsupportedFormat(other.unwrap_or_default().to_string())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate settings from a prepared provider stack.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let settings: Settings = figment.extract().or_raise(|| ErrorKind::Load)?;
        settings.extract.validate()?;
        Ok(settings)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn load_in(jail: &Jail, name: &str, contents: &str) -> Result<Settings> {
        jail.create_file(name, contents).unwrap();
        Settings::load(Some(Path::new(name)))
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.extract.validate().is_ok());
        assert_eq!(settings.extract.batch_size, 10_000);
        assert_eq!(settings.extract.block_size, 16 * 1024);
        assert_eq!(settings.extract.concurrency, Concurrency::Sync);
        assert!(settings.s3.is_none());
    }

    #[rstest]
    #[case("ferry.toml", "database = \"cache.db\"\n[extract]\nconcurrency = \"multiprocess\"\nworkers = 3\n")]
    #[case("ferry.yaml", "database: cache.db\nextract:\n  concurrency: multiprocess\n  workers: 3\n")]
    #[case("ferry.json", r#"{"database": "cache.db", "extract": {"concurrency": "multiprocess", "workers": 3}}"#)]
    fn test_load_file_formats(#[case] name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            let settings = load_in(jail, name, contents).unwrap();
            assert_eq!(settings.database, PathBuf::from("cache.db"));
            assert_eq!(settings.extract.concurrency, Concurrency::Multiprocess);
            assert_eq!(settings.extract.workers, 3);
            assert_eq!(settings.extract.batch_size, 10_000);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.set_env("FERRY_EXTRACT__BATCH_SIZE", "25");
            jail.set_env("FERRY_EXTRACT__ON_DISK_CHECK", "hash");
            let settings = load_in(jail, "ferry.toml", "[extract]\nbatch_size = 100\n").unwrap();
            assert_eq!(settings.extract.batch_size, 25);
            assert_eq!(settings.extract.on_disk_check, OnDiskCheck::Hash);
            Ok(())
        });
    }

    #[test]
    fn test_s3_section() {
        Jail::expect_with(|jail| {
            let contents = "[s3]\nregion = \"eu-west-1\"\nendpoint = \"http://localhost:9000\"\n";
            let s3 = load_in(jail, "ferry.toml", contents).unwrap().s3.unwrap();
            assert_eq!(s3.region, "eu-west-1");
            assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
            assert!(s3.key_id.is_none());
            Ok(())
        });
    }

    #[rstest]
    #[case("workers = 0")]
    #[case("batch_size = 0")]
    #[case("block_size = 0")]
    fn test_rejects_zero(#[case] line: &str) {
        Jail::expect_with(|jail| {
            let err = load_in(jail, "ferry.toml", &format!("[extract]\n{line}\n")).unwrap_err();
            assert!(matches!(*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_rejects_unknown_enum_value() {
        Jail::expect_with(|jail| {
            let err = load_in(jail, "ferry.toml", "[extract]\nconcurrency = \"threads\"\n").unwrap_err();
            assert_eq!(*err, ErrorKind::Load);
            Ok(())
        });
    }

    #[test]
    fn test_rejects_unknown_extension() {
        Jail::expect_with(|jail| {
            let err = load_in(jail, "ferry.ini", "workers = 1\n").unwrap_err();
            assert_eq!(*err, ErrorKind::UnsupportedFormat("ini".to_string()));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Settings::load(Some(Path::new("/nonexistent/ferry.toml"))).unwrap_err();
        assert!(matches!(*err, ErrorKind::Invalid(_)));
    }
}
