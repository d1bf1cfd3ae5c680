//! Download orchestration for one API at a time.
//!
//! An [`Extractor`] fetches the stale cached files of an API, extracts the
//! archives among them, and records every resulting artifact as an expected
//! file for the transform stage to pick up.
//!
//! ```no_run
//! use ferry_cache::{Database, Repository};
//! use ferry_config::Settings;
//! use ferry_extractor::Extractor;
//! use ferry_fetch::Fetcher;
//!
//! # async fn example() {
//! let settings = Settings::load(None).unwrap();
//! let db = Database::connect(&settings.database).await.unwrap();
//! let fetcher = Fetcher::from_settings(&settings).unwrap();
//! let extractor = Extractor::new(Repository::from(&db), fetcher, settings.extract);
//! for path in extractor.extract("acme").await.unwrap() {
//!     println!("{}", path.display());
//! }
//! # }
//! ```

pub mod error;
mod orchestrator;
pub mod preprocess;

pub use crate::orchestrator::{ApiRef, Extractor};
