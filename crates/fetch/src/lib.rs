//! Fetching remote resources into the local cache.
//!
//! A [`Fetcher`] composes the URL of a [`FetchTask`], hands it to the
//! [`Transport`](transport::Transport) registered for its scheme, and only
//! writes the body when [`requires_update`] says the local copy is stale.
//! Successful downloads are hashed and reported as a [`FetchOutcome`].

mod credentials;
pub mod error;
mod fetcher;
pub mod location;
mod staleness;
pub mod transport;

pub use crate::credentials::Credentials;
pub use crate::fetcher::{FetchOptions, FetchOutcome, FetchTask, Fetcher, TransportHandle};
pub use crate::staleness::requires_update;
