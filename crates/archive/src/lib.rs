//! Archive handling for downloaded files.
//!
//! [`Format::detect`] picks a decoder in a fixed order: tar (plain or wrapped
//! in gzip/bzip2/xz) → zip → single-stream gzip (by suffix) → single-stream
//! xz/lzma (by suffix). The first match wins.
//!
//! Multi-member formats (tar, zip) support listing ([`Archive::members`]),
//! bulk extraction ([`Archive::extract_all`]) and copying one member to an
//! arbitrary target ([`Archive::extract_member`]). Single-stream formats only
//! support [`Archive::decompress_to`].

pub mod error;
mod extract;
mod format;
mod member;

pub use crate::extract::Archive;
pub use crate::format::Format;
pub use crate::member::{Member, normalize_member_path};
