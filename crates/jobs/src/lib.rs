//! The operations Shelf knows how to run: library scans, file organization, catalog
//! imports and external library write-backs.
//!
//! Each job only orchestrates. What a file "means", where it belongs or how an external
//! catalog is spoken to lives behind a collaborator trait ([`FileProcessor`],
//! [`Organizer`], [`CatalogSource`], [`WriteBackClient`]) that the application plugs in.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod import;
mod organize;
mod scan;
mod write_back;

pub use error::{Error, FileIOError};
pub use import::{CatalogEntry, CatalogSource, ImportJob};
pub use organize::{OrganizeJob, OrganizeOutcome, Organizer};
pub use scan::{FileProcessor, MetadataProcessor, ScanJob, ScannedFile};
pub use write_back::{WriteBackClient, WriteBackItem, WriteBackJob};

/// Default extensions a scan picks up.
pub const DEFAULT_EXTENSIONS: [&str; 7] = ["m4b", "mp3", "m4a", "aac", "ogg", "flac", "wma"];

/// Operation kinds, as recorded in the store.
pub mod kind {
	pub const SCAN: &str = "scan";
	pub const ORGANIZE: &str = "organize";
	pub const IMPORT: &str = "import";
	pub const WRITE_BACK: &str = "write_back";
}

fn count(n: usize) -> u64 {
	u64::try_from(n).unwrap_or(u64::MAX)
}
