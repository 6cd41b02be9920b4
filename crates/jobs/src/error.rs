use std::{fmt, io, path::Path};

/// Filesystem failure, with the path it happened on.
#[derive(Debug, thiserror::Error)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub maybe_context: Option<&'static str>,
}

impl fmt::Display for FileIOError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "file I/O error")?;
		if let Some(context) = self.maybe_context {
			write!(f, " ({context})")?;
		}
		write!(f, ": {}; path: '{}'", self.source, self.path.display())
	}
}

impl From<(&Path, io::Error)> for FileIOError {
	fn from((path, source): (&Path, io::Error)) -> Self {
		Self {
			path: path.into(),
			source,
			maybe_context: None,
		}
	}
}

impl From<(&Path, io::Error, &'static str)> for FileIOError {
	fn from((path, source, context): (&Path, io::Error, &'static str)) -> Self {
		Self {
			path: path.into(),
			source,
			maybe_context: Some(context),
		}
	}
}

/// Unified error of every job in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("scan root is not a directory: '{}'", .0.display())]
	NotADirectory(Box<Path>),
	#[error("{context}: {reason}")]
	Collaborator {
		context: &'static str,
		reason: String,
	},
	#[error("write-back batch {batch} failed: {source}")]
	WriteBack {
		batch: usize,
		#[source]
		source: Box<Error>,
	},
}

impl Error {
	/// Wraps a failure reported by an external collaborator (catalog client, organizer...).
	pub fn collaborator(context: &'static str, reason: impl fmt::Display) -> Self {
		Self::Collaborator {
			context,
			reason: reason.to_string(),
		}
	}
}
