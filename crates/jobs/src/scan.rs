use std::{
	collections::HashSet,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_operation_store::LogLevel;
use shelf_task_system::{
	check_interruption, report_error, ExecStatus, FanOut, Interrupter, Job, ProgressReporter,
};
use tokio::fs;
use tracing::{debug, instrument, trace};

use crate::{
	count,
	error::{Error, FileIOError},
	DEFAULT_EXTENSIONS,
};

/// What a scan learned about one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
	pub path: PathBuf,
	pub size: u64,
	pub extension: String,
}

/// Turns a discovered file into library knowledge. Called concurrently from the scan's
/// fan-out sub-workers.
#[async_trait]
pub trait FileProcessor: Send + Sync + 'static {
	async fn process(&self, path: &Path) -> Result<ScannedFile, Error>;
}

/// Only reads filesystem metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataProcessor;

#[async_trait]
impl FileProcessor for MetadataProcessor {
	async fn process(&self, path: &Path) -> Result<ScannedFile, Error> {
		let metadata = fs::metadata(path)
			.await
			.map_err(|e| FileIOError::from((path, e, "Failed to read file metadata")))?;

		Ok(ScannedFile {
			path: path.to_path_buf(),
			size: metadata.len(),
			extension: normalized_extension(path).unwrap_or_default(),
		})
	}
}

/// Walks a directory tree and feeds every supported file to a [`FileProcessor`].
pub struct ScanJob {
	root: PathBuf,
	extensions: HashSet<String>,
	fanout_workers: usize,
	processor: Arc<dyn FileProcessor>,
}

impl ScanJob {
	pub fn new(root: impl Into<PathBuf>, processor: Arc<dyn FileProcessor>) -> Self {
		Self {
			root: root.into(),
			extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
			fanout_workers: 4,
			processor,
		}
	}

	/// Extensions are matched case-insensitively, with or without a leading dot.
	#[must_use]
	pub fn with_extensions<S: AsRef<str>>(
		mut self,
		extensions: impl IntoIterator<Item = S>,
	) -> Self {
		self.extensions = extensions
			.into_iter()
			.map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
			.filter(|ext| !ext.is_empty())
			.collect();
		self
	}

	#[must_use]
	pub const fn with_fanout_workers(mut self, workers: usize) -> Self {
		self.fanout_workers = workers;
		self
	}

	fn is_supported(&self, path: &Path) -> bool {
		normalized_extension(path).is_some_and(|ext| self.extensions.contains(&ext))
	}

	/// Collects supported files under the root. `Ok(None)` means the walk was canceled.
	async fn discover(
		&self,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<Option<Vec<PathBuf>>, Error> {
		let mut files = Vec::new();
		let mut visited = HashSet::new();
		let mut pending = vec![self.root.clone()];

		while let Some(dir) = pending.pop() {
			if interrupter.is_canceled() {
				return Ok(None);
			}

			let is_root = dir == self.root;

			let listing = match read_directory(&dir).await {
				Ok(listing) => listing,
				Err(e) if is_root => return Err(e.into()),
				Err(e) => {
					report_error(&progress.log(LogLevel::Warn, e.to_string(), None).await);
					continue;
				}
			};

			// Symlinked directories can point back up the tree
			if !visited.insert(listing.canonical) {
				debug!(dir = %dir.display(), "Directory already visited, skipping");
				continue;
			}

			for (path, is_dir) in listing.entries {
				if is_dir {
					pending.push(path);
				} else if self.is_supported(&path) {
					trace!(file = %path.display(), "Found supported file");
					files.push(path);
				}
			}
		}

		files.sort();

		Ok(Some(files))
	}
}

#[async_trait]
impl Job<Error> for ScanJob {
	#[instrument(skip_all, fields(root = %self.root.display()), err)]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<ExecStatus, Error> {
		let root_metadata = fs::metadata(&self.root)
			.await
			.map_err(|e| FileIOError::from((self.root.as_path(), e, "Failed to read scan root")))?;
		if !root_metadata.is_dir() {
			return Err(Error::NotADirectory(self.root.as_path().into()));
		}

		report_error(
			&progress
				.log(
					LogLevel::Info,
					format!("scanning {}", self.root.display()),
					None,
				)
				.await,
		);

		let Some(files) = self.discover(interrupter, progress).await? else {
			return Ok(ExecStatus::Canceled);
		};
		let total = count(files.len());

		report_error(
			&progress
				.update_progress(0, total, format!("found {total} files"))
				.await,
		);

		check_interruption!(interrupter);

		let processor = Arc::clone(&self.processor);
		let summary = FanOut::new(self.fanout_workers)
			.with_label("files")
			.run(
				files.iter().cloned(),
				total,
				interrupter,
				progress,
				move |path: PathBuf| {
					let processor = Arc::clone(&processor);
					async move { processor.process(&path).await }
				},
			)
			.await;

		for (index, failure) in &summary.failures {
			report_error(
				&progress
					.log(
						LogLevel::Warn,
						format!("failed to process {}", files[*index].display()),
						Some(&failure.to_string()),
					)
					.await,
			);
		}

		if summary.canceled {
			return Ok(ExecStatus::Canceled);
		}

		report_error(
			&progress
				.log(
					LogLevel::Info,
					format!(
						"scan finished: {} files processed, {} failed",
						summary.outputs.len(),
						summary.failures.len()
					),
					None,
				)
				.await,
		);

		Ok(ExecStatus::Done)
	}
}

struct Listing {
	canonical: PathBuf,
	entries: Vec<(PathBuf, bool)>,
}

async fn read_directory(dir: &Path) -> Result<Listing, FileIOError> {
	let canonical = fs::canonicalize(dir)
		.await
		.map_err(|e| FileIOError::from((dir, e, "Failed to resolve directory")))?;

	let mut read_dir = fs::read_dir(dir)
		.await
		.map_err(|e| FileIOError::from((dir, e, "Failed to read directory")))?;

	let mut entries = Vec::new();
	while let Some(entry) = read_dir
		.next_entry()
		.await
		.map_err(|e| FileIOError::from((dir, e, "Failed to read directory entry")))?
	{
		let path = entry.path();
		// Follows symlinks, a dangling one is just skipped
		match fs::metadata(&path).await {
			Ok(metadata) => entries.push((path, metadata.is_dir())),
			Err(e) => trace!(path = %path.display(), %e, "Skipping unreadable entry"),
		}
	}

	Ok(Listing { canonical, entries })
}

fn normalized_extension(path: &Path) -> Option<String> {
	path.extension()
		.and_then(|ext| ext.to_str())
		.map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extensions_are_normalized() {
		let job = ScanJob::new("/library", Arc::new(MetadataProcessor))
			.with_extensions([".MP3", "m4b", ""]);

		assert!(job.is_supported(Path::new("/library/a/Book.mp3")));
		assert!(job.is_supported(Path::new("/library/a/Book.M4B")));
		assert!(!job.is_supported(Path::new("/library/a/cover.jpg")));
		assert!(!job.is_supported(Path::new("/library/a/README")));
	}
}
