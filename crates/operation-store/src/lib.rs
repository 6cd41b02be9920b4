//! Durable records for scheduled operations.
//!
//! Every operation owns one [`OperationRecord`] row and an append-only trail of
//! [`OperationLogEntry`] rows. The scheduler only ever talks to storage through the
//! [`OperationStore`] trait, so the backing engine can be swapped freely: [`SqliteStore`]
//! is what the application uses, [`MemoryStore`] is handy for tests and throwaway runs.

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

use async_trait::async_trait;

mod error;
mod memory;
mod operation;
mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use operation::{LogLevel, OperationId, OperationLogEntry, OperationRecord, OperationStatus};
pub use sqlite::SqliteStore;

/// The persistence boundary of the scheduler.
///
/// Implementations must keep a record's status moving forward only: once a record
/// reaches a terminal status, status, progress and log writes for it are refused with
/// [`StoreError::Finished`].
#[async_trait]
pub trait OperationStore: Send + Sync + 'static {
	async fn create_operation(
		&self,
		id: &OperationId,
		kind: &str,
		target: Option<&str>,
	) -> Result<OperationRecord, StoreError>;

	/// Moves the record to `status`, stamping `started_at` on the first move to running
	/// and `completed_at` on the move to a terminal status.
	async fn update_operation_status(
		&self,
		id: &OperationId,
		status: OperationStatus,
		message: &str,
	) -> Result<(), StoreError>;

	async fn update_operation_progress(
		&self,
		id: &OperationId,
		current: u64,
		total: u64,
		message: &str,
	) -> Result<(), StoreError>;

	async fn add_operation_log(
		&self,
		id: &OperationId,
		level: LogLevel,
		message: &str,
		details: Option<&str>,
	) -> Result<(), StoreError>;

	async fn get_operation_by_id(&self, id: &OperationId) -> Result<OperationRecord, StoreError>;

	/// Newest first.
	async fn get_recent_operations(&self, limit: usize) -> Result<Vec<OperationRecord>, StoreError>;

	/// Log entries in append order. With `tail` only the last `tail` entries are returned.
	async fn get_operation_logs(
		&self,
		id: &OperationId,
		tail: Option<usize>,
	) -> Result<Vec<OperationLogEntry>, StoreError>;

	async fn get_operations_by_status(
		&self,
		statuses: &[OperationStatus],
	) -> Result<Vec<OperationRecord>, StoreError>;
}
