use shelf_operation_store::{
	LogLevel, OperationId, OperationStatus, OperationStore, StoreError,
};
use tracing::{info, instrument, warn};

pub const INTERRUPTED_MESSAGE: &str = "interrupted by application restart";

/// Reconciles records a previous process left behind.
///
/// The in-memory queue always starts empty, so any record still `queued` or `running`
/// at startup belongs to a dead process. Each one is marked failed with a log entry
/// explaining why; partial progress is never resumed. Must run before the scheduler
/// accepts submissions.
///
/// Only listing the stale records can fail. A record that can't be updated is skipped
/// with a warning and left out of the returned ids, the others are still reconciled.
#[instrument(skip_all, err)]
pub async fn recover_interrupted_operations(
	store: &dyn OperationStore,
) -> Result<Vec<OperationId>, StoreError> {
	let stale = store
		.get_operations_by_status(&[OperationStatus::Queued, OperationStatus::Running])
		.await?;

	let mut recovered = Vec::with_capacity(stale.len());

	for record in stale {
		let details = format!("status before restart: {}", record.status);

		if let Err(e) = store
			.add_operation_log(&record.id, LogLevel::Warn, INTERRUPTED_MESSAGE, Some(&details))
			.await
		{
			warn!(operation_id = %record.id, ?e, "Failed to log interruption of operation;");
		}

		if let Err(e) = store
			.update_operation_status(&record.id, OperationStatus::Failed, INTERRUPTED_MESSAGE)
			.await
		{
			warn!(
				operation_id = %record.id,
				?e,
				"Failed to mark interrupted operation as failed, leaving it as is;"
			);
			continue;
		}

		warn!(
			operation_id = %record.id,
			kind = %record.kind,
			previous_status = %record.status,
			"Marked interrupted operation as failed"
		);

		recovered.push(record.id);
	}

	info!(count = recovered.len(), "Operation recovery finished");

	Ok(recovered)
}
