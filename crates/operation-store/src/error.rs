use super::operation::{OperationId, OperationStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("operation not found: <id='{0}'>")]
	NotFound(OperationId),
	#[error("operation already exists: <id='{0}'>")]
	AlreadyExists(OperationId),
	#[error("invalid status transition for operation <id='{id}'>: {from} -> {to}")]
	InvalidTransition {
		id: OperationId,
		from: OperationStatus,
		to: OperationStatus,
	},
	#[error("operation <id='{id}'> already finished with status {status}")]
	Finished {
		id: OperationId,
		status: OperationStatus,
	},
	#[error("corrupted row for operation <id='{id}'>: {reason}")]
	Corrupted { id: String, reason: String },

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("failed to create database directory: {0}")]
	CreateDir(#[from] std::io::Error),
}

impl StoreError {
	/// Checks a status move against the record's current status.
	pub(crate) fn check_transition(
		id: &OperationId,
		from: OperationStatus,
		to: OperationStatus,
	) -> Result<(), Self> {
		if from.is_terminal() {
			Err(Self::Finished {
				id: id.clone(),
				status: from,
			})
		} else if from.can_transition_to(to) {
			Ok(())
		} else {
			Err(Self::InvalidTransition {
				id: id.clone(),
				from,
				to,
			})
		}
	}

	pub(crate) fn check_writable(id: &OperationId, status: OperationStatus) -> Result<(), Self> {
		if status.is_terminal() {
			Err(Self::Finished {
				id: id.clone(),
				status,
			})
		} else {
			Ok(())
		}
	}
}
