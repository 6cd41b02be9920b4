use chrono::{DateTime, Utc};
use serde::Serialize;
use shelf_operation_store::{LogLevel, OperationId, OperationStatus};

use super::job::Priority;

/// Live notifications about operations, for anyone who'd rather not poll the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationEvent {
	Queued {
		id: OperationId,
		kind: String,
		priority: Priority,
	},
	Started {
		id: OperationId,
		kind: String,
		started_at: DateTime<Utc>,
	},
	Progress {
		id: OperationId,
		current: u64,
		total: u64,
		message: String,
	},
	Log {
		id: OperationId,
		level: LogLevel,
		message: String,
	},
	Finished {
		id: OperationId,
		status: OperationStatus,
		message: String,
	},
}

impl OperationEvent {
	#[must_use]
	pub const fn operation_id(&self) -> &OperationId {
		match self {
			Self::Queued { id, .. }
			| Self::Started { id, .. }
			| Self::Progress { id, .. }
			| Self::Log { id, .. }
			| Self::Finished { id, .. } => id,
		}
	}
}
