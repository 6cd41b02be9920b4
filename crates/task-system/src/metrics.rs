//! Operation lifecycle metrics, labeled by operation kind.
//!
//! Recording goes through the [`metrics`] facade, so nothing is kept unless the host
//! process installs a recorder (the `shelf` binary installs a Prometheus one).

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use shelf_operation_store::OperationStatus;

pub const OPERATIONS_STARTED: &str = "shelf_operations_started_total";
pub const OPERATIONS_COMPLETED: &str = "shelf_operations_completed_total";
pub const OPERATIONS_FAILED: &str = "shelf_operations_failed_total";
pub const OPERATIONS_CANCELED: &str = "shelf_operations_canceled_total";
pub const OPERATION_DURATION: &str = "shelf_operation_duration_seconds";

/// Bucket bounds for [`OPERATION_DURATION`], from 50ms growing by 1.6x up to about 7s.
pub const OPERATION_DURATION_BUCKETS: [f64; 10] = [
	0.05, 0.08, 0.128, 0.2048, 0.327_68, 0.524_288, 0.838_861, 1.342_177, 2.147_484, 3.435_974,
];

/// Registers help texts with whatever recorder is installed. Call it after installing one.
pub fn describe_metrics() {
	describe_counter!(
		OPERATIONS_STARTED,
		"Total number of operations a worker started, by kind"
	);
	describe_counter!(
		OPERATIONS_COMPLETED,
		"Total number of operations completed successfully, by kind"
	);
	describe_counter!(OPERATIONS_FAILED, "Total number of failed operations, by kind");
	describe_counter!(
		OPERATIONS_CANCELED,
		"Total number of canceled operations, by kind"
	);
	describe_histogram!(
		OPERATION_DURATION,
		Unit::Seconds,
		"Time operations spent on a worker, by kind"
	);
}

pub(crate) fn record_started(kind: &str) {
	counter!(OPERATIONS_STARTED, "kind" => kind.to_owned()).increment(1);
}

/// `elapsed` is `None` for operations that never reached a worker.
pub(crate) fn record_finished(kind: &str, status: OperationStatus, elapsed: Option<Duration>) {
	let name = match status {
		OperationStatus::Completed => OPERATIONS_COMPLETED,
		OperationStatus::Failed => OPERATIONS_FAILED,
		OperationStatus::Canceled => OPERATIONS_CANCELED,
		OperationStatus::Queued | OperationStatus::Running => return,
	};
	counter!(name, "kind" => kind.to_owned()).increment(1);

	if let Some(elapsed) = elapsed {
		histogram!(OPERATION_DURATION, "kind" => kind.to_owned()).record(elapsed.as_secs_f64());
	}
}
