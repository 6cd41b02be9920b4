//!
//! # Task System
//!
//! Shelf's Task System runs long maintenance operations (scans, reorganizations, catalog
//! imports, library write-backs) in the background of a single process, while whoever
//! submitted them keeps serving requests.
//!
//! Bring your own unified error type and enqueue some jobs, the system will handle:
//! - Priority ordering, with arrival order breaking ties inside a priority;
//! - A fixed number of workers, bounding how many operations run at once;
//! - Cooperative cancellation through the [`Interrupter`] each job receives;
//! - Persisting progress, log trails and the final outcome of each operation through an
//!   [`OperationStore`](shelf_operation_store::OperationStore);
//! - Isolating failures: a job that errors or panics only fails its own operation;
//! - Graceful shutdown, draining the queue up to a deadline;
//! - Marking operations left behind by a previous process as failed, on startup;
//! - Per kind lifecycle counters and durations through the [`metrics`](mod@metrics) facade.
//!
//! Jobs with many independent items can parallelize them with their own [`FanOut`] pool.
//!
//! ## Basic example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use async_trait::async_trait;
//! use shelf_operation_store::{MemoryStore, OperationId, OperationStatus, OperationStore};
//! use shelf_task_system::{
//!     report_error, ExecStatus, Interrupter, Job, Priority, ProgressReporter, Scheduler,
//!     SchedulerConfig,
//! };
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("sample error")]
//! pub struct SampleError;
//!
//! pub struct HelloJob;
//!
//! #[async_trait]
//! impl Job<SampleError> for HelloJob {
//!     async fn run(
//!         &mut self,
//!         _interrupter: &Interrupter,
//!         progress: &ProgressReporter,
//!     ) -> Result<ExecStatus, SampleError> {
//!         report_error(&progress.update_progress(1, 1, "said hello").await);
//!         Ok(ExecStatus::Done)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let scheduler = Scheduler::<SampleError>::new(store.clone(), SchedulerConfig::default());
//!
//!     let id = OperationId::new();
//!     store.create_operation(&id, "hello", None).await.unwrap();
//!     scheduler.enqueue(id.clone(), "hello", Priority::NORMAL, HelloJob).unwrap();
//!
//!     // Shutdown drains the queue before returning
//!     scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
//!
//!     let record = store.get_operation_by_id(&id).await.unwrap();
//!     assert_eq!(record.status, OperationStatus::Completed);
//!     assert_eq!((record.current, record.total), (1, 1));
//! }
//! ```

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
mod event;
mod fanout;
mod interrupter;
mod job;
pub mod metrics;
mod progress;
mod queue;
mod recovery;
mod system;
mod worker;

pub use error::{report_error, ReportError, RunError, SystemError};
pub use event::OperationEvent;
pub use fanout::{FanOut, FanOutSummary, ItemFailure};
pub use interrupter::{Interrupter, InterrupterFuture};
pub use job::{ExecStatus, IntoJob, Job, Priority};
pub use progress::ProgressReporter;
pub use queue::{ActiveOperation, QueuedOperation};
pub use recovery::{recover_interrupted_operations, INTERRUPTED_MESSAGE};
pub use system::{Scheduler, SchedulerConfig};
