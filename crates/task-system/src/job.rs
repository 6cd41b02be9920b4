use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{error::RunError, interrupter::Interrupter, progress::ProgressReporter};

/// How a job body finished when it didn't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
	Done,
	Canceled,
}

/// Dispatch priority, higher values leave the queue first. Within the same priority,
/// operations are dispatched in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
	pub const LOW: Self = Self(0);
	pub const NORMAL: Self = Self(1);
	pub const HIGH: Self = Self(2);
}

impl Default for Priority {
	fn default() -> Self {
		Self::NORMAL
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			Self::LOW => f.write_str("low"),
			Self::NORMAL => f.write_str("normal"),
			Self::HIGH => f.write_str("high"),
			Self(other) => write!(f, "{other}"),
		}
	}
}

impl FromStr for Priority {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"low" => Ok(Self::LOW),
			"normal" => Ok(Self::NORMAL),
			"high" => Ok(Self::HIGH),
			other => other
				.parse()
				.map(Self)
				.map_err(|_| format!("invalid priority: {other}")),
		}
	}
}

/// A unit of long running work.
///
/// The scheduler knows nothing about what a job does, it only drives this method and
/// classifies its result. Jobs are expected to check the [`Interrupter`] at natural
/// checkpoints and return [`ExecStatus::Canceled`] promptly once a cancel was requested;
/// nothing ever interrupts them preemptively.
#[async_trait]
pub trait Job<E: RunError>: Send + 'static {
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<ExecStatus, E>;
}

pub trait IntoJob<E: RunError> {
	fn into_job(self) -> Box<dyn Job<E>>;
}

impl<T: Job<E>, E: RunError> IntoJob<E> for T {
	fn into_job(self) -> Box<dyn Job<E>> {
		Box::new(self)
	}
}
