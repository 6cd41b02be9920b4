use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, stable identity of an operation. Callers may bring their own or generate one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
	#[must_use]
	pub fn new() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for OperationId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for OperationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for OperationId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<&str> for OperationId {
	fn from(id: &str) -> Self {
		Self(id.to_owned())
	}
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
	Queued = 0,
	Running = 1,
	Completed = 2,
	Failed = 3,
	Canceled = 4,
}

impl OperationStatus {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Canceled)
	}

	/// Forward-only state machine. Rewriting the same non-terminal status is allowed so
	/// the message can be refreshed.
	#[must_use]
	pub const fn can_transition_to(self, next: Self) -> bool {
		match self {
			Self::Queued => !matches!(next, Self::Completed),
			Self::Running => !matches!(next, Self::Queued),
			Self::Completed | Self::Failed | Self::Canceled => false,
		}
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Queued => "queued",
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Failed => "failed",
			Self::Canceled => "canceled",
		}
	}
}

impl fmt::Display for OperationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl TryFrom<i32> for OperationStatus {
	type Error = i32;

	fn try_from(value: i32) -> Result<Self, Self::Error> {
		let status = match value {
			0 => Self::Queued,
			1 => Self::Running,
			2 => Self::Completed,
			3 => Self::Failed,
			4 => Self::Canceled,
			_ => return Err(value),
		};

		Ok(status)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
}

impl LogLevel {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Debug => "debug",
			Self::Info => "info",
			Self::Warn => "warn",
			Self::Error => "error",
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LogLevel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"debug" => Ok(Self::Debug),
			"info" => Ok(Self::Info),
			"warn" => Ok(Self::Warn),
			"error" => Ok(Self::Error),
			other => Err(format!("unknown log level: {other}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
	pub id: OperationId,
	pub kind: String,
	pub status: OperationStatus,
	pub current: u64,
	/// Advisory, may be revised while the operation runs.
	pub total: u64,
	pub message: String,
	pub target: Option<String>,
	pub error_message: Option<String>,

	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
	pub(crate) fn new(id: OperationId, kind: &str, target: Option<&str>) -> Self {
		let now = Utc::now();
		Self {
			id,
			kind: kind.to_owned(),
			status: OperationStatus::Queued,
			current: 0,
			total: 0,
			message: String::new(),
			target: target.map(ToOwned::to_owned),
			error_message: None,
			created_at: now,
			updated_at: now,
			started_at: None,
			completed_at: None,
		}
	}

	/// Applies an already validated status move.
	pub(crate) fn apply_status(&mut self, status: OperationStatus, message: &str) {
		let now = Utc::now();
		if status == OperationStatus::Running && self.started_at.is_none() {
			self.started_at = Some(now);
		}
		if status.is_terminal() {
			self.completed_at = Some(now);
		}
		if status == OperationStatus::Failed {
			self.error_message = Some(message.to_owned());
		}
		self.status = status;
		message.clone_into(&mut self.message);
		self.updated_at = now;
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLogEntry {
	pub id: i64,
	pub operation_id: OperationId,
	pub level: LogLevel,
	pub message: String,
	pub details: Option<String>,
	pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_only_moves_forward() {
		use OperationStatus::{Canceled, Completed, Failed, Queued, Running};

		assert!(Queued.can_transition_to(Running));
		assert!(Queued.can_transition_to(Canceled));
		assert!(Queued.can_transition_to(Failed));
		assert!(!Queued.can_transition_to(Completed));
		assert!(Running.can_transition_to(Running));
		assert!(Running.can_transition_to(Completed));
		assert!(!Running.can_transition_to(Queued));

		for terminal in [Completed, Failed, Canceled] {
			assert!(terminal.is_terminal());
			for next in [Queued, Running, Completed, Failed, Canceled] {
				assert!(!terminal.can_transition_to(next));
			}
		}
	}

	#[test]
	fn status_roundtrips_through_its_integer_form() {
		for status in [
			OperationStatus::Queued,
			OperationStatus::Running,
			OperationStatus::Completed,
			OperationStatus::Failed,
			OperationStatus::Canceled,
		] {
			assert_eq!(OperationStatus::try_from(status as i32), Ok(status));
		}
		assert_eq!(OperationStatus::try_from(42), Err(42));
	}
}
