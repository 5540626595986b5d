//! Error types for the recording session manager.

use tabrec_protocol::StatusColor;
use thiserror::Error;

use crate::TargetId;

/// Result type alias for recorder operations.
pub type Result<T> = std::result::Result<T, RecorderError>;

/// Failure reported by a host capability (capture, picker, writer, encoder).
///
/// Hosts backed by JavaScript flatten the thrown value into its message; the
/// manager only ever needs the text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
	pub fn new(message: impl Into<String>) -> Self {
		Self(message.into())
	}

	pub fn message(&self) -> &str {
		&self.0
	}
}

impl From<&str> for HostError {
	fn from(message: &str) -> Self {
		Self(message.to_string())
	}
}

impl From<String> for HostError {
	fn from(message: String) -> Self {
		Self(message)
	}
}

/// Errors raised by session operations.
///
/// Every variant is terminal for the operation that raised it. None of them
/// take the manager down; they are surfaced as red status lines, except
/// [`UserCancelledFileChoice`](Self::UserCancelledFileChoice) which is silent
/// and [`WriteCloseFailed`](Self::WriteCloseFailed) which is only logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
	/// A session already exists for the target.
	#[error("tab {0} is already being recorded")]
	AlreadyRecording(TargetId),

	/// The user dismissed the save dialog.
	#[error("file choice cancelled")]
	UserCancelledFileChoice,

	/// The host refused or failed to produce a capture stream.
	#[error("capture failed: {0}")]
	CaptureAcquisitionFailed(HostError),

	/// The destination could not be chosen or opened for writing.
	#[error("could not open output file: {0}")]
	FileOpenFailed(HostError),

	/// The encoder could not be created or started on the stream.
	#[error("encoder failed to start: {0}")]
	EncoderStartFailed(HostError),

	/// Appending an encoded chunk to the output failed.
	#[error("write failed: {0}")]
	WriteFailed(HostError),

	/// Flushing and closing the output failed during teardown.
	#[error("closing output file failed: {0}")]
	WriteCloseFailed(HostError),

	/// No session exists for the target.
	#[error("tab {0} has no recording in progress")]
	NotRecording(TargetId),
}

impl RecorderError {
	/// Returns true when the error must not produce any user-visible status.
	pub fn is_silent(&self) -> bool {
		matches!(self, Self::UserCancelledFileChoice | Self::WriteCloseFailed(_))
	}

	/// Severity used when the error is surfaced as a status line.
	pub fn status_color(&self) -> StatusColor {
		StatusColor::Red
	}

	/// Human-readable status text for the popup.
	pub fn status_text(&self) -> String {
		match self {
			Self::AlreadyRecording(target) => format!("Tab {target} is already being recorded"),
			Self::NotRecording(target) => format!("Tab {target} has no recording in progress"),
			other => format!("Recording failed: {other}"),
		}
	}
}
