//! Session lifecycle state machine.
//!
//! `Idle → Starting → Active → Finalizing → Closed`
//!
//! [`SessionState::on`] is pure: it returns the next state, or [`None`] when the
//! event does not apply to the current state. The manager treats [`None`] as
//! "ignore this event", which is how late or duplicate signals are absorbed.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
	/// No session exists for the target.
	#[default]
	Idle,
	/// Registry slot reserved; resources are being acquired.
	Starting,
	/// Encoder running, chunks are appended to the output.
	Active,
	/// Encoder asked to finalize; waiting for its stop signal.
	Finalizing,
	/// Resources released; the entry is about to leave the registry.
	Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
	/// A start request reserved the target.
	Reserve,
	/// Stream, writer, and encoder are all up.
	Acquired,
	/// Some acquisition step failed; nothing is left running.
	AcquisitionFailed,
	/// Explicit stop, write failure, or target removal.
	StopRequested,
	/// The encoder reported that it stopped.
	EncoderStopped,
}

impl SessionState {
	pub fn on(self, event: SessionEvent) -> Option<SessionState> {
		use SessionEvent::*;
		use SessionState::*;

		match (self, event) {
			(Idle, Reserve) => Some(Starting),
			(Starting, Acquired) => Some(Active),
			(Starting, AcquisitionFailed) => Some(Closed),
			(Active, StopRequested) => Some(Finalizing),
			// The encoder can also stop on its own, e.g. when the tab's stream ends.
			(Active | Finalizing, EncoderStopped) => Some(Closed),
			_ => None,
		}
	}

	/// Returns true while the target is reserved or holding resources.
	pub fn is_live(self) -> bool {
		matches!(self, Self::Starting | Self::Active | Self::Finalizing)
	}

	/// Returns true when encoded chunks may still be appended.
	pub fn accepts_chunks(self) -> bool {
		matches!(self, Self::Active | Self::Finalizing)
	}
}
