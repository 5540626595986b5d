//! Message types exchanged over `chrome.runtime` messaging.
//!
//! Every message is a JSON object with a `type` discriminator:
//!
//! 1. The popup sends [`ControlMessage::Start`] / [`ControlMessage::Stop`] for the active tab
//! 2. A helper tab sends [`ControlMessage::Loaded`] once it is ready to acquire the stream
//! 3. The recorder answers with [`Notification::Status`] updates
//! 4. After a helper-tab session is released, [`Notification::CloseTempRecordTab`] asks for the tab to be closed

use serde::{Deserialize, Serialize};

/// Chrome tab identifier.
pub type TabId = i32;

/// Request consumed by the background recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
	/// Start recording the given tab.
	Start {
		#[serde(rename = "tabId")]
		tab_id: TabId,
	},
	/// Stop recording the given tab.
	Stop {
		#[serde(rename = "tabId")]
		tab_id: TabId,
	},
	/// A helper tab is ready; resolve a stream id for `tab_id` and start recording it.
	Loaded {
		#[serde(rename = "tabId")]
		tab_id: TabId,
	},
}

impl ControlMessage {
	/// Returns the tab the message refers to.
	pub fn tab_id(&self) -> TabId {
		match *self {
			Self::Start { tab_id } | Self::Stop { tab_id } | Self::Loaded { tab_id } => tab_id,
		}
	}

	/// Parses a bus message, returning [`None`] for messages addressed to other surfaces.
	///
	/// The runtime bus is shared, so status broadcasts and unrelated messages
	/// show up here too; those are not errors.
	pub fn from_json(value: serde_json::Value) -> Option<Self> {
		serde_json::from_value(value).ok()
	}
}

/// Severity attached to a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
	/// Recording is active.
	Green,
	/// Recording is being finalized.
	Blue,
	/// Something went wrong or the request was rejected.
	Red,
}

/// Message broadcast by the background recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
	/// Human-readable progress or error text.
	Status {
		/// Text shown in the popup.
		text: String,
		/// Severity of the text.
		color: StatusColor,
	},
	/// The helper tab used to acquire a stream is no longer needed.
	CloseTempRecordTab {
		/// Tab that was being recorded.
		#[serde(rename = "tabId")]
		tab_id: TabId,
	},
}

impl Notification {
	/// Builds a [`Notification::Status`].
	pub fn status(text: impl Into<String>, color: StatusColor) -> Self {
		Self::Status {
			text: text.into(),
			color,
		}
	}
}
