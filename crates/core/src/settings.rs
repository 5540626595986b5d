//! Recorder settings.
//!
//! Settings live in `chrome.storage.local` under [`SETTINGS_STORAGE_KEY`] as a
//! camelCase JSON object. Every field is optional in storage; missing fields
//! take their defaults.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::host::SaveRequest;

/// Storage key holding the persisted settings object.
pub const SETTINGS_STORAGE_KEY: &str = "tabrec_settings";

/// Encoder flush interval used when nothing else is configured.
pub const DEFAULT_TIMESLICE_MS: u32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
	/// Interval at which the encoder emits accumulated data.
	pub timeslice_ms: u32,
	/// Leading part of the suggested file name.
	pub file_prefix: String,
	/// Extension of the suggested file name, without the dot.
	pub file_extension: String,
	/// Label of the file type filter in the save dialog.
	pub file_type_description: String,
	/// MIME type accepted by the save dialog filter.
	pub file_mime: String,
	/// Whether helper-tab sessions ask for their tab to be closed once released.
	pub close_helper_tab: bool,
}

impl Default for RecorderSettings {
	fn default() -> Self {
		Self {
			timeslice_ms: DEFAULT_TIMESLICE_MS,
			file_prefix: "recording".to_string(),
			file_extension: "webm".to_string(),
			file_type_description: "WebM Video".to_string(),
			file_mime: "video/webm".to_string(),
			close_helper_tab: true,
		}
	}
}

impl RecorderSettings {
	/// Reads settings from a stored JSON value, falling back to defaults.
	///
	/// `null`/absent storage is the normal first-run case and is not logged.
	pub fn from_stored(value: Option<serde_json::Value>) -> Self {
		let Some(value) = value.filter(|v| !v.is_null()) else {
			return Self::default();
		};

		match serde_json::from_value::<Self>(value) {
			Ok(settings) => settings.sanitized(),
			Err(err) => {
				warn!(target = "tabrec.settings", error = %err, "ignoring malformed settings");
				Self::default()
			}
		}
	}

	fn sanitized(mut self) -> Self {
		if self.timeslice_ms == 0 {
			warn!(target = "tabrec.settings", "timesliceMs must be positive; using default");
			self.timeslice_ms = DEFAULT_TIMESLICE_MS;
		}
		self
	}

	/// Suggested file name for a recording started at `now_ms`.
	pub fn suggested_file_name(&self, now_ms: u64) -> String {
		format!("{}-{}.{}", self.file_prefix, now_ms, self.file_extension)
	}

	/// Save-dialog request for a recording started at `now_ms`.
	pub fn save_request(&self, now_ms: u64) -> SaveRequest {
		SaveRequest {
			suggested_name: self.suggested_file_name(now_ms),
			description: self.file_type_description.clone(),
			mime: self.file_mime.clone(),
			extension: format!(".{}", self.file_extension),
		}
	}
}
