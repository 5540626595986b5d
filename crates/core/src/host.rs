//! Host capabilities the session manager orchestrates.
//!
//! The manager never touches a browser API directly. Everything it needs
//! (save dialog, tab capture, encoder, incremental file writer, status bus)
//! is reached through [`Host`], which the extension implements on top of the
//! Chrome APIs and the tests implement in memory.
//!
//! All traits are `?Send`: on wasm the implementations wrap JS objects that
//! must stay on the worker's single thread.

use async_trait::async_trait;
use tabrec_protocol::Notification;
use tokio::sync::mpsc::UnboundedSender;

use crate::TargetId;
use crate::config::{DeviceProfile, EncoderConfig};
use crate::dispatch::Input;
use crate::error::HostError;
use crate::manager::Generation;

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Parameters for the save dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
	pub suggested_name: String,
	pub description: String,
	pub mime: String,
	/// Accepted extension including the leading dot.
	pub extension: String,
}

/// How a capture stream is obtained for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
	/// Capture the tab directly.
	Tab(TargetId),
	/// Use a stream id already resolved for the tab (helper-tab flow).
	StreamId { target: TargetId, stream_id: String },
}

impl CaptureSource {
	pub fn target(&self) -> TargetId {
		match self {
			Self::Tab(target) | Self::StreamId { target, .. } => *target,
		}
	}
}

/// A live capture stream.
pub trait CaptureStream {
	/// Stops every track of the stream. Must be safe to call more than once.
	fn stop_tracks(&mut self);
}

/// Encoder bound to a capture stream.
///
/// Encoded data and the final stop are reported through the [`SessionEvents`]
/// handed to [`Host::create_encoder`], never returned from these methods.
pub trait Encoder {
	/// Starts encoding, emitting a chunk every `timeslice_ms`.
	fn start(&mut self, timeslice_ms: u32) -> HostResult<()>;

	/// Asks the encoder to finalize. Completion is signalled later through
	/// [`SessionEvents::stopped`].
	fn stop(&mut self) -> HostResult<()>;
}

/// Incremental writer on the destination file.
#[async_trait(?Send)]
pub trait OutputWriter {
	/// Appends a chunk at the end of the file.
	async fn write(&mut self, chunk: &[u8]) -> HostResult<()>;

	/// Flushes buffered data and closes the file.
	async fn close(&mut self) -> HostResult<()>;
}

/// Cloned into each pending acquisition, so a slow save dialog on one target
/// runs alongside inputs for the others.
#[async_trait(?Send)]
pub trait Host: Clone + 'static {
	type Destination: 'static;
	type Stream: CaptureStream + 'static;
	type Writer: OutputWriter + 'static;
	type Encoder: Encoder + 'static;

	/// Milliseconds since the Unix epoch.
	fn now_ms(&self) -> u64;

	/// Current memory and display capacity.
	fn device_profile(&self) -> DeviceProfile;

	/// Whether the encoder can produce the given container/codec identifier.
	fn is_type_supported(&self, mime: &str) -> bool;

	/// Prompts for a destination file. `Ok(None)` means the user cancelled.
	async fn choose_destination(&self, request: &SaveRequest) -> HostResult<Option<Self::Destination>>;

	/// Resolves a capture stream id for a target (helper-tab flow).
	async fn resolve_stream_id(&self, target: TargetId) -> HostResult<String>;

	/// Acquires a capture stream with the config's size and frame rate as ideal constraints.
	async fn acquire_stream(&self, source: &CaptureSource, config: &EncoderConfig) -> HostResult<Self::Stream>;

	/// Opens an incremental writer on a chosen destination.
	async fn open_writer(&self, destination: Self::Destination) -> HostResult<Self::Writer>;

	/// Creates an encoder bound to `stream`. It must not start emitting before [`Encoder::start`].
	fn create_encoder(&self, stream: &Self::Stream, config: &EncoderConfig, events: SessionEvents) -> HostResult<Self::Encoder>;

	/// Publishes a notification on the extension bus. Observational only.
	fn notify(&self, notification: Notification);
}

/// Callback registration for one session's encoder.
///
/// Cloneable sender tagged with the session's target and generation;
/// everything it reports is queued on the dispatcher's single input channel,
/// so chunk order is the order of the calls. Reports outliving their session
/// are discarded by the manager.
#[derive(Debug, Clone)]
pub struct SessionEvents {
	target: TargetId,
	generation: Generation,
	tx: UnboundedSender<Input>,
}

impl SessionEvents {
	pub(crate) fn new(target: TargetId, generation: Generation, tx: UnboundedSender<Input>) -> Self {
		Self { target, generation, tx }
	}

	pub fn target(&self) -> TargetId {
		self.target
	}

	/// Reports an encoded chunk.
	pub fn chunk(&self, data: Vec<u8>) {
		let _ = self.tx.send(Input::Chunk {
			target: self.target,
			generation: self.generation,
			data,
		});
	}

	/// Reports that the encoder has finished and will emit nothing more.
	pub fn stopped(&self) {
		let _ = self.tx.send(Input::EncoderStopped {
			target: self.target,
			generation: self.generation,
		});
	}
}
