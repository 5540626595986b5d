//! In-memory [`Host`] for exercising the session manager without a browser.
//!
//! [`FakeHost`] is a cheap `Rc` handle: clone it before handing it to the
//! manager and keep the clone to inspect what happened. Every resource it
//! hands out records into the shared log, so tests can check that tracks were
//! stopped and files closed after the manager has dropped them.
//!
//! ```ignore
//! let host = FakeHost::new().with(|b| b.capture_error = Some("Permission denied".into()));
//! let (mut dispatcher, handle) = Dispatcher::new(host.clone(), RecorderSettings::default());
//! handle.control(ControlMessage::Start { tab_id: 1 });
//! dispatcher.drain().await;
//! assert_eq!(host.streams_started(), 0);
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_trait::async_trait;
use tabrec_protocol::Notification;
use tokio::sync::watch;

use crate::TargetId;
use crate::config::{DeviceProfile, EncoderConfig};
use crate::host::{
	CaptureSource, CaptureStream, Encoder, Host, HostResult, OutputWriter, SaveRequest, SessionEvents,
};

/// Knobs controlling how [`FakeHost`] capabilities behave.
#[derive(Debug, Clone)]
pub struct FakeBehavior {
	/// The save dialog reports a cancel.
	pub cancel_choice: bool,
	pub choose_error: Option<String>,
	pub resolve_error: Option<String>,
	pub capture_error: Option<String>,
	pub open_error: Option<String>,
	pub create_encoder_error: Option<String>,
	pub start_encoder_error: Option<String>,
	pub stop_encoder_error: Option<String>,
	/// Writes succeed this many times, then every further write fails.
	pub fail_write_after: Option<usize>,
	pub close_error: Option<String>,
	/// Emitted by the encoder when stopped, before the stop signal.
	pub final_chunk: Option<Vec<u8>>,
	/// Whether a successful encoder stop queues the stop signal.
	pub stop_signals: bool,
	/// Supported encoder identifiers; [`None`] accepts everything.
	pub supported_mimes: Option<Vec<String>>,
	pub profile: DeviceProfile,
}

impl Default for FakeBehavior {
	fn default() -> Self {
		Self {
			cancel_choice: false,
			choose_error: None,
			resolve_error: None,
			capture_error: None,
			open_error: None,
			create_encoder_error: None,
			start_encoder_error: None,
			stop_encoder_error: None,
			fail_write_after: None,
			close_error: None,
			final_chunk: None,
			stop_signals: true,
			supported_mimes: None,
			profile: DeviceProfile {
				memory_tier: Some(8.0),
				physical_width: 1920.0,
				physical_height: 1080.0,
			},
		}
	}
}

/// Contents of one output file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FakeFile {
	pub name: String,
	pub bytes: Vec<u8>,
	pub writes: usize,
	pub closed: bool,
}

#[derive(Debug, Default)]
struct EncoderLog {
	timeslice_ms: Option<u32>,
	stop_calls: u32,
}

#[derive(Default)]
struct FakeState {
	behavior: FakeBehavior,
	now_ms: u64,
	notifications: Vec<Notification>,
	save_requests: Vec<SaveRequest>,
	resolved: Vec<TargetId>,
	sources: Vec<CaptureSource>,
	configs: Vec<EncoderConfig>,
	streams: Vec<Rc<Cell<u32>>>,
	files: Vec<Rc<RefCell<FakeFile>>>,
	encoders: Vec<Rc<RefCell<EncoderLog>>>,
	events: Vec<SessionEvents>,
	dialog_gate: Option<watch::Receiver<bool>>,
}

/// Keeps every save dialog open until [`DialogGate::open`] is called.
/// Dropping the gate lets waiting dialogs through as well.
pub struct DialogGate {
	tx: watch::Sender<bool>,
}

impl DialogGate {
	/// Lets pending and future dialogs resolve.
	pub fn open(&self) {
		let _ = self.tx.send(true);
	}
}

#[derive(Clone, Default)]
pub struct FakeHost {
	state: Rc<RefCell<FakeState>>,
}

impl FakeHost {
	pub fn new() -> Self {
		let host = Self::default();
		host.state.borrow_mut().now_ms = 1_700_000_000_000;
		host
	}

	/// Adjusts the behavior knobs.
	pub fn with(self, configure: impl FnOnce(&mut FakeBehavior)) -> Self {
		configure(&mut self.state.borrow_mut().behavior);
		self
	}

	pub fn set_now(&self, now_ms: u64) {
		self.state.borrow_mut().now_ms = now_ms;
	}

	/// Makes save dialogs wait, as if the user had not answered yet.
	pub fn hold_dialogs(&self) -> DialogGate {
		let (tx, rx) = watch::channel(false);
		self.state.borrow_mut().dialog_gate = Some(rx);
		DialogGate { tx }
	}

	pub fn notifications(&self) -> Vec<Notification> {
		self.state.borrow().notifications.clone()
	}

	/// Status notifications only, in publication order.
	pub fn statuses(&self) -> Vec<Notification> {
		self.notifications()
			.into_iter()
			.filter(|n| matches!(n, Notification::Status { .. }))
			.collect()
	}

	pub fn save_requests(&self) -> Vec<SaveRequest> {
		self.state.borrow().save_requests.clone()
	}

	pub fn resolved_targets(&self) -> Vec<TargetId> {
		self.state.borrow().resolved.clone()
	}

	pub fn capture_sources(&self) -> Vec<CaptureSource> {
		self.state.borrow().sources.clone()
	}

	pub fn encoder_configs(&self) -> Vec<EncoderConfig> {
		self.state.borrow().configs.clone()
	}

	pub fn streams_started(&self) -> usize {
		self.state.borrow().streams.len()
	}

	/// How many times `stop_tracks` ran on the `index`-th stream.
	pub fn stream_stop_calls(&self, index: usize) -> u32 {
		self.state.borrow().streams[index].get()
	}

	pub fn all_streams_stopped(&self) -> bool {
		self.state.borrow().streams.iter().all(|s| s.get() > 0)
	}

	pub fn files_opened(&self) -> usize {
		self.state.borrow().files.len()
	}

	pub fn file(&self, index: usize) -> FakeFile {
		self.state.borrow().files[index].borrow().clone()
	}

	pub fn all_writers_closed(&self) -> bool {
		self.state.borrow().files.iter().all(|f| f.borrow().closed)
	}

	pub fn encoders_created(&self) -> usize {
		self.state.borrow().encoders.len()
	}

	pub fn encoder_timeslice(&self, index: usize) -> Option<u32> {
		self.state.borrow().encoders[index].borrow().timeslice_ms
	}

	pub fn encoder_stop_calls(&self, index: usize) -> u32 {
		self.state.borrow().encoders[index].borrow().stop_calls
	}

	/// Callback handle given to the `index`-th encoder, for emitting chunks.
	pub fn session_events(&self, index: usize) -> SessionEvents {
		self.state.borrow().events[index].clone()
	}

	fn behavior(&self) -> FakeBehavior {
		self.state.borrow().behavior.clone()
	}
}

pub struct FakeStream {
	stops: Rc<Cell<u32>>,
}

impl CaptureStream for FakeStream {
	fn stop_tracks(&mut self) {
		self.stops.set(self.stops.get() + 1);
	}
}

pub struct FakeWriter {
	file: Rc<RefCell<FakeFile>>,
	fail_write_after: Option<usize>,
	close_error: Option<String>,
}

#[async_trait(?Send)]
impl OutputWriter for FakeWriter {
	async fn write(&mut self, chunk: &[u8]) -> HostResult<()> {
		let mut file = self.file.borrow_mut();
		if file.closed {
			return Err("write after close".into());
		}
		if self.fail_write_after.is_some_and(|limit| file.writes >= limit) {
			return Err("QuotaExceededError".into());
		}
		file.bytes.extend_from_slice(chunk);
		file.writes += 1;
		Ok(())
	}

	async fn close(&mut self) -> HostResult<()> {
		self.file.borrow_mut().closed = true;
		match &self.close_error {
			Some(message) => Err(message.clone().into()),
			None => Ok(()),
		}
	}
}

pub struct FakeEncoder {
	events: SessionEvents,
	log: Rc<RefCell<EncoderLog>>,
	start_error: Option<String>,
	stop_error: Option<String>,
	final_chunk: Option<Vec<u8>>,
	stop_signals: bool,
}

impl Encoder for FakeEncoder {
	fn start(&mut self, timeslice_ms: u32) -> HostResult<()> {
		if let Some(message) = &self.start_error {
			return Err(message.clone().into());
		}
		self.log.borrow_mut().timeslice_ms = Some(timeslice_ms);
		Ok(())
	}

	fn stop(&mut self) -> HostResult<()> {
		self.log.borrow_mut().stop_calls += 1;
		if let Some(message) = &self.stop_error {
			return Err(message.clone().into());
		}
		if let Some(chunk) = &self.final_chunk {
			self.events.chunk(chunk.clone());
		}
		if self.stop_signals {
			self.events.stopped();
		}
		Ok(())
	}
}

#[async_trait(?Send)]
impl Host for FakeHost {
	type Destination = String;
	type Stream = FakeStream;
	type Writer = FakeWriter;
	type Encoder = FakeEncoder;

	fn now_ms(&self) -> u64 {
		self.state.borrow().now_ms
	}

	fn device_profile(&self) -> DeviceProfile {
		self.state.borrow().behavior.profile
	}

	fn is_type_supported(&self, mime: &str) -> bool {
		match &self.state.borrow().behavior.supported_mimes {
			Some(list) => list.iter().any(|m| m == mime),
			None => true,
		}
	}

	async fn choose_destination(&self, request: &SaveRequest) -> HostResult<Option<String>> {
		let behavior = self.behavior();
		self.state.borrow_mut().save_requests.push(request.clone());
		let gate = self.state.borrow().dialog_gate.clone();
		if let Some(mut gate) = gate {
			let _ = gate.wait_for(|open| *open).await;
		}
		if let Some(message) = behavior.choose_error {
			return Err(message.into());
		}
		if behavior.cancel_choice {
			return Ok(None);
		}
		Ok(Some(request.suggested_name.clone()))
	}

	async fn resolve_stream_id(&self, target: TargetId) -> HostResult<String> {
		let behavior = self.behavior();
		self.state.borrow_mut().resolved.push(target);
		match behavior.resolve_error {
			Some(message) => Err(message.into()),
			None => Ok(format!("stream-{target}")),
		}
	}

	async fn acquire_stream(&self, source: &CaptureSource, config: &EncoderConfig) -> HostResult<FakeStream> {
		let behavior = self.behavior();
		let mut state = self.state.borrow_mut();
		state.sources.push(source.clone());
		state.configs.push(*config);
		if let Some(message) = behavior.capture_error {
			return Err(message.into());
		}
		let stops = Rc::new(Cell::new(0));
		state.streams.push(stops.clone());
		Ok(FakeStream { stops })
	}

	async fn open_writer(&self, destination: String) -> HostResult<FakeWriter> {
		let behavior = self.behavior();
		if let Some(message) = behavior.open_error {
			return Err(message.into());
		}
		let file = Rc::new(RefCell::new(FakeFile {
			name: destination,
			..FakeFile::default()
		}));
		self.state.borrow_mut().files.push(file.clone());
		Ok(FakeWriter {
			file,
			fail_write_after: behavior.fail_write_after,
			close_error: behavior.close_error,
		})
	}

	fn create_encoder(&self, _stream: &FakeStream, _config: &EncoderConfig, events: SessionEvents) -> HostResult<FakeEncoder> {
		let behavior = self.behavior();
		if let Some(message) = behavior.create_encoder_error {
			return Err(message.into());
		}
		let log = Rc::new(RefCell::new(EncoderLog::default()));
		let mut state = self.state.borrow_mut();
		state.encoders.push(log.clone());
		state.events.push(events.clone());
		Ok(FakeEncoder {
			events,
			log,
			start_error: behavior.start_encoder_error,
			stop_error: behavior.stop_encoder_error,
			final_chunk: behavior.final_chunk,
			stop_signals: behavior.stop_signals,
		})
	}

	fn notify(&self, notification: Notification) {
		self.state.borrow_mut().notifications.push(notification);
	}
}
