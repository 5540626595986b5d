//! Recording session manager.
//!
//! [`SessionManager`] owns the registry of live sessions, one per target, and
//! every resource a session holds (capture stream, output writer, encoder).
//! All exits from a session converge on the same release sequence:
//!
//! 1. close the output writer (a failure is logged, never fatal)
//! 2. stop every track of the capture stream
//! 3. drop the registry entry
//!
//! Starting is split in two. [`start`](SessionManager::start) checks and
//! reserves the target synchronously and hands back an [`Acquisition`] future
//! that owns everything it needs; the dispatcher polls it alongside other
//! inputs and feeds the outcome to [`complete_start`](SessionManager::complete_start).
//! A save dialog left open on one tab therefore never stalls another.
//!
//! Every reservation gets a fresh generation. Encoder events carry the
//! generation of the session that produced them, so a released encoder cannot
//! write into, or tear down, a later session on the same target.

use std::collections::HashMap;

use futures_util::future::LocalBoxFuture;
use tabrec_protocol::{Notification, StatusColor};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::TargetId;
use crate::config::{EncoderConfig, derive_encoder_config};
use crate::dispatch::Input;
use crate::error::{RecorderError, Result};
use crate::host::{CaptureSource, CaptureStream, Encoder, Host, OutputWriter, SessionEvents};
use crate::settings::RecorderSettings;
use crate::state::{SessionEvent, SessionState};

#[cfg(test)]
mod tests;

/// Identifies one reservation of a target.
pub type Generation = u64;

/// How a start request obtains its capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
	/// Capture the tab directly.
	Direct,
	/// Resolve a stream id first; the request came from a helper tab.
	HelperTab,
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
	pub target: TargetId,
	pub generation: Generation,
	pub state: SessionState,
	pub started_at_ms: Option<u64>,
	pub config: Option<EncoderConfig>,
	pub chunks_written: u64,
	pub bytes_written: u64,
	pub writer_failed: bool,
}

/// Pending resource acquisition for a reserved target.
pub type Acquisition<H> = LocalBoxFuture<'static, Acquired<H>>;

/// Outcome of an [`Acquisition`], consumed by [`SessionManager::complete_start`].
pub struct Acquired<H: Host> {
	target: TargetId,
	generation: Generation,
	result: Result<(Resources<H>, EncoderConfig)>,
}

impl<H: Host> Acquired<H> {
	pub fn target(&self) -> TargetId {
		self.target
	}
}

struct Resources<H: Host> {
	stream: H::Stream,
	writer: H::Writer,
	encoder: H::Encoder,
}

struct Session<H: Host> {
	generation: Generation,
	state: SessionState,
	mode: StartMode,
	/// A stop or removal arrived while resources were still being acquired.
	stop_pending: bool,
	resources: Option<Resources<H>>,
	config: Option<EncoderConfig>,
	started_at_ms: Option<u64>,
	writer_failed: bool,
	chunks_written: u64,
	bytes_written: u64,
}

impl<H: Host> Session<H> {
	fn reserved(generation: Generation, state: SessionState, mode: StartMode) -> Self {
		Self {
			generation,
			state,
			mode,
			stop_pending: false,
			resources: None,
			config: None,
			started_at_ms: None,
			writer_failed: false,
			chunks_written: 0,
			bytes_written: 0,
		}
	}

	fn summary(&self, target: TargetId) -> SessionSummary {
		SessionSummary {
			target,
			generation: self.generation,
			state: self.state,
			started_at_ms: self.started_at_ms,
			config: self.config,
			chunks_written: self.chunks_written,
			bytes_written: self.bytes_written,
			writer_failed: self.writer_failed,
		}
	}
}

/// Registry of recording sessions keyed by target.
pub struct SessionManager<H: Host> {
	host: H,
	settings: RecorderSettings,
	sessions: HashMap<TargetId, Session<H>>,
	inputs: UnboundedSender<Input>,
	next_generation: Generation,
}

impl<H: Host> SessionManager<H> {
	/// Creates an empty registry. Encoder callbacks are queued on `inputs`.
	pub fn new(host: H, settings: RecorderSettings, inputs: UnboundedSender<Input>) -> Self {
		Self {
			host,
			settings,
			sessions: HashMap::new(),
			inputs,
			next_generation: 1,
		}
	}

	/// Lifecycle state of `target`; [`SessionState::Idle`] when it has no entry.
	pub fn state(&self, target: TargetId) -> SessionState {
		self.sessions.get(&target).map_or(SessionState::Idle, |s| s.state)
	}

	pub fn summary(&self, target: TargetId) -> Option<SessionSummary> {
		self.sessions.get(&target).map(|s| s.summary(target))
	}

	pub fn targets(&self) -> Vec<TargetId> {
		let mut targets: Vec<_> = self.sessions.keys().copied().collect();
		targets.sort_unstable();
		targets
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	/// Reserves `target` for direct tab capture.
	pub fn start(&mut self, target: TargetId) -> Result<Acquisition<H>> {
		self.start_with(target, StartMode::Direct)
	}

	/// Reserves `target` on behalf of a helper tab that has finished loading.
	pub fn loaded(&mut self, target: TargetId) -> Result<Acquisition<H>> {
		self.start_with(target, StartMode::HelperTab)
	}

	/// Reserves `target` and returns the future that acquires its resources.
	///
	/// Fails with [`RecorderError::AlreadyRecording`] when the target already
	/// has an entry, reported as a status line.
	pub fn start_with(&mut self, target: TargetId, mode: StartMode) -> Result<Acquisition<H>> {
		let generation = self.reserve(target, mode).inspect_err(|err| self.report(err))?;
		debug!(target = "tabrec.session", tab = target, generation, ?mode, "target reserved");

		let host = self.host.clone();
		let settings = self.settings.clone();
		let events = SessionEvents::new(target, generation, self.inputs.clone());
		Ok(Box::pin(async move {
			let result = acquire(&host, &settings, target, mode, events).await;
			Acquired {
				target,
				generation,
				result,
			}
		}))
	}

	/// Check and reservation happen together, with no suspension point between them.
	fn reserve(&mut self, target: TargetId, mode: StartMode) -> Result<Generation> {
		let next = self
			.state(target)
			.on(SessionEvent::Reserve)
			.ok_or(RecorderError::AlreadyRecording(target))?;
		let generation = self.next_generation;
		self.next_generation += 1;
		self.sessions.insert(target, Session::reserved(generation, next, mode));
		Ok(generation)
	}

	/// Applies the outcome of an [`Acquisition`].
	///
	/// On success the session becomes active; a stop that arrived during the
	/// acquisition is delivered right after. On failure the reservation is
	/// dropped and the error reported.
	pub async fn complete_start(&mut self, acquired: Acquired<H>) -> Result<()> {
		let Acquired {
			target,
			generation,
			result,
		} = acquired;

		let reserved = self
			.sessions
			.get(&target)
			.is_some_and(|s| s.generation == generation && s.state == SessionState::Starting);
		if !reserved {
			// Only a forced shutdown drops a reservation early.
			debug!(target = "tabrec.session", tab = target, generation, "reservation gone; discarding acquisition");
			if let Ok((resources, _)) = result {
				release(resources).await;
			}
			return Ok(());
		}

		let (resources, config) = match result {
			Ok(acquired) => acquired,
			Err(err) => {
				let state = self.state(target).on(SessionEvent::AcquisitionFailed);
				self.sessions.remove(&target);
				debug!(target = "tabrec.session", tab = target, generation, ?state, "reservation released");
				self.report(&err);
				return Err(err);
			}
		};

		let started_at_ms = self.host.now_ms();
		let mut stop_pending = false;
		if let Some(session) = self.sessions.get_mut(&target) {
			if let Some(next) = session.state.on(SessionEvent::Acquired) {
				session.state = next;
			}
			session.resources = Some(resources);
			session.config = Some(config);
			session.started_at_ms = Some(started_at_ms);
			stop_pending = session.stop_pending;
		}

		info!(
			target = "tabrec.session",
			tab = target,
			generation,
			mime = config.mime_type,
			width = config.width,
			height = config.height,
			video_bps = config.video_bits_per_second,
			"recording started"
		);
		self.host
			.notify(Notification::status(format!("Recording tab {target}"), StatusColor::Green));

		if stop_pending {
			debug!(target = "tabrec.session", tab = target, generation, "delivering stop requested during start");
			self.request_stop(target, true).await;
		}
		Ok(())
	}

	/// Asks the encoder of `target` to finalize.
	///
	/// Returns once the request is made; the release sequence runs when the
	/// encoder reports it has stopped. A stop for a target still acquiring its
	/// resources is held until the acquisition completes.
	pub async fn stop(&mut self, target: TargetId) -> Result<()> {
		if !self.sessions.contains_key(&target) {
			let err = RecorderError::NotRecording(target);
			self.report(&err);
			return Err(err);
		}
		self.request_stop(target, true).await;
		Ok(())
	}

	async fn request_stop(&mut self, target: TargetId, announce: bool) {
		let Some(session) = self.sessions.get_mut(&target) else {
			return;
		};
		if session.state == SessionState::Starting {
			debug!(target = "tabrec.session", tab = target, "stop held until start completes");
			session.stop_pending = true;
			return;
		}
		let Some(next) = session.state.on(SessionEvent::StopRequested) else {
			debug!(target = "tabrec.session", tab = target, state = ?session.state, "stop already in progress");
			return;
		};
		session.state = next;

		let stopped = match session.resources.as_mut() {
			Some(resources) => resources.encoder.stop(),
			None => Ok(()),
		};

		if announce {
			self.host.notify(Notification::status(
				format!("Saving recording of tab {target}..."),
				StatusColor::Blue,
			));
		}

		if let Err(err) = stopped {
			// No stop signal will follow; release now.
			warn!(target = "tabrec.session", tab = target, error = %err, "encoder refused to stop; releasing");
			self.finish(target).await;
		}
	}

	/// Appends one encoded chunk to the output of `target`.
	///
	/// A failed append reports [`RecorderError::WriteFailed`] and drives the
	/// stop sequence; chunks that arrive afterwards are dropped. Chunks from
	/// an earlier session on the same target are dropped too.
	pub async fn on_chunk(&mut self, target: TargetId, generation: Generation, data: Vec<u8>) {
		let Some(session) = self.sessions.get_mut(&target).filter(|s| s.generation == generation) else {
			debug!(target = "tabrec.session", tab = target, generation, len = data.len(), "stale chunk dropped");
			return;
		};
		if !session.state.accepts_chunks() || session.writer_failed {
			debug!(target = "tabrec.session", tab = target, len = data.len(), state = ?session.state, "chunk dropped");
			return;
		}
		let Some(resources) = session.resources.as_mut() else {
			return;
		};

		match resources.writer.write(&data).await {
			Ok(()) => {
				session.chunks_written += 1;
				session.bytes_written += data.len() as u64;
			}
			Err(err) => {
				session.writer_failed = true;
				let err = RecorderError::WriteFailed(err);
				error!(target = "tabrec.session", tab = target, error = %err, "write failed; stopping");
				self.report(&err);
				self.request_stop(target, false).await;
			}
		}
	}

	/// Handles an encoder's stop signal. Signals from an earlier session on the
	/// same target, and duplicates, are ignored.
	pub async fn on_encoder_stopped(&mut self, target: TargetId, generation: Generation) {
		if !self.sessions.get(&target).is_some_and(|s| s.generation == generation) {
			debug!(target = "tabrec.session", tab = target, generation, "stale stop signal ignored");
			return;
		}
		self.finish(target).await;
	}

	/// Runs the release sequence for the current session of `target`.
	async fn finish(&mut self, target: TargetId) {
		let Some(session) = self.sessions.get_mut(&target) else {
			return;
		};
		let Some(next) = session.state.on(SessionEvent::EncoderStopped) else {
			debug!(target = "tabrec.session", tab = target, state = ?session.state, "stop signal ignored");
			return;
		};
		session.state = next;
		let resources = session.resources.take();
		let mode = session.mode;
		let started_at_ms = session.started_at_ms;
		let chunks = session.chunks_written;
		let bytes = session.bytes_written;

		if let Some(resources) = resources {
			release(resources).await;
		}
		self.sessions.remove(&target);

		let duration_ms = started_at_ms.map(|start| self.host.now_ms().saturating_sub(start));
		info!(target = "tabrec.session", tab = target, ?duration_ms, chunks, bytes, "recording released");

		if mode == StartMode::HelperTab && self.settings.close_helper_tab {
			self.host.notify(Notification::CloseTempRecordTab { tab_id: target });
		}
	}

	/// Handles the host tearing down a target. Only live sessions react.
	pub async fn on_target_removed(&mut self, target: TargetId) {
		if self.sessions.contains_key(&target) {
			info!(target = "tabrec.session", tab = target, "recorded tab closed");
			self.request_stop(target, true).await;
		}
	}

	/// Requests a stop for every live session.
	pub async fn stop_all(&mut self) {
		for target in self.targets() {
			self.request_stop(target, true).await;
		}
	}

	/// Releases every remaining session without waiting for encoder signals.
	///
	/// Reservations still acquiring are dropped; their resources are released
	/// when the acquisition completes.
	pub async fn shutdown(&mut self) {
		for target in self.targets() {
			if let Some(resources) = self.sessions.get_mut(&target).and_then(|s| s.resources.as_mut()) {
				if let Err(err) = resources.encoder.stop() {
					debug!(target = "tabrec.session", tab = target, error = %err, "encoder refused to stop during shutdown");
				}
			}
			self.finish(target).await;
		}
		self.sessions.clear();
	}

	fn report(&self, err: &RecorderError) {
		if err.is_silent() {
			debug!(target = "tabrec.session", error = %err, "not surfaced");
			return;
		}
		warn!(target = "tabrec.session", error = %err, "operation failed");
		self.host.notify(Notification::status(err.status_text(), err.status_color()));
	}
}

async fn acquire<H: Host>(
	host: &H,
	settings: &RecorderSettings,
	target: TargetId,
	mode: StartMode,
	events: SessionEvents,
) -> Result<(Resources<H>, EncoderConfig)> {
	let source = match mode {
		StartMode::Direct => CaptureSource::Tab(target),
		StartMode::HelperTab => {
			let stream_id = host
				.resolve_stream_id(target)
				.await
				.map_err(RecorderError::CaptureAcquisitionFailed)?;
			CaptureSource::StreamId { target, stream_id }
		}
	};

	let request = settings.save_request(host.now_ms());
	let destination = match host.choose_destination(&request).await {
		Ok(Some(destination)) => destination,
		Ok(None) => return Err(RecorderError::UserCancelledFileChoice),
		Err(err) => return Err(RecorderError::FileOpenFailed(err)),
	};

	let config = derive_encoder_config(&host.device_profile(), |mime| host.is_type_supported(mime));

	let mut stream = host
		.acquire_stream(&source, &config)
		.await
		.map_err(RecorderError::CaptureAcquisitionFailed)?;

	let mut writer = match host.open_writer(destination).await {
		Ok(writer) => writer,
		Err(err) => {
			stream.stop_tracks();
			return Err(RecorderError::FileOpenFailed(err));
		}
	};

	let encoder = host
		.create_encoder(&stream, &config, events)
		.and_then(|mut encoder| encoder.start(settings.timeslice_ms).map(|()| encoder));
	let encoder = match encoder {
		Ok(encoder) => encoder,
		Err(err) => {
			if let Err(close_err) = writer.close().await {
				warn!(target = "tabrec.session", tab = target, error = %close_err, "closing unused output failed");
			}
			stream.stop_tracks();
			return Err(RecorderError::EncoderStartFailed(err));
		}
	};

	Ok((Resources { stream, writer, encoder }, config))
}

async fn release<H: Host>(resources: Resources<H>) {
	let Resources {
		mut stream,
		mut writer,
		encoder,
	} = resources;

	if let Err(err) = writer.close().await {
		let err = RecorderError::WriteCloseFailed(err);
		error!(target = "tabrec.session", error = %err, "output not closed cleanly");
	}
	stream.stop_tracks();
	drop(encoder);
}
