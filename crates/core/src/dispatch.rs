//! Single-consumer input loop in front of the session manager.
//!
//! Control messages, encoder callbacks, and tab removals all arrive on one
//! unbounded channel and are handled strictly one after another. This is what
//! serializes registry access: no input is looked at until the previous one
//! has finished, including its awaits.
//!
//! Resource acquisition for a start is the exception. It waits on the user
//! (save dialog), so it runs as a pending future next to the channel and its
//! outcome is applied as one more serialized step once it resolves.

use futures_util::FutureExt;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tabrec_protocol::ControlMessage;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::TargetId;
use crate::host::Host;
use crate::manager::{Acquired, Acquisition, Generation, SessionManager};
use crate::settings::RecorderSettings;

/// Everything the dispatcher reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
	/// A `start` / `stop` / `loaded` message from the extension bus.
	Control(ControlMessage),
	/// An encoded chunk from the session with the given generation.
	Chunk {
		target: TargetId,
		generation: Generation,
		data: Vec<u8>,
	},
	/// The encoder of the session with the given generation finished.
	EncoderStopped { target: TargetId, generation: Generation },
	/// The host closed a tab.
	TargetRemoved { target: TargetId },
	/// Stop every session, wait for them to drain, then exit [`Dispatcher::run`].
	Shutdown,
}

/// Cloneable sender side used by host listeners.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
	tx: UnboundedSender<Input>,
}

impl DispatchHandle {
	/// Queues an input. Returns false once the dispatcher is gone.
	pub fn send(&self, input: Input) -> bool {
		self.tx.send(input).is_ok()
	}

	pub fn control(&self, message: ControlMessage) -> bool {
		self.send(Input::Control(message))
	}

	/// Parses and queues a raw bus message; unrecognized shapes are dropped.
	pub fn control_json(&self, value: serde_json::Value) -> bool {
		match ControlMessage::from_json(value) {
			Some(message) => self.control(message),
			None => {
				debug!(target = "tabrec.dispatch", "ignoring unrecognized message");
				false
			}
		}
	}

	pub fn target_removed(&self, target: TargetId) -> bool {
		self.send(Input::TargetRemoved { target })
	}

	pub fn shutdown(&self) -> bool {
		self.send(Input::Shutdown)
	}
}

pub struct Dispatcher<H: Host> {
	manager: SessionManager<H>,
	rx: UnboundedReceiver<Input>,
	pending: FuturesUnordered<Acquisition<H>>,
	draining: bool,
}

impl<H: Host> Dispatcher<H> {
	pub fn new(host: H, settings: RecorderSettings) -> (Self, DispatchHandle) {
		let (tx, rx) = mpsc::unbounded_channel();
		let manager = SessionManager::new(host, settings, tx.clone());
		let dispatcher = Self {
			manager,
			rx,
			pending: FuturesUnordered::new(),
			draining: false,
		};
		(dispatcher, DispatchHandle { tx })
	}

	pub fn manager(&self) -> &SessionManager<H> {
		&self.manager
	}

	/// Number of starts still acquiring their resources.
	pub fn pending_starts(&self) -> usize {
		self.pending.len()
	}

	/// Processes inputs until shutdown has drained every session.
	///
	/// The manager holds a sender of its own for encoder callbacks, so the
	/// channel never closes by itself; [`Input::Shutdown`] is the way out.
	pub async fn run(mut self) {
		info!(target = "tabrec.dispatch", "dispatcher running");
		loop {
			tokio::select! {
				biased;
				input = self.rx.recv() => {
					let Some(input) = input else { break };
					self.handle(input).await;
				}
				Some(acquired) = self.pending.next(), if !self.pending.is_empty() => {
					self.complete(acquired).await;
				}
			}
			if self.draining && self.manager.is_empty() && self.pending.is_empty() {
				break;
			}
		}
		self.manager.shutdown().await;
		info!(target = "tabrec.dispatch", "dispatcher stopped");
	}

	/// Handles every queued input and every acquisition that can finish
	/// without waiting, until neither makes progress.
	pub async fn drain(&mut self) {
		loop {
			if let Ok(input) = self.rx.try_recv() {
				self.handle(input).await;
				continue;
			}
			match self.pending.next().now_or_never() {
				Some(Some(acquired)) => self.complete(acquired).await,
				_ => break,
			}
		}
	}

	/// Handles one input.
	pub async fn handle(&mut self, input: Input) {
		match input {
			Input::Control(message) => {
				if self.draining {
					debug!(target = "tabrec.dispatch", tab = message.tab_id(), "shutting down; control message ignored");
					return;
				}
				debug!(target = "tabrec.dispatch", tab = message.tab_id(), ?message, "control message");
				// Failures are already reported as status lines by the manager.
				let started = match message {
					ControlMessage::Start { tab_id } => self.manager.start(tab_id),
					ControlMessage::Loaded { tab_id } => self.manager.loaded(tab_id),
					ControlMessage::Stop { tab_id } => {
						let _ = self.manager.stop(tab_id).await;
						return;
					}
				};
				if let Ok(acquisition) = started {
					self.pending.push(acquisition);
				}
			}
			Input::Chunk { target, generation, data } => self.manager.on_chunk(target, generation, data).await,
			Input::EncoderStopped { target, generation } => self.manager.on_encoder_stopped(target, generation).await,
			Input::TargetRemoved { target } => self.manager.on_target_removed(target).await,
			Input::Shutdown => {
				info!(
					target = "tabrec.dispatch",
					sessions = self.manager.len(),
					pending = self.pending.len(),
					"shutdown requested"
				);
				self.draining = true;
				self.manager.stop_all().await;
			}
		}
	}

	async fn complete(&mut self, acquired: Acquired<H>) {
		debug!(target = "tabrec.dispatch", tab = acquired.target(), "acquisition finished");
		let _ = self.manager.complete_start(acquired).await;
	}
}
