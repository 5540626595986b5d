//! Recording session manager for the tab recorder extension.
//!
//! Records a browser tab's audio and video straight to a user-chosen file.
//! Encoded chunks are appended as they are produced, so memory use stays flat
//! no matter how long the recording runs.
//!
//! # Overview
//!
//! - [`Dispatcher`] owns the [`SessionManager`] and feeds it one [`Input`] at a time
//! - [`SessionManager`] keeps at most one session per tab and releases every
//!   resource a session holds on each exit path
//! - [`Host`] is the seam to the browser: the extension implements it over
//!   the Chrome APIs, [`testing::FakeHost`] implements it in memory
//! - [`derive_encoder_config`] picks resolution, bitrates, and codec from the
//!   device's memory and display
//!
//! # Example
//!
//! ```ignore
//! use tabrec::{Dispatcher, RecorderSettings};
//! use tabrec_protocol::ControlMessage;
//!
//! let (dispatcher, handle) = Dispatcher::new(host, RecorderSettings::default());
//! wasm_bindgen_futures::spawn_local(dispatcher.run());
//! handle.control(ControlMessage::Start { tab_id: 42 });
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod manager;
pub mod settings;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Identifier of a recordable tab.
pub type TargetId = tabrec_protocol::TabId;

pub use config::{DeviceProfile, EncoderConfig, derive_encoder_config, select_mime_type};
pub use dispatch::{DispatchHandle, Dispatcher, Input};
pub use error::{HostError, RecorderError, Result};
pub use host::{CaptureSource, CaptureStream, Encoder, Host, HostResult, OutputWriter, SaveRequest, SessionEvents};
pub use manager::{Acquired, Acquisition, Generation, SessionManager, SessionSummary, StartMode};
pub use settings::{RecorderSettings, SETTINGS_STORAGE_KEY};
pub use state::SessionState;
