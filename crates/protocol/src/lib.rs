//! Wire types for the tab recorder message bus.
//!
//! The extension's surfaces (popup, helper tab, background worker) talk to
//! each other through `chrome.runtime` messages. This crate holds the shapes
//! of those messages as they appear on the wire, and nothing else.
//!
//! - [`ControlMessage`] - requests consumed by the background recorder
//! - [`Notification`] - messages the recorder broadcasts back
//! - [`StatusColor`] - severity attached to status text

pub mod message;

pub use message::*;
