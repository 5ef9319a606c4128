//! # Strix - Multi-Process Web Browser Engine Core
//!
//! The process-split core of a browser engine: a UI-side browser process
//! talking to renderer processes over a binary message channel, in the
//! classic two-process architecture.
//!
//! ## Architecture
//!
//! - **ipc**: framed binary channel, message ids, argument codec,
//!   transports
//! - **messages**: the browser/renderer wire protocol and its payload
//!   types
//! - **browser**: UI-side proxies (context, process, page, frames,
//!   history, drawing surface)
//! - **renderer**: content-side endpoint (process, page, drawing area,
//!   engine boundary)
//! - **utils**: run loop, timer, error types
//!
//! The two halves only ever talk through the channel; nothing is shared.
//! The in-process launcher wires them together on threads for tests and
//! embedding without child processes.

pub mod browser;
pub mod ipc;
pub mod messages;
pub mod renderer;
pub mod utils;

// Re-export main types for convenience
pub use browser::{
    BrowserContext, CallbackResult, InProcessLauncher, PageClient, PageProxy, PolicyDelegate,
    PolicyListener, ProcessProxy,
};
pub use renderer::{DefaultPageEngine, PageEngine, RendererProcess};
pub use utils::error::{Result, StrixError};

/// Engine version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "Strix";
