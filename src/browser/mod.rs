//! Browser-side (UI process) half of the engine
//!
//! Proxies that stand in for remote renderer state: the context owns the
//! process, the process multiplexes pages, each page mirrors frames,
//! history, editing state, and pixels.

pub mod back_forward;
pub mod context;
pub mod drawing_proxy;
pub mod frame_proxy;
pub mod launcher;
pub mod page_proxy;
pub mod process_proxy;

pub use back_forward::BackForwardList;
pub use context::BrowserContext;
pub use drawing_proxy::{DrawingAreaProxy, Surface};
pub use frame_proxy::{FrameLoadState, FrameProxy};
pub use launcher::{InProcessLauncher, LaunchOptions, ProcessLauncher};
pub use page_proxy::{
    CallbackResult, PageClient, PageProxy, PolicyDelegate, PolicyListener,
};
pub use process_proxy::{
    LaunchPhase, ProcessObserver, ProcessProxy, DEFAULT_RESPONSIVENESS_TIMEOUT,
};
