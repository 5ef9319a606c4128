//! Renderer-side (web process) half of the engine
//!
//! The process endpoint serves the browser's channel, each page drives a
//! content engine and speaks the page protocol, and the chunked drawing
//! area meters pixels back to the browser.

pub mod drawing;
pub mod engine;
pub mod page;
pub mod process;

pub use drawing::ChunkedDrawingArea;
pub use engine::{DefaultPageEngine, LoadedPage, PageEngine};
pub use process::RendererProcess;
