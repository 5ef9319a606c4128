//! Shared utilities and error types

pub mod error;
pub mod run_loop;
pub mod timer;

pub use error::{DecodeError, IpcError, LaunchError, Result, StrixError};
pub use run_loop::RunLoop;
pub use timer::Timer;
