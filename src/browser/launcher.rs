//! Renderer process launching
//!
//! Launch parameters are an opaque configuration value; this layer hands
//! them to a `ProcessLauncher` implementation and gets back the browser-side
//! transport endpoint once the child is up. The in-process launcher hosts
//! the renderer endpoint on a thread of this process, which is how tests and
//! the demo binary run without spawning real children.

use std::sync::Arc;

use crate::ipc::transport::{self, TransportPair};
use crate::renderer::{PageEngine, RendererProcess};
use crate::utils::LaunchError;

/// Opaque child-process launch parameters. The core never interprets
/// `extras`; launcher implementations may.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: String,
    pub args: Vec<String>,
    pub extras: serde_json::Value,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: String::new(),
            args: Vec::new(),
            extras: serde_json::Value::Null,
        }
    }
}

/// Brings up one renderer process and yields the browser-side transport.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, options: &LaunchOptions) -> Result<TransportPair, LaunchError>;
}

/// Runs the renderer endpoint on a thread inside this process.
pub struct InProcessLauncher {
    engine_factory: Arc<dyn Fn() -> Box<dyn PageEngine> + Send + Sync>,
}

impl InProcessLauncher {
    pub fn new<F>(engine_factory: F) -> Self
    where
        F: Fn() -> Box<dyn PageEngine> + Send + Sync + 'static,
    {
        Self {
            engine_factory: Arc::new(engine_factory),
        }
    }
}

impl ProcessLauncher for InProcessLauncher {
    fn launch(&self, _options: &LaunchOptions) -> Result<TransportPair, LaunchError> {
        let (browser_end, renderer_end) = transport::pair();
        let factory = Arc::clone(&self.engine_factory);
        // The renderer endpoint keeps itself alive through its channel
        // threads; the returned handle can be dropped.
        let _renderer = RendererProcess::run(renderer_end, move || factory());
        Ok(browser_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::DefaultPageEngine;

    #[test]
    fn test_launch_options_default_is_opaque_null() {
        let options = LaunchOptions::default();
        assert!(options.executable.is_empty());
        assert!(options.extras.is_null());
    }

    #[test]
    fn test_in_process_launcher_yields_endpoint() {
        let launcher = InProcessLauncher::new(|| Box::new(DefaultPageEngine::new()));
        let endpoint = launcher.launch(&LaunchOptions::default());
        assert!(endpoint.is_ok());
    }
}
