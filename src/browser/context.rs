//! Browser context
//!
//! Owns the shared client-side run loop, allocates page ids, and manages
//! the renderer process the context's pages live in. One renderer process
//! per context; pages created while it launches simply queue their traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

use super::launcher::{LaunchOptions, ProcessLauncher};
use super::page_proxy::PageProxy;
use super::process_proxy::{ProcessProxy, DEFAULT_RESPONSIVENESS_TIMEOUT};
use crate::utils::RunLoop;

pub struct BrowserContext {
    run_loop: RunLoop,
    launcher: Arc<dyn ProcessLauncher>,
    launch_options: LaunchOptions,
    responsiveness_timeout: Duration,
    process: Mutex<Option<ProcessProxy>>,
    next_page_id: AtomicU64,
}

impl BrowserContext {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self::with_options(launcher, LaunchOptions::default(), DEFAULT_RESPONSIVENESS_TIMEOUT)
    }

    pub fn with_options(
        launcher: Arc<dyn ProcessLauncher>,
        launch_options: LaunchOptions,
        responsiveness_timeout: Duration,
    ) -> Self {
        Self {
            run_loop: RunLoop::new("strix-browser"),
            launcher,
            launch_options,
            responsiveness_timeout,
            process: Mutex::new(None),
            next_page_id: AtomicU64::new(0),
        }
    }

    /// Create a page backed by this context's renderer process, launching
    /// the process on first use.
    pub fn create_page(&self, width: u32, height: u32) -> PageProxy {
        let process = self.ensure_process();
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("creating page {page_id} ({width}x{height})");
        PageProxy::new(page_id, process, width, height)
    }

    /// The context's renderer process, if one has ever been started.
    pub fn process(&self) -> Option<ProcessProxy> {
        self.process.lock().unwrap().clone()
    }

    /// Kill the renderer process. Pages stay alive and revive it on their
    /// next command.
    pub fn terminate_process(&self) {
        if let Some(process) = self.process() {
            process.terminate();
        }
    }

    fn ensure_process(&self) -> ProcessProxy {
        let mut slot = self.process.lock().unwrap();
        if let Some(process) = slot.as_ref() {
            return process.clone();
        }
        let process = ProcessProxy::launch(
            self.run_loop.clone(),
            Arc::clone(&self.launcher),
            self.launch_options.clone(),
            self.responsiveness_timeout,
        );
        *slot = Some(process.clone());
        process
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::TransportPair;
    use crate::utils::LaunchError;

    struct NeverLauncher;

    impl ProcessLauncher for NeverLauncher {
        fn launch(&self, _options: &LaunchOptions) -> Result<TransportPair, LaunchError> {
            Err(LaunchError::Failed("unavailable".into()))
        }
    }

    #[test]
    fn test_page_ids_are_unique_and_nonzero() {
        let context = BrowserContext::new(Arc::new(NeverLauncher));
        let a = context.create_page(100, 100);
        let b = context.create_page(100, 100);
        assert_ne!(a.page_id(), 0);
        assert_ne!(a.page_id(), b.page_id());
    }

    #[test]
    fn test_process_is_shared_across_pages() {
        let context = BrowserContext::new(Arc::new(NeverLauncher));
        assert!(context.process().is_none());
        let _a = context.create_page(100, 100);
        let _b = context.create_page(100, 100);
        assert!(context.process().is_some());
    }
}
