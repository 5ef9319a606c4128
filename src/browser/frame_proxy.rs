//! Frame proxy
//!
//! Browser-side mirror of one frame in the remote page. Created on the
//! renderer's first frame-creation notification; invalidated wholesale
//! when the owning process dies.

use crate::messages::LoadError;

/// Load progress of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLoadState {
    /// A load was started but nothing committed yet.
    Provisional,
    /// The new document replaced the old one.
    Committed,
    /// The load finished (successfully or not).
    Finished,
}

/// Mirrored state of a remote frame.
#[derive(Debug, Clone)]
pub struct FrameProxy {
    frame_id: u64,
    parent_frame_id: Option<u64>,
    load_state: FrameLoadState,
    provisional_url: Option<String>,
    url: Option<String>,
    title: Option<String>,
}

impl FrameProxy {
    pub fn new(frame_id: u64, parent_frame_id: Option<u64>) -> Self {
        Self {
            frame_id,
            parent_frame_id,
            load_state: FrameLoadState::Finished,
            provisional_url: None,
            url: None,
            title: None,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn parent_frame_id(&self) -> Option<u64> {
        self.parent_frame_id
    }

    pub fn is_main_frame(&self) -> bool {
        self.parent_frame_id.is_none()
    }

    pub fn load_state(&self) -> FrameLoadState {
        self.load_state
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn provisional_url(&self) -> Option<&str> {
        self.provisional_url.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn did_start_provisional_load(&mut self, url: &str) {
        self.load_state = FrameLoadState::Provisional;
        self.provisional_url = Some(url.to_string());
    }

    pub fn did_commit_load(&mut self, url: &str) {
        self.load_state = FrameLoadState::Committed;
        self.url = Some(url.to_string());
        self.provisional_url = None;
        // Title belongs to the old document until the new one supplies one.
        self.title = None;
    }

    pub fn did_finish_load(&mut self) {
        self.load_state = FrameLoadState::Finished;
    }

    pub fn did_fail_load(&mut self, _error: &LoadError) {
        // A failed provisional load leaves the committed document in place.
        self.provisional_url = None;
        self.load_state = FrameLoadState::Finished;
    }

    pub fn did_receive_title(&mut self, title: &str) {
        self.title = Some(title.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_state_progression() {
        let mut frame = FrameProxy::new(1, None);
        assert!(frame.is_main_frame());
        assert_eq!(frame.load_state(), FrameLoadState::Finished);

        frame.did_start_provisional_load("https://example.test/");
        assert_eq!(frame.load_state(), FrameLoadState::Provisional);
        assert_eq!(frame.provisional_url(), Some("https://example.test/"));
        assert_eq!(frame.url(), None);

        frame.did_commit_load("https://example.test/");
        assert_eq!(frame.load_state(), FrameLoadState::Committed);
        assert_eq!(frame.url(), Some("https://example.test/"));
        assert_eq!(frame.provisional_url(), None);

        frame.did_finish_load();
        assert_eq!(frame.load_state(), FrameLoadState::Finished);
    }

    #[test]
    fn test_failed_provisional_load_keeps_committed_url() {
        let mut frame = FrameProxy::new(1, None);
        frame.did_start_provisional_load("https://a.test/");
        frame.did_commit_load("https://a.test/");
        frame.did_finish_load();

        frame.did_start_provisional_load("https://unreachable.test/");
        frame.did_fail_load(&LoadError {
            code: -1001,
            description: "cannot reach host".into(),
            url: "https://unreachable.test/".into(),
        });
        assert_eq!(frame.url(), Some("https://a.test/"));
        assert_eq!(frame.provisional_url(), None);
        assert_eq!(frame.load_state(), FrameLoadState::Finished);
    }

    #[test]
    fn test_commit_clears_stale_title() {
        let mut frame = FrameProxy::new(2, Some(1));
        assert!(!frame.is_main_frame());
        frame.did_commit_load("https://a.test/");
        frame.did_receive_title("First");
        assert_eq!(frame.title(), Some("First"));
        frame.did_commit_load("https://b.test/");
        assert_eq!(frame.title(), None);
    }
}
