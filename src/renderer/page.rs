//! Renderer-side page
//!
//! Drives the content engine and speaks the page half of the protocol:
//! announces frames, runs every navigation through a policy round-trip,
//! owns the session history (item ids are minted here, the browser only
//! mirrors them), answers one-shot callbacks, and paints through the
//! chunked drawing area on a coalescing timer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use url::Url;

use super::drawing::ChunkedDrawingArea;
use super::engine::PageEngine;
use super::process::IdAllocator;
use crate::ipc::{Channel, Decoder, Encoder, MessageId};
use crate::messages::{
    BackForwardItemData, DrawingHostKind, KeyEventData, KeyEventKind, LoadError, MouseEventData,
    NavigationType, PageHostKind, PageKind, PolicyAction, ProcessHostKind, UpdateChunk,
};
use crate::utils::DecodeError;

/// Paint passes triggered close together fold into one display.
pub(crate) const DISPLAY_COALESCE_DELAY: Duration = Duration::from_millis(8);

/// Error code reported when policy rejects a navigation.
const NAVIGATION_CANCELLED: i32 = -999;

/// How a committed navigation relates to the session history.
enum HistoryDisposition {
    /// Fresh load: mint a new item, truncate the forward tail.
    NewItem,
    /// Revisit an existing item.
    GoToItem(u64),
    /// Stay on the current item.
    CurrentItem,
}

struct PendingNavigation {
    url: Url,
    disposition: HistoryDisposition,
}

pub(crate) struct RendererPage {
    page_id: u64,
    channel: Channel,
    ids: Arc<IdAllocator>,
    engine: Box<dyn PageEngine>,
    main_frame_id: Option<u64>,
    /// listener id -> the navigation awaiting the browser's decision.
    pending_policies: HashMap<u64, PendingNavigation>,
    /// (item id, url), oldest first. The canonical copies live here; the
    /// browser mirrors ids and data but never mutates them.
    session_history: Vec<(u64, String)>,
    current_item: Option<usize>,
    live_edit_commands: HashSet<u64>,
    drawing: ChunkedDrawingArea,
    page_zoom: f64,
    text_zoom: f64,
}

impl RendererPage {
    pub(crate) fn new(
        page_id: u64,
        channel: Channel,
        ids: Arc<IdAllocator>,
        engine: Box<dyn PageEngine>,
        width: u32,
        height: u32,
    ) -> Self {
        let mut page = Self {
            page_id,
            channel,
            ids,
            engine,
            main_frame_id: None,
            pending_policies: HashMap::new(),
            session_history: Vec::new(),
            current_item: None,
            live_edit_commands: HashSet::new(),
            drawing: ChunkedDrawingArea::new(width, height),
            page_zoom: 1.0,
            text_zoom: 1.0,
        };
        // The main frame exists from birth.
        let frame_id = page.ids.next_frame_id();
        page.main_frame_id = Some(frame_id);
        let mut arguments = Encoder::new();
        arguments.write_u64(frame_id);
        page.send_host(PageHostKind::DidCreateMainFrame, arguments);
        page
    }

    /// Dispatch one decoded-on-demand page message. Malformed payloads
    /// surface as errors the process logs and drops.
    pub(crate) fn handle_page_message(
        &mut self,
        kind: PageKind,
        decoder: &mut Decoder<'_>,
    ) -> Result<bool, DecodeError> {
        let mut schedule = false;
        match kind {
            PageKind::LoadUrl => {
                let url = decoder.read_str()?;
                self.load_url(&url);
            }
            PageKind::StopLoading => self.stop_loading(),
            PageKind::Reload => self.reload(),
            PageKind::GoToBackForwardItem => {
                let item_id = decoder.read_u64()?;
                self.go_to_back_forward_item(item_id);
            }
            PageKind::DidReceivePolicyDecision => {
                let listener_id = decoder.read_u64()?;
                let action = decoder.decode::<PolicyAction>()?;
                self.did_receive_policy_decision(listener_id, action);
            }
            PageKind::RunJavaScript => {
                let script = decoder.read_str()?;
                let callback_id = decoder.read_u64()?;
                let result = self.engine.evaluate(&script);
                self.send_callback(PageHostKind::ScriptValueCallback, callback_id, result);
            }
            PageKind::GetSourceForFrame => {
                let frame_id = decoder.read_u64()?;
                let callback_id = decoder.read_u64()?;
                let result = if self.main_frame_id == Some(frame_id) {
                    self.engine.document_source()
                } else {
                    None
                };
                self.send_callback(PageHostKind::SourceCallback, callback_id, result);
            }
            PageKind::GetRenderTree => {
                let callback_id = decoder.read_u64()?;
                let result = self.engine.render_tree();
                self.send_callback(PageHostKind::RenderTreeCallback, callback_id, result);
            }
            PageKind::SetPageZoom => {
                self.page_zoom = decoder.read_f64()?;
                schedule = self.drawing.set_needs_display_in_entire_area();
            }
            PageKind::SetTextZoom => {
                self.text_zoom = decoder.read_f64()?;
                schedule = self.drawing.set_needs_display_in_entire_area();
            }
            PageKind::MouseEvent => {
                let event = decoder.decode::<MouseEventData>()?;
                if !event.is_passive() {
                    debug!("page {}: mouse {:?} at {},{}", self.page_id, event.kind, event.x, event.y);
                }
            }
            PageKind::KeyEvent => {
                let event = decoder.decode::<KeyEventData>()?;
                schedule = self.key_event(&event);
            }
            PageKind::UnapplyEditCommand => {
                let command_id = decoder.read_u64()?;
                if !self.live_edit_commands.contains(&command_id) {
                    debug!("unapply of unknown edit command {command_id}");
                }
            }
            PageKind::ReapplyEditCommand => {
                let command_id = decoder.read_u64()?;
                if !self.live_edit_commands.contains(&command_id) {
                    debug!("reapply of unknown edit command {command_id}");
                }
            }
        }
        Ok(schedule)
    }

    // -- navigation ------------------------------------------------------

    fn load_url(&mut self, url: &str) {
        match Url::parse(url) {
            Ok(url) => self.begin_navigation(url, NavigationType::Other, HistoryDisposition::NewItem),
            // The browser validates before sending; anything else is peer
            // damage worth logging, not a protocol fault.
            Err(_) => warn!("page {}: unparseable load url {url:?}", self.page_id),
        }
    }

    fn reload(&mut self) {
        let Some(index) = self.current_item else {
            return;
        };
        let url = self.session_history[index].1.clone();
        match Url::parse(&url) {
            Ok(url) => {
                self.begin_navigation(url, NavigationType::Reload, HistoryDisposition::CurrentItem)
            }
            Err(_) => warn!("page {}: corrupt history url {url:?}", self.page_id),
        }
    }

    fn go_to_back_forward_item(&mut self, item_id: u64) {
        let Some((_, url)) = self
            .session_history
            .iter()
            .find(|(id, _)| *id == item_id)
            .cloned()
        else {
            debug!("page {}: unknown history item {item_id}", self.page_id);
            return;
        };
        match Url::parse(&url) {
            Ok(url) => self.begin_navigation(
                url,
                NavigationType::BackForward,
                HistoryDisposition::GoToItem(item_id),
            ),
            Err(_) => warn!("page {}: corrupt history url {url:?}", self.page_id),
        }
    }

    /// Announce the provisional load and ask the browser for a policy
    /// decision; the navigation parks until the answer arrives.
    fn begin_navigation(
        &mut self,
        url: Url,
        navigation_type: NavigationType,
        disposition: HistoryDisposition,
    ) {
        let frame_id = self.main_frame();
        let mut arguments = Encoder::new();
        arguments.write_u64(frame_id);
        arguments.write_str(url.as_str());
        self.send_host(PageHostKind::DidStartProvisionalLoad, arguments);

        let listener_id = self.ids.next_listener_id();
        self.pending_policies.insert(
            listener_id,
            PendingNavigation { url: url.clone(), disposition },
        );
        let mut arguments = Encoder::new();
        arguments.write_u64(frame_id);
        arguments.write_u64(listener_id);
        arguments.write_str(url.as_str());
        arguments.encode(&navigation_type);
        self.send_host(PageHostKind::DecidePolicyForNavigationAction, arguments);
    }

    fn stop_loading(&mut self) {
        let cancelled: Vec<PendingNavigation> =
            self.pending_policies.drain().map(|(_, nav)| nav).collect();
        for navigation in &cancelled {
            self.fail_navigation(navigation, "load cancelled");
        }
    }

    fn did_receive_policy_decision(&mut self, listener_id: u64, action: PolicyAction) {
        let Some(navigation) = self.pending_policies.remove(&listener_id) else {
            // Stopped or superseded before the browser answered.
            debug!("page {}: decision for dead listener {listener_id}", self.page_id);
            return;
        };
        match action {
            PolicyAction::Use => self.commit_navigation(navigation),
            PolicyAction::Download => {
                info!("page {}: download of {} not handled here", self.page_id, navigation.url);
                self.fail_navigation(&navigation, "navigation became a download");
            }
            PolicyAction::Ignore => self.fail_navigation(&navigation, "navigation ignored by policy"),
        }
    }

    fn fail_navigation(&mut self, navigation: &PendingNavigation, description: &str) {
        let frame_id = self.main_frame();
        let error = LoadError {
            code: NAVIGATION_CANCELLED,
            description: description.into(),
            url: navigation.url.to_string(),
        };
        let mut arguments = Encoder::new();
        arguments.write_u64(frame_id);
        arguments.encode(&error);
        self.send_host(PageHostKind::DidFailLoad, arguments);
    }

    fn commit_navigation(&mut self, navigation: PendingNavigation) {
        let frame_id = self.main_frame();
        let loaded = match self.engine.load(&navigation.url) {
            Ok(loaded) => loaded,
            Err(error) => {
                let mut arguments = Encoder::new();
                arguments.write_u64(frame_id);
                arguments.encode(&error);
                self.send_host(PageHostKind::DidFailLoad, arguments);
                return;
            }
        };

        let mut arguments = Encoder::new();
        arguments.write_u64(frame_id);
        arguments.write_str(&loaded.url);
        self.send_host(PageHostKind::DidCommitLoad, arguments);

        // A committed navigation obsoletes the document's edit commands.
        if !self.live_edit_commands.is_empty() {
            self.live_edit_commands.clear();
            self.send_host(PageHostKind::ClearAllEditCommands, Encoder::new());
        }

        self.update_session_history(&navigation.disposition, &loaded.url, &loaded.title);

        let mut arguments = Encoder::new();
        arguments.write_u64(frame_id);
        arguments.write_str(&loaded.title);
        self.send_host(PageHostKind::DidReceiveTitle, arguments);

        let mut arguments = Encoder::new();
        arguments.write_u64(frame_id);
        self.send_host(PageHostKind::DidFinishLoad, arguments);

        if self.drawing.set_needs_display_in_entire_area() {
            self.display();
        }
    }

    fn update_session_history(&mut self, disposition: &HistoryDisposition, url: &str, title: &str) {
        match disposition {
            HistoryDisposition::NewItem => {
                if let Some(index) = self.current_item {
                    self.session_history.truncate(index + 1);
                }
                let item_id = self.ids.next_item_id();
                self.session_history.push((item_id, url.to_owned()));
                self.current_item = Some(self.session_history.len() - 1);

                let item = BackForwardItemData {
                    item_id,
                    original_url: url.to_owned(),
                    url: url.to_owned(),
                    title: title.to_owned(),
                };
                let mut arguments = Encoder::new();
                arguments.write_u64(self.page_id);
                arguments.encode(&item);
                self.send_process_host(ProcessHostKind::AddBackForwardItem, arguments);
            }
            HistoryDisposition::GoToItem(item_id) => {
                self.current_item = self
                    .session_history
                    .iter()
                    .position(|(id, _)| id == item_id);
                let mut arguments = Encoder::new();
                arguments.write_u64(self.page_id);
                arguments.write_u64(*item_id);
                self.send_process_host(ProcessHostKind::WentToBackForwardItem, arguments);
            }
            HistoryDisposition::CurrentItem => {
                if let Some(index) = self.current_item {
                    let item_id = self.session_history[index].0;
                    let mut arguments = Encoder::new();
                    arguments.write_u64(self.page_id);
                    arguments.write_u64(item_id);
                    self.send_process_host(ProcessHostKind::WentToBackForwardItem, arguments);
                }
            }
        }
    }

    // -- input and editing -----------------------------------------------

    /// Key input with text is an undoable edit in the default engine.
    /// Returns whether a display pass should be scheduled.
    fn key_event(&mut self, event: &KeyEventData) -> bool {
        if event.kind != KeyEventKind::Down || event.text.is_empty() {
            return false;
        }
        let command_id = self.ids.next_command_id();
        self.live_edit_commands.insert(command_id);
        let mut arguments = Encoder::new();
        arguments.write_u64(command_id);
        arguments.write_str("Typing");
        self.send_host(PageHostKind::RegisterEditCommand, arguments);
        self.drawing.set_needs_display_in_entire_area()
    }

    // -- drawing ---------------------------------------------------------

    /// Synchronous resize: repaint everything at the new size into the
    /// reply so the browser swaps buffers without a blank flash.
    pub(crate) fn set_size(&mut self, width: u32, height: u32) -> UpdateChunk {
        let rect = self.drawing.resize(width, height);
        let pixels = self.engine.paint(&rect);
        UpdateChunk::new(rect, pixels)
    }

    /// Browser acknowledged the in-flight chunk. Returns whether another
    /// display pass is due.
    pub(crate) fn did_update(&mut self) -> bool {
        self.drawing.did_update()
    }

    /// Paint and send accumulated damage, respecting the one-in-flight
    /// rule.
    pub(crate) fn display(&mut self) {
        let Some(rect) = self.drawing.begin_display() else {
            return;
        };
        let pixels = self.engine.paint(&rect);
        let chunk = UpdateChunk::new(rect, pixels);
        let mut arguments = Encoder::new();
        arguments.encode(&chunk);
        self.channel.send(
            MessageId::of(DrawingHostKind::Update),
            self.page_id,
            arguments,
        );
    }

    // -- plumbing --------------------------------------------------------

    fn main_frame(&self) -> u64 {
        self.main_frame_id.expect("page has no main frame")
    }

    fn send_host(&self, kind: PageHostKind, arguments: Encoder) {
        self.channel
            .send(MessageId::of(kind), self.page_id, arguments);
    }

    fn send_process_host(&self, kind: ProcessHostKind, arguments: Encoder) {
        self.channel.send(MessageId::of(kind), 0, arguments);
    }

    fn send_callback(&self, kind: PageHostKind, callback_id: u64, result: Option<String>) {
        let mut arguments = Encoder::new();
        arguments.write_u64(callback_id);
        arguments.encode(&result);
        self.send_host(kind, arguments);
    }

    #[cfg(test)]
    pub(crate) fn session_history_ids(&self) -> Vec<u64> {
        self.session_history.iter().map(|(id, _)| *id).collect()
    }
}
