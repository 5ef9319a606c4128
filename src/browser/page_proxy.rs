//! Page proxy
//!
//! Browser-side representative of one web page living in a renderer
//! process. Mirrors the state the UI needs (url, title, frames, history,
//! pixels), correlates one-shot result callbacks, runs navigation policy
//! round-trips through an explicit listener object, and survives renderer
//! death: the proxy is never destroyed by a crash, only reset, and revives
//! its backing page on the next command.
//!
//! Lock discipline: state is mutated first, client and delegate callbacks
//! run after every internal lock is released. Callbacks are free to call
//! straight back into the proxy.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, warn};
use url::Url;

use super::back_forward::BackForwardList;
use super::drawing_proxy::{DrawingAreaProxy, Surface};
use super::frame_proxy::FrameProxy;
use super::process_proxy::ProcessProxy;
use crate::ipc::{Encoder, IncomingMessage, MessageId};
use crate::messages::{
    BackForwardItemData, DrawingHostKind, DrawingKind, KeyEventData, LoadError, MouseEventData,
    NavigationType, PageHostKind, PageKind, PolicyAction, ProcessKind, UpdateChunk,
};
use crate::utils::{DecodeError, Result, StrixError};

/// How long a synchronous resize may block the UI before giving up and
/// showing a blank surface at the new size.
const SET_SIZE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of a one-shot page operation (script evaluation, source or
/// render-tree retrieval). Every issued callback resolves exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    /// The operation produced a value.
    Value(String),
    /// The renderer ran the operation and it failed (script threw, frame
    /// had no document).
    Failure,
    /// The renderer went away before answering.
    Cancelled,
}

type Callback = Box<dyn FnOnce(CallbackResult) + Send>;

/// Page-level events for the embedder. All methods default to no-ops.
pub trait PageClient: Send {
    fn did_start_provisional_load(&mut self, _page: &PageProxy, _frame_id: u64, _url: &str) {}
    fn did_commit_load(&mut self, _page: &PageProxy, _frame_id: u64, _url: &str) {}
    fn did_finish_load(&mut self, _page: &PageProxy, _frame_id: u64) {}
    fn did_fail_load(&mut self, _page: &PageProxy, _frame_id: u64, _error: &LoadError) {}
    fn did_receive_title(&mut self, _page: &PageProxy, _title: &str) {}
    fn did_change_back_forward_list(&mut self, _page: &PageProxy) {}
    /// New pixels were incorporated into the surface.
    fn did_update_contents(&mut self, _page: &PageProxy) {}
    /// Undo/redo availability changed.
    fn did_change_edit_state(&mut self, _page: &PageProxy) {}
    /// The backing renderer exited; visible state has been reset.
    fn process_did_exit(&mut self, _page: &PageProxy) {}
}

/// Navigation policy hooks. Each receives a [`PolicyListener`] that MUST be
/// resolved (the defaults allow); an unresolved listener stalls that load
/// until the renderer gives up on it.
pub trait PolicyDelegate: Send {
    fn decide_policy_for_navigation_action(
        &mut self,
        _page: &PageProxy,
        _frame_id: u64,
        _url: &str,
        _navigation_type: NavigationType,
        listener: PolicyListener,
    ) {
        listener.allow();
    }

    fn decide_policy_for_new_window_action(
        &mut self,
        _page: &PageProxy,
        _frame_id: u64,
        _url: &str,
        listener: PolicyListener,
    ) {
        listener.allow();
    }

    fn decide_policy_for_mime_type(
        &mut self,
        _page: &PageProxy,
        _frame_id: u64,
        _mime_type: &str,
        _url: &str,
        listener: PolicyListener,
    ) {
        listener.allow();
    }
}

/// One pending policy decision. Consuming: exactly one of the three verbs.
/// Decisions that arrive after the issuing renderer died are discarded.
pub struct PolicyListener {
    page: Weak<PageProxyInner>,
    listener_id: u64,
}

impl PolicyListener {
    pub fn allow(self) {
        self.decide(PolicyAction::Use);
    }

    pub fn download(self) {
        self.decide(PolicyAction::Download);
    }

    pub fn ignore(self) {
        self.decide(PolicyAction::Ignore);
    }

    fn decide(self, action: PolicyAction) {
        let Some(inner) = self.page.upgrade() else {
            return;
        };
        let page = PageProxy { inner };
        // The listener set empties when the renderer exits; a decision for
        // an id no longer in it belongs to a dead load.
        if !page
            .inner
            .state
            .lock()
            .unwrap()
            .policy_listeners
            .remove(&self.listener_id)
        {
            debug!(
                "policy decision for stale listener {} discarded",
                self.listener_id
            );
            return;
        }
        let mut arguments = Encoder::new();
        arguments.write_u64(self.listener_id);
        arguments.encode(&action);
        page.send(PageKind::DidReceivePolicyDecision, arguments, true);
    }
}

struct PageState {
    /// Whether a backing page currently exists in the renderer.
    running: bool,
    is_loading: bool,
    main_frame: Option<FrameProxy>,
    subframes: HashMap<u64, FrameProxy>,
    title: Option<String>,
    /// URL of the last load request, provisional until committed.
    pending_url: Option<String>,
    back_forward: BackForwardList,
    drawing: DrawingAreaProxy,
    width: u32,
    height: u32,
    page_zoom: f64,
    text_zoom: f64,
    policy_listeners: HashSet<u64>,
    undo_stack: Vec<u64>,
    redo_stack: Vec<u64>,
    edit_labels: HashMap<u64, String>,
}

pub(crate) struct PageProxyInner {
    page_id: u64,
    process: ProcessProxy,
    state: Mutex<PageState>,
    callbacks: Mutex<HashMap<u64, Callback>>,
    next_callback_id: AtomicU64,
    client: Mutex<Option<Box<dyn PageClient>>>,
    policy_delegate: Mutex<Option<Box<dyn PolicyDelegate>>>,
}

/// Handle to one page. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct PageProxy {
    pub(crate) inner: Arc<PageProxyInner>,
}

impl PageProxy {
    /// Create the proxy, register it with its process, and ask the renderer
    /// to build the backing page. Works while the process is still
    /// launching; the creation message buffers.
    pub(crate) fn new(page_id: u64, process: ProcessProxy, width: u32, height: u32) -> Self {
        let page = Self {
            inner: Arc::new(PageProxyInner {
                page_id,
                process: process.clone(),
                state: Mutex::new(PageState {
                    running: false,
                    is_loading: false,
                    main_frame: None,
                    subframes: HashMap::new(),
                    title: None,
                    pending_url: None,
                    back_forward: BackForwardList::new(),
                    drawing: DrawingAreaProxy::new(width, height),
                    width,
                    height,
                    page_zoom: 1.0,
                    text_zoom: 1.0,
                    policy_listeners: HashSet::new(),
                    undo_stack: Vec::new(),
                    redo_stack: Vec::new(),
                    edit_labels: HashMap::new(),
                }),
                callbacks: Mutex::new(HashMap::new()),
                next_callback_id: AtomicU64::new(0),
                client: Mutex::new(None),
                policy_delegate: Mutex::new(None),
            }),
        };
        process.register_page(page_id, &page.inner);
        page.ensure_running();
        page
    }

    pub fn page_id(&self) -> u64 {
        self.inner.page_id
    }

    pub fn process(&self) -> &ProcessProxy {
        &self.inner.process
    }

    pub fn set_client(&self, client: Box<dyn PageClient>) {
        *self.inner.client.lock().unwrap() = Some(client);
    }

    pub fn set_policy_delegate(&self, delegate: Box<dyn PolicyDelegate>) {
        *self.inner.policy_delegate.lock().unwrap() = Some(delegate);
    }

    pub fn title(&self) -> Option<String> {
        self.inner.state.lock().unwrap().title.clone()
    }

    /// Committed URL of the main frame, or the in-flight request if nothing
    /// has committed yet.
    pub fn url(&self) -> Option<String> {
        let state = self.inner.state.lock().unwrap();
        state
            .main_frame
            .as_ref()
            .and_then(|frame| frame.url().map(str::to_owned))
            .or_else(|| state.pending_url.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().unwrap().is_loading
    }

    pub fn main_frame_id(&self) -> Option<u64> {
        self.inner
            .state
            .lock()
            .unwrap()
            .main_frame
            .as_ref()
            .map(FrameProxy::frame_id)
    }

    pub fn page_zoom(&self) -> f64 {
        self.inner.state.lock().unwrap().page_zoom
    }

    pub fn text_zoom(&self) -> f64 {
        self.inner.state.lock().unwrap().text_zoom
    }

    /// Copy of the current surface pixels.
    pub fn surface(&self) -> Surface {
        self.inner.state.lock().unwrap().drawing.surface().clone()
    }

    pub fn size(&self) -> (u32, u32) {
        let state = self.inner.state.lock().unwrap();
        (state.width, state.height)
    }

    // -- navigation ------------------------------------------------------

    /// Start loading `url`. Rejects unparseable URLs before anything is
    /// sent. Revives the backing page after a crash.
    pub fn load_url(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).map_err(|_| StrixError::InvalidUrl(url.to_owned()))?;
        if !self.ensure_running() {
            return Err(StrixError::Other("renderer process unavailable".into()));
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            state.pending_url = Some(parsed.to_string());
        }
        let mut arguments = Encoder::new();
        arguments.write_str(parsed.as_str());
        self.send(PageKind::LoadUrl, arguments, true);
        Ok(())
    }

    pub fn stop_loading(&self) {
        if self.is_running() {
            self.send(PageKind::StopLoading, Encoder::new(), true);
        }
    }

    pub fn reload(&self) {
        if self.ensure_running() {
            self.send(PageKind::Reload, Encoder::new(), true);
        }
    }

    pub fn can_go_back(&self) -> bool {
        self.inner.state.lock().unwrap().back_forward.back_count() > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.inner.state.lock().unwrap().back_forward.forward_count() > 0
    }

    pub fn go_back(&self) {
        let item = self.inner.state.lock().unwrap().back_forward.back_item();
        if let Some(item_id) = item {
            self.go_to_back_forward_item(item_id);
        }
    }

    pub fn go_forward(&self) {
        let item = self.inner.state.lock().unwrap().back_forward.forward_item();
        if let Some(item_id) = item {
            self.go_to_back_forward_item(item_id);
        }
    }

    /// Ask the renderer to navigate to a history item. The local list does
    /// not move until the renderer announces the commit.
    pub fn go_to_back_forward_item(&self, item_id: u64) {
        if !self.ensure_running() {
            return;
        }
        let mut arguments = Encoder::new();
        arguments.write_u64(item_id);
        self.send(PageKind::GoToBackForwardItem, arguments, true);
    }

    /// Canonical data for a history item, newest copies included.
    pub fn back_forward_item(&self, item_id: u64) -> Option<BackForwardItemData> {
        self.inner.process.back_forward_item(item_id)
    }

    pub fn back_list(&self, limit: usize) -> Vec<u64> {
        self.inner.state.lock().unwrap().back_forward.back_list(limit)
    }

    pub fn forward_list(&self, limit: usize) -> Vec<u64> {
        self.inner
            .state
            .lock()
            .unwrap()
            .back_forward
            .forward_list(limit)
    }

    pub fn current_back_forward_item(&self) -> Option<u64> {
        self.inner.state.lock().unwrap().back_forward.current_item()
    }

    // -- one-shot operations ---------------------------------------------

    /// Evaluate script in the main frame; the callback resolves exactly
    /// once, with `Cancelled` if the renderer dies first.
    pub fn run_javascript(
        &self,
        script: &str,
        callback: impl FnOnce(CallbackResult) + Send + 'static,
    ) {
        let Some(callback_id) = self.issue_callback(callback) else {
            return;
        };
        let mut arguments = Encoder::new();
        arguments.write_str(script);
        arguments.write_u64(callback_id);
        self.send_or_cancel(PageKind::RunJavaScript, arguments, callback_id);
    }

    /// Retrieve the serialized source of a frame's document.
    pub fn get_source_for_frame(
        &self,
        frame_id: u64,
        callback: impl FnOnce(CallbackResult) + Send + 'static,
    ) {
        let Some(callback_id) = self.issue_callback(callback) else {
            return;
        };
        let mut arguments = Encoder::new();
        arguments.write_u64(frame_id);
        arguments.write_u64(callback_id);
        self.send_or_cancel(PageKind::GetSourceForFrame, arguments, callback_id);
    }

    /// Retrieve a textual dump of the page's render tree.
    pub fn get_render_tree(&self, callback: impl FnOnce(CallbackResult) + Send + 'static) {
        let Some(callback_id) = self.issue_callback(callback) else {
            return;
        };
        let mut arguments = Encoder::new();
        arguments.write_u64(callback_id);
        self.send_or_cancel(PageKind::GetRenderTree, arguments, callback_id);
    }

    // -- zoom and input --------------------------------------------------

    pub fn set_page_zoom(&self, factor: f64) {
        self.inner.state.lock().unwrap().page_zoom = factor;
        if self.is_running() {
            let mut arguments = Encoder::new();
            arguments.write_f64(factor);
            self.send(PageKind::SetPageZoom, arguments, true);
        }
    }

    pub fn set_text_zoom(&self, factor: f64) {
        self.inner.state.lock().unwrap().text_zoom = factor;
        if self.is_running() {
            let mut arguments = Encoder::new();
            arguments.write_f64(factor);
            self.send(PageKind::SetTextZoom, arguments, true);
        }
    }

    pub fn mouse_event(&self, event: MouseEventData) {
        if !self.is_running() {
            return;
        }
        let mut arguments = Encoder::new();
        arguments.encode(&event);
        // Pointer moves are fire-and-forget; a busy renderer ignoring them
        // is not "unresponsive".
        self.send(PageKind::MouseEvent, arguments, !event.is_passive());
    }

    pub fn key_event(&self, event: KeyEventData) {
        if !self.is_running() {
            return;
        }
        let mut arguments = Encoder::new();
        arguments.encode(&event);
        self.send(PageKind::KeyEvent, arguments, true);
    }

    // -- editing ---------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        !self.inner.state.lock().unwrap().undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.inner.state.lock().unwrap().redo_stack.is_empty()
    }

    pub fn undo_label(&self) -> Option<String> {
        let state = self.inner.state.lock().unwrap();
        let id = state.undo_stack.last()?;
        state.edit_labels.get(id).cloned()
    }

    pub fn redo_label(&self) -> Option<String> {
        let state = self.inner.state.lock().unwrap();
        let id = state.redo_stack.last()?;
        state.edit_labels.get(id).cloned()
    }

    /// Unapply the most recent edit command. The command itself lives in
    /// the renderer; this side tracks only ids and labels.
    pub fn undo(&self) {
        let command_id = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(id) = state.undo_stack.pop() else {
                return;
            };
            state.redo_stack.push(id);
            id
        };
        let mut arguments = Encoder::new();
        arguments.write_u64(command_id);
        self.send(PageKind::UnapplyEditCommand, arguments, true);
        self.notify_client(|client, page| client.did_change_edit_state(page));
    }

    pub fn redo(&self) {
        let command_id = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(id) = state.redo_stack.pop() else {
                return;
            };
            state.undo_stack.push(id);
            id
        };
        let mut arguments = Encoder::new();
        arguments.write_u64(command_id);
        self.send(PageKind::ReapplyEditCommand, arguments, true);
        self.notify_client(|client, page| client.did_change_edit_state(page));
    }

    // -- drawing ---------------------------------------------------------

    /// Resize the page synchronously. The reply carries a full repaint at
    /// the new size, so the old surface is never shown stretched; if the
    /// renderer cannot answer in time the surface goes blank instead.
    pub fn set_size(&self, width: u32, height: u32) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.width = width;
            state.height = height;
        }
        if !self.is_running() {
            let mut state = self.inner.state.lock().unwrap();
            state.drawing = DrawingAreaProxy::new(width, height);
            return;
        }
        let mut arguments = Encoder::new();
        arguments.write_u32(width);
        arguments.write_u32(height);
        let reply = self.inner.process.send_sync_message(
            MessageId::of_sync(DrawingKind::SetSize),
            self.inner.page_id,
            arguments,
            SET_SIZE_TIMEOUT,
        );

        let chunk = reply.and_then(|reply| {
            if reply.is_empty() {
                return None;
            }
            reply.decoder().decode::<UpdateChunk>().ok()
        });
        {
            let mut state = self.inner.state.lock().unwrap();
            match chunk {
                Some(chunk) => state.drawing.did_resize(width, height, &chunk),
                None => {
                    debug!("resize of page {} got no repaint", self.inner.page_id);
                    state.drawing = DrawingAreaProxy::new(width, height);
                }
            }
        }
        self.notify_client(|client, page| client.did_update_contents(page));
    }

    // -- lifecycle -------------------------------------------------------

    /// Tear down the backing page and detach from the process. The proxy is
    /// unusable afterwards.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.running {
                self.inner.process.unregister_page(self.inner.page_id);
                return;
            }
            state.running = false;
        }
        let mut arguments = Encoder::new();
        arguments.write_u64(self.inner.page_id);
        self.inner.process.send_message(
            MessageId::of(ProcessKind::ClosePage),
            0,
            arguments,
            false,
        );
        self.inner.process.unregister_page(self.inner.page_id);
        self.inner.cancel_all_callbacks();
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().unwrap().running
    }

    /// Make sure a backing page exists, relaunching the process if it died.
    /// History survives as ids; the revived page starts blank and does not
    /// replay it.
    fn ensure_running(&self) -> bool {
        let (width, height) = {
            let state = self.inner.state.lock().unwrap();
            if state.running {
                return true;
            }
            (state.width, state.height)
        };
        if !self.inner.process.relaunch_if_needed() {
            return false;
        }
        let mut arguments = Encoder::new();
        arguments.write_u64(self.inner.page_id);
        arguments.write_u32(width);
        arguments.write_u32(height);
        let sent = self.inner.process.send_message(
            MessageId::of(ProcessKind::CreatePage),
            0,
            arguments,
            true,
        );
        if sent {
            self.inner.state.lock().unwrap().running = true;
        }
        sent
    }

    // -- plumbing --------------------------------------------------------

    fn send(&self, kind: PageKind, arguments: Encoder, arms_responsiveness: bool) -> bool {
        self.inner.process.send_message(
            MessageId::of(kind),
            self.inner.page_id,
            arguments,
            arms_responsiveness,
        )
    }

    /// Register a callback, unless the page cannot run at all (then resolve
    /// it as cancelled right away and return `None`).
    fn issue_callback(
        &self,
        callback: impl FnOnce(CallbackResult) + Send + 'static,
    ) -> Option<u64> {
        if !self.ensure_running() {
            callback(CallbackResult::Cancelled);
            return None;
        }
        let callback_id = self.inner.next_callback_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .insert(callback_id, Box::new(callback));
        Some(callback_id)
    }

    fn send_or_cancel(&self, kind: PageKind, arguments: Encoder, callback_id: u64) {
        if !self.send(kind, arguments, true) {
            // Lost a race with process exit.
            self.inner.take_callback(callback_id, CallbackResult::Cancelled);
        }
    }

    // The client is taken out of its slot for the duration of the call so
    // the callback can re-enter the proxy; a notification raised from
    // inside the callback finds the slot empty and is skipped.
    fn notify_client(&self, f: impl FnOnce(&mut dyn PageClient, &PageProxy)) {
        let Some(mut client) = self.inner.client.lock().unwrap().take() else {
            return;
        };
        f(client.as_mut(), self);
        let mut slot = self.inner.client.lock().unwrap();
        if slot.is_none() {
            *slot = Some(client);
        }
    }
}

impl PageProxyInner {
    fn proxy(self: &Arc<Self>) -> PageProxy {
        PageProxy {
            inner: Arc::clone(self),
        }
    }

    fn take_callback(&self, callback_id: u64, result: CallbackResult) {
        let callback = self.callbacks.lock().unwrap().remove(&callback_id);
        match callback {
            Some(callback) => callback(result),
            None => debug!("no callback registered under id {callback_id}"),
        }
    }

    fn cancel_all_callbacks(&self) {
        let callbacks: Vec<Callback> = {
            let mut map = self.callbacks.lock().unwrap();
            map.drain().map(|(_, callback)| callback).collect()
        };
        for callback in callbacks {
            callback(CallbackResult::Cancelled);
        }
    }

    /// The backing renderer exited. Reset everything volatile; the history
    /// list and its canonical items remain navigable.
    pub(crate) fn process_did_exit(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            state.running = false;
            state.is_loading = false;
            state.main_frame = None;
            state.subframes.clear();
            state.pending_url = None;
            state.policy_listeners.clear();
            state.undo_stack.clear();
            state.redo_stack.clear();
            state.edit_labels.clear();
        }
        self.cancel_all_callbacks();
        let page = self.proxy();
        page.notify_client(|client, page| client.process_did_exit(page));
    }

    pub(crate) fn did_add_back_forward_item(self: &Arc<Self>, item_id: u64) {
        self.state.lock().unwrap().back_forward.add_item(item_id);
        let page = self.proxy();
        page.notify_client(|client, page| client.did_change_back_forward_list(page));
    }

    pub(crate) fn did_go_to_back_forward_item(self: &Arc<Self>, item_id: u64) {
        let moved = self.state.lock().unwrap().back_forward.went_to_item(item_id);
        if moved {
            let page = self.proxy();
            page.notify_client(|client, page| client.did_change_back_forward_list(page));
        } else {
            debug!("renderer went to unknown history item {item_id}");
        }
    }

    pub(crate) fn did_destroy_frame(self: &Arc<Self>, frame_id: u64) {
        let mut state = self.state.lock().unwrap();
        if state
            .main_frame
            .as_ref()
            .is_some_and(|frame| frame.frame_id() == frame_id)
        {
            state.main_frame = None;
        } else {
            state.subframes.remove(&frame_id);
        }
    }

    pub(crate) fn did_receive_page_message(self: &Arc<Self>, message: IncomingMessage) {
        let Some(kind) = message.id.get::<PageHostKind>() else {
            warn!("unknown PageHost kind {} dropped", message.id.kind_bits());
            return;
        };
        if let Err(err) = self.dispatch_page_message(kind, &message) {
            warn!("dropping malformed {kind:?}: {err}");
        }
    }

    fn dispatch_page_message(
        self: &Arc<Self>,
        kind: PageHostKind,
        message: &IncomingMessage,
    ) -> std::result::Result<(), DecodeError> {
        let page = self.proxy();
        let mut decoder = message.decoder();
        match kind {
            PageHostKind::DidCreateMainFrame => {
                let frame_id = decoder.read_u64()?;
                self.state.lock().unwrap().main_frame = Some(FrameProxy::new(frame_id, None));
                self.process.register_frame(frame_id, self.page_id);
            }
            PageHostKind::DidCreateSubframe => {
                let frame_id = decoder.read_u64()?;
                let parent_frame_id = decoder.read_u64()?;
                self.state
                    .lock()
                    .unwrap()
                    .subframes
                    .insert(frame_id, FrameProxy::new(frame_id, Some(parent_frame_id)));
                self.process.register_frame(frame_id, self.page_id);
            }
            PageHostKind::DidStartProvisionalLoad => {
                let frame_id = decoder.read_u64()?;
                let url = decoder.read_str()?;
                {
                    let mut state = self.state.lock().unwrap();
                    if let Some(frame) = frame_mut(&mut state, frame_id) {
                        frame.did_start_provisional_load(&url);
                    }
                    if is_main_frame(&state, frame_id) {
                        state.is_loading = true;
                    }
                }
                page.notify_client(|client, page| {
                    client.did_start_provisional_load(page, frame_id, &url)
                });
            }
            PageHostKind::DidCommitLoad => {
                let frame_id = decoder.read_u64()?;
                let url = decoder.read_str()?;
                {
                    let mut state = self.state.lock().unwrap();
                    if let Some(frame) = frame_mut(&mut state, frame_id) {
                        frame.did_commit_load(&url);
                    }
                    if is_main_frame(&state, frame_id) {
                        state.pending_url = None;
                        state.title = None;
                    }
                }
                page.notify_client(|client, page| client.did_commit_load(page, frame_id, &url));
            }
            PageHostKind::DidFinishLoad => {
                let frame_id = decoder.read_u64()?;
                {
                    let mut state = self.state.lock().unwrap();
                    if let Some(frame) = frame_mut(&mut state, frame_id) {
                        frame.did_finish_load();
                    }
                    if is_main_frame(&state, frame_id) {
                        state.is_loading = false;
                    }
                }
                page.notify_client(|client, page| client.did_finish_load(page, frame_id));
            }
            PageHostKind::DidFailLoad => {
                let frame_id = decoder.read_u64()?;
                let error = decoder.decode::<LoadError>()?;
                {
                    let mut state = self.state.lock().unwrap();
                    if let Some(frame) = frame_mut(&mut state, frame_id) {
                        frame.did_fail_load(&error);
                    }
                    if is_main_frame(&state, frame_id) {
                        state.is_loading = false;
                        state.pending_url = None;
                    }
                }
                page.notify_client(|client, page| client.did_fail_load(page, frame_id, &error));
            }
            PageHostKind::DidReceiveTitle => {
                let frame_id = decoder.read_u64()?;
                let title = decoder.read_str()?;
                let for_main_frame = {
                    let mut state = self.state.lock().unwrap();
                    if let Some(frame) = frame_mut(&mut state, frame_id) {
                        frame.did_receive_title(&title);
                    }
                    let main = is_main_frame(&state, frame_id);
                    if main {
                        state.title = Some(title.clone());
                    }
                    main
                };
                if for_main_frame {
                    page.notify_client(|client, page| client.did_receive_title(page, &title));
                }
            }
            PageHostKind::DecidePolicyForNavigationAction => {
                let frame_id = decoder.read_u64()?;
                let listener_id = decoder.read_u64()?;
                let url = decoder.read_str()?;
                let navigation_type = decoder.decode::<NavigationType>()?;
                let listener = self.issue_policy_listener(listener_id);
                self.with_policy_delegate(listener, |delegate, page, listener| {
                    delegate.decide_policy_for_navigation_action(
                        page,
                        frame_id,
                        &url,
                        navigation_type,
                        listener,
                    )
                });
            }
            PageHostKind::DecidePolicyForNewWindowAction => {
                let frame_id = decoder.read_u64()?;
                let listener_id = decoder.read_u64()?;
                let url = decoder.read_str()?;
                let listener = self.issue_policy_listener(listener_id);
                self.with_policy_delegate(listener, |delegate, page, listener| {
                    delegate.decide_policy_for_new_window_action(page, frame_id, &url, listener)
                });
            }
            PageHostKind::DecidePolicyForMimeType => {
                let frame_id = decoder.read_u64()?;
                let listener_id = decoder.read_u64()?;
                let mime_type = decoder.read_str()?;
                let url = decoder.read_str()?;
                let listener = self.issue_policy_listener(listener_id);
                self.with_policy_delegate(listener, |delegate, page, listener| {
                    delegate.decide_policy_for_mime_type(page, frame_id, &mime_type, &url, listener)
                });
            }
            PageHostKind::ScriptValueCallback
            | PageHostKind::SourceCallback
            | PageHostKind::RenderTreeCallback => {
                let callback_id = decoder.read_u64()?;
                let result = decoder.decode::<Option<String>>()?;
                self.take_callback(
                    callback_id,
                    match result {
                        Some(value) => CallbackResult::Value(value),
                        None => CallbackResult::Failure,
                    },
                );
            }
            PageHostKind::RegisterEditCommand => {
                let command_id = decoder.read_u64()?;
                let label = decoder.read_str()?;
                {
                    let mut state = self.state.lock().unwrap();
                    state.undo_stack.push(command_id);
                    // A fresh edit obsoletes anything undone.
                    for id in state.redo_stack.drain(..).collect::<Vec<_>>() {
                        state.edit_labels.remove(&id);
                    }
                    state.edit_labels.insert(command_id, label);
                }
                page.notify_client(|client, page| client.did_change_edit_state(page));
            }
            PageHostKind::UnregisterEditCommand => {
                let command_id = decoder.read_u64()?;
                {
                    let mut state = self.state.lock().unwrap();
                    state.undo_stack.retain(|id| *id != command_id);
                    state.redo_stack.retain(|id| *id != command_id);
                    state.edit_labels.remove(&command_id);
                }
                page.notify_client(|client, page| client.did_change_edit_state(page));
            }
            PageHostKind::ClearAllEditCommands => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.undo_stack.clear();
                    state.redo_stack.clear();
                    state.edit_labels.clear();
                }
                page.notify_client(|client, page| client.did_change_edit_state(page));
            }
        }
        Ok(())
    }

    fn issue_policy_listener(self: &Arc<Self>, listener_id: u64) -> PolicyListener {
        self.state
            .lock()
            .unwrap()
            .policy_listeners
            .insert(listener_id);
        PolicyListener {
            page: Arc::downgrade(self),
            listener_id,
        }
    }

    /// Run a policy hook outside every lock. With no delegate installed the
    /// load proceeds.
    fn with_policy_delegate(
        self: &Arc<Self>,
        listener: PolicyListener,
        f: impl FnOnce(&mut dyn PolicyDelegate, &PageProxy, PolicyListener),
    ) {
        let page = self.proxy();
        let mut delegate = self.policy_delegate.lock().unwrap();
        match delegate.as_mut() {
            Some(delegate) => f(delegate.as_mut(), &page, listener),
            None => listener.allow(),
        }
    }

    pub(crate) fn did_receive_drawing_message(self: &Arc<Self>, message: IncomingMessage) {
        let Some(kind) = message.id.get::<DrawingHostKind>() else {
            warn!("unknown DrawingHost kind {} dropped", message.id.kind_bits());
            return;
        };
        match kind {
            DrawingHostKind::Update => {
                let chunk = match message.decoder().decode::<UpdateChunk>() {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!("dropping malformed paint chunk: {err}");
                        return;
                    }
                };
                self.state.lock().unwrap().drawing.incorporate_update(&chunk);
                // Ack so the renderer may send the next frame. Passive
                // traffic; paints never arm the responsiveness check.
                self.process.send_message(
                    MessageId::of(DrawingKind::DidUpdate),
                    self.page_id,
                    Encoder::new(),
                    false,
                );
                let page = self.proxy();
                page.notify_client(|client, page| client.did_update_contents(page));
            }
        }
    }
}

fn is_main_frame(state: &PageState, frame_id: u64) -> bool {
    state
        .main_frame
        .as_ref()
        .is_some_and(|frame| frame.frame_id() == frame_id)
}

fn frame_mut(state: &mut PageState, frame_id: u64) -> Option<&mut FrameProxy> {
    if state
        .main_frame
        .as_ref()
        .is_some_and(|frame| frame.frame_id() == frame_id)
    {
        return state.main_frame.as_mut();
    }
    state.subframes.get_mut(&frame_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::launcher::{LaunchOptions, ProcessLauncher};
    use crate::browser::process_proxy::DEFAULT_RESPONSIVENESS_TIMEOUT;
    use crate::ipc::TransportPair;
    use crate::utils::{LaunchError, RunLoop};
    use std::sync::mpsc;

    struct NeverLauncher;

    impl ProcessLauncher for NeverLauncher {
        fn launch(
            &self,
            _options: &LaunchOptions,
        ) -> std::result::Result<TransportPair, LaunchError> {
            Err(LaunchError::Failed("no renderer available".into()))
        }
    }

    /// While the process is still launching, sends buffer and the page is
    /// fully usable. No channel ever opens in these tests.
    fn launching_page() -> PageProxy {
        let process = ProcessProxy::new(
            RunLoop::new("page-test"),
            Arc::new(NeverLauncher),
            LaunchOptions::default(),
            DEFAULT_RESPONSIVENESS_TIMEOUT,
        );
        PageProxy::new(1, process, 640, 480)
    }

    fn incoming(kind: PageHostKind, destination: u64, payload: Encoder) -> IncomingMessage {
        IncomingMessage {
            id: MessageId::of(kind),
            destination,
            payload: payload.finish(),
        }
    }

    #[test]
    fn test_load_url_rejects_garbage_before_sending() {
        let page = launching_page();
        assert!(matches!(
            page.load_url("not a url"),
            Err(StrixError::InvalidUrl(_))
        ));
        assert!(page.load_url("https://example.test/").is_ok());
        assert_eq!(page.url().as_deref(), Some("https://example.test/"));
    }

    #[test]
    fn test_title_tracks_main_frame_only() {
        let page = launching_page();
        let mut args = Encoder::new();
        args.write_u64(10);
        page.inner
            .did_receive_page_message(incoming(PageHostKind::DidCreateMainFrame, 1, args));
        let mut args = Encoder::new();
        args.write_u64(10);
        args.write_u64(11);
        page.inner
            .did_receive_page_message(incoming(PageHostKind::DidCreateSubframe, 1, args));

        let mut args = Encoder::new();
        args.write_u64(11);
        args.write_str("subframe title");
        page.inner
            .did_receive_page_message(incoming(PageHostKind::DidReceiveTitle, 1, args));
        assert_eq!(page.title(), None);

        let mut args = Encoder::new();
        args.write_u64(10);
        args.write_str("Main");
        page.inner
            .did_receive_page_message(incoming(PageHostKind::DidReceiveTitle, 1, args));
        assert_eq!(page.title().as_deref(), Some("Main"));
    }

    #[test]
    fn test_edit_commands_drive_undo_redo_stacks() {
        let page = launching_page();
        for (id, label) in [(1u64, "Typing"), (2, "Cut")] {
            let mut args = Encoder::new();
            args.write_u64(id);
            args.write_str(label);
            page.inner
                .did_receive_page_message(incoming(PageHostKind::RegisterEditCommand, 1, args));
        }
        assert!(page.can_undo());
        assert_eq!(page.undo_label().as_deref(), Some("Cut"));

        page.undo();
        assert!(page.can_redo());
        assert_eq!(page.redo_label().as_deref(), Some("Cut"));
        assert_eq!(page.undo_label().as_deref(), Some("Typing"));

        // A fresh edit clears the redo side.
        let mut args = Encoder::new();
        args.write_u64(3);
        args.write_str("Paste");
        page.inner
            .did_receive_page_message(incoming(PageHostKind::RegisterEditCommand, 1, args));
        assert!(!page.can_redo());
    }

    #[test]
    fn test_client_can_reenter_proxy_from_notification() {
        struct ReentrantClient;

        impl PageClient for ReentrantClient {
            fn did_change_edit_state(&mut self, page: &PageProxy) {
                // Would deadlock if the client slot were still locked.
                page.undo();
            }
        }

        let page = launching_page();
        for (id, label) in [(1u64, "Typing"), (2, "Cut")] {
            let mut args = Encoder::new();
            args.write_u64(id);
            args.write_str(label);
            page.inner
                .did_receive_page_message(incoming(PageHostKind::RegisterEditCommand, 1, args));
        }
        page.set_client(Box::new(ReentrantClient));

        // The outer undo pops "Cut"; the nested undo from the notification
        // pops "Typing" and its own notification finds the slot empty.
        page.undo();
        assert!(!page.can_undo());
        assert_eq!(page.redo_label().as_deref(), Some("Typing"));
    }

    #[test]
    fn test_process_exit_cancels_callbacks_and_resets_state() {
        let page = launching_page();
        let (tx, rx) = mpsc::channel();
        page.run_javascript("1 + 1", move |result| {
            tx.send(result).unwrap();
        });
        assert!(rx.try_recv().is_err());

        page.inner.process_did_exit();
        assert_eq!(rx.recv().unwrap(), CallbackResult::Cancelled);
        assert!(!page.is_running());
        assert!(!page.is_loading());
    }

    #[test]
    fn test_stale_policy_decision_is_discarded() {
        let page = launching_page();
        let listener = page.inner.issue_policy_listener(5);
        page.inner.process_did_exit();
        // The listener set was cleared; deciding now must not send.
        listener.allow();
        assert!(page
            .inner
            .state
            .lock()
            .unwrap()
            .policy_listeners
            .is_empty());
    }

    #[test]
    fn test_callback_result_round_trip() {
        let page = launching_page();
        let (tx, rx) = mpsc::channel();
        page.run_javascript("document.title", move |result| {
            tx.send(result).unwrap();
        });

        let mut args = Encoder::new();
        args.write_u64(1); // first issued callback id
        args.encode(&Some("Main".to_string()));
        page.inner
            .did_receive_page_message(incoming(PageHostKind::ScriptValueCallback, 1, args));
        assert_eq!(rx.recv().unwrap(), CallbackResult::Value("Main".into()));
    }

    #[test]
    fn test_back_forward_list_moves_only_on_renderer_commit() {
        let page = launching_page();
        page.inner.did_add_back_forward_item(100);
        page.inner.did_add_back_forward_item(101);
        assert!(page.can_go_back());
        assert_eq!(page.current_back_forward_item(), Some(101));

        page.go_back();
        // Still where we were until the renderer announces the move.
        assert_eq!(page.current_back_forward_item(), Some(101));
        page.inner.did_go_to_back_forward_item(100);
        assert_eq!(page.current_back_forward_item(), Some(100));
        assert!(page.can_go_forward());
    }

    #[test]
    fn test_history_survives_process_exit() {
        let page = launching_page();
        page.inner.did_add_back_forward_item(100);
        page.inner.process_did_exit();
        assert_eq!(page.current_back_forward_item(), Some(100));
    }

    #[test]
    fn test_frame_destruction_routed_by_id() {
        let page = launching_page();
        let mut args = Encoder::new();
        args.write_u64(10);
        page.inner
            .did_receive_page_message(incoming(PageHostKind::DidCreateMainFrame, 1, args));
        page.inner.did_destroy_frame(10);
        assert!(page.inner.state.lock().unwrap().main_frame.is_none());
    }

    #[test]
    fn test_malformed_page_message_is_dropped() {
        let page = launching_page();
        // DidReceiveTitle with a truncated payload.
        let mut args = Encoder::new();
        args.write_u64(10);
        page.inner
            .did_receive_page_message(incoming(PageHostKind::DidReceiveTitle, 1, args));
        assert_eq!(page.title(), None);
    }
}

