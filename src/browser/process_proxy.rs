//! Process proxy
//!
//! Browser-side representative of one renderer process: owns the channel to
//! it, multiplexes its pages by id, stores the canonical back-forward item
//! copies, and watches for crashes and unresponsiveness. Sends issued while
//! the process is still launching buffer in order and flush atomically when
//! the channel opens. Crash and graceful exit are indistinguishable here;
//! both arrive as the same connection-closed event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, warn};

use super::launcher::{LaunchOptions, ProcessLauncher};
use super::page_proxy::PageProxyInner;
use crate::ipc::{
    Channel, Encoder, IncomingMessage, MessageClass, MessageClient, MessageId, OutgoingMessage,
    Reply, Role, TransportPair,
};
use crate::messages::{BackForwardItemData, PageHostKind, ProcessHostKind};
use crate::utils::{DecodeError, RunLoop, Timer};

/// How long an event-carrying send may go unanswered before the process is
/// reported unresponsive. A heuristic: long-running script produces false
/// positives the observer must tolerate.
pub const DEFAULT_RESPONSIVENESS_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifecycle of the remote process as seen from this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    /// Child requested but the channel is not open yet; sends buffer.
    Launching,
    /// Channel open, traffic flowing.
    Connected,
    /// Connection gone (crash, exit, or launch failure). Terminal until a
    /// relaunch.
    Closed,
}

/// Process-level lifecycle notifications for the embedder.
pub trait ProcessObserver: Send {
    fn process_did_become_unresponsive(&mut self, _process: &ProcessProxy) {}
    fn process_did_become_responsive(&mut self, _process: &ProcessProxy) {}
    fn process_did_close(&mut self, _process: &ProcessProxy) {}
}

struct ProcessState {
    phase: LaunchPhase,
    channel: Option<Channel>,
    /// Sends issued while `Launching`, in issue order.
    buffered: Vec<OutgoingMessage>,
    pages: HashMap<u64, Weak<PageProxyInner>>,
}

pub(crate) struct ProcessProxyInner {
    run_loop: RunLoop,
    launcher: Arc<dyn ProcessLauncher>,
    launch_options: LaunchOptions,
    responsiveness_timeout: Duration,
    state: Mutex<ProcessState>,
    /// Canonical back-forward item copies, keyed by item id. These outlive
    /// the process so closed pages can still show their history.
    items: Mutex<HashMap<u64, BackForwardItemData>>,
    /// frame id -> page id, for frame-scoped messages with no page context.
    frames: Mutex<HashMap<u64, u64>>,
    responsiveness_timer: Mutex<Option<Timer>>,
    unresponsive: AtomicBool,
    observer: Mutex<Option<Box<dyn ProcessObserver>>>,
}

/// Handle to one renderer process. Cheap to clone.
#[derive(Clone)]
pub struct ProcessProxy {
    inner: Arc<ProcessProxyInner>,
}

impl ProcessProxy {
    /// Create a proxy in the `Launching` phase without starting the child;
    /// the embedder (or [`ProcessProxy::launch`]) connects it later via
    /// [`ProcessProxy::did_finish_launching`].
    pub fn new(
        run_loop: RunLoop,
        launcher: Arc<dyn ProcessLauncher>,
        launch_options: LaunchOptions,
        responsiveness_timeout: Duration,
    ) -> Self {
        let proxy = Self {
            inner: Arc::new(ProcessProxyInner {
                run_loop,
                launcher,
                launch_options,
                responsiveness_timeout,
                state: Mutex::new(ProcessState {
                    phase: LaunchPhase::Launching,
                    channel: None,
                    buffered: Vec::new(),
                    pages: HashMap::new(),
                }),
                items: Mutex::new(HashMap::new()),
                frames: Mutex::new(HashMap::new()),
                responsiveness_timer: Mutex::new(None),
                unresponsive: AtomicBool::new(false),
                observer: Mutex::new(None),
            }),
        };

        let weak = Arc::downgrade(&proxy.inner);
        let timer = Timer::new(move || {
            if let Some(inner) = weak.upgrade() {
                ProcessProxy { inner }.did_become_unresponsive();
            }
        });
        *proxy.inner.responsiveness_timer.lock().unwrap() = Some(timer);
        proxy
    }

    /// Create and immediately start launching through the launcher.
    pub fn launch(
        run_loop: RunLoop,
        launcher: Arc<dyn ProcessLauncher>,
        launch_options: LaunchOptions,
        responsiveness_timeout: Duration,
    ) -> Self {
        let proxy = Self::new(run_loop, launcher, launch_options, responsiveness_timeout);
        proxy.start_launch();
        proxy
    }

    fn start_launch(&self) {
        debug!("launching renderer process");
        let launched = self.inner.launcher.launch(&self.inner.launch_options);
        match launched {
            Ok(transport) => self.did_finish_launching(transport),
            Err(err) => {
                warn!("renderer process launch failed: {err}");
                self.connection_did_close();
            }
        }
    }

    /// The child is up: open the channel and flush the launch buffer. The
    /// flush happens under the state lock so no send issued after this call
    /// can interleave ahead of buffered ones.
    pub fn did_finish_launching(&self, transport: TransportPair) {
        let channel = Channel::new(Role::Server, self.inner.run_loop.clone());

        let weak = Arc::downgrade(&self.inner);
        channel.set_sync_activity_observer(move || {
            if let Some(inner) = weak.upgrade() {
                ProcessProxy { inner }.mark_responsive();
            }
        });

        let client: Arc<Mutex<dyn MessageClient>> = Arc::new(Mutex::new(ProcessProxyClient {
            process: Arc::downgrade(&self.inner),
        }));
        channel.open(transport, client);

        let mut state = self.inner.state.lock().unwrap();
        assert_eq!(
            state.phase,
            LaunchPhase::Launching,
            "process connected twice"
        );
        for message in state.buffered.drain(..) {
            channel.send_message(message);
        }
        state.channel = Some(channel);
        state.phase = LaunchPhase::Connected;
        debug!("renderer process connected");
    }

    /// Queue a one-way message to the process. `arms_responsiveness` is
    /// true for event-carrying sends (commands, clicks) and false for
    /// passive traffic like pointer moves and paint acks.
    pub(crate) fn send_message(
        &self,
        id: MessageId,
        destination: u64,
        arguments: Encoder,
        arms_responsiveness: bool,
    ) -> bool {
        let message = OutgoingMessage {
            id,
            destination,
            payload: arguments.finish(),
        };
        let sent = {
            let mut state = self.inner.state.lock().unwrap();
            match state.phase {
                LaunchPhase::Launching => {
                    state.buffered.push(message);
                    true
                }
                LaunchPhase::Connected => state
                    .channel
                    .as_ref()
                    .expect("connected without a channel")
                    .send_message(message),
                LaunchPhase::Closed => {
                    debug!(
                        "dropping {:#010x} to {destination}: process closed",
                        id.raw()
                    );
                    false
                }
            }
        };
        if sent && arms_responsiveness {
            self.arm_responsiveness();
        }
        sent
    }

    /// Synchronous round-trip. Only possible while connected; during launch
    /// or after close there is nobody to reply and this returns `None`.
    pub(crate) fn send_sync_message(
        &self,
        id: MessageId,
        destination: u64,
        arguments: Encoder,
        timeout: Duration,
    ) -> Option<Reply> {
        let channel = {
            let state = self.inner.state.lock().unwrap();
            match state.phase {
                LaunchPhase::Connected => state.channel.clone(),
                _ => {
                    debug!("sync send of {:#010x} while not connected", id.raw());
                    None
                }
            }
        }?;
        self.arm_responsiveness();
        channel.send_sync(id, destination, arguments, timeout)
    }

    pub fn phase(&self) -> LaunchPhase {
        self.inner.state.lock().unwrap().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == LaunchPhase::Connected
    }

    pub fn is_unresponsive(&self) -> bool {
        self.inner.unresponsive.load(Ordering::SeqCst)
    }

    pub fn set_observer(&self, observer: Box<dyn ProcessObserver>) {
        *self.inner.observer.lock().unwrap() = Some(observer);
    }

    /// Tear the connection down locally. The renderer sees EOF; this side
    /// goes through the same closed path a crash would take.
    pub fn terminate(&self) {
        debug!("terminating renderer process");
        let channel = self.inner.state.lock().unwrap().channel.clone();
        if let Some(channel) = channel {
            channel.invalidate();
        }
        self.connection_did_close();
    }

    /// Bring a `Closed` process back up for page revival. Idempotent while
    /// launching or connected. Returns false if the relaunch itself failed.
    pub(crate) fn relaunch_if_needed(&self) -> bool {
        {
            let mut state = self.inner.state.lock().unwrap();
            match state.phase {
                LaunchPhase::Closed => state.phase = LaunchPhase::Launching,
                _ => return true,
            }
        }
        debug!("relaunching renderer process");
        match self.inner.launcher.launch(&self.inner.launch_options) {
            Ok(transport) => {
                self.did_finish_launching(transport);
                true
            }
            Err(err) => {
                warn!("renderer process relaunch failed: {err}");
                self.inner.state.lock().unwrap().phase = LaunchPhase::Closed;
                false
            }
        }
    }

    pub(crate) fn register_page(&self, page_id: u64, page: &Arc<PageProxyInner>) {
        self.inner
            .state
            .lock()
            .unwrap()
            .pages
            .insert(page_id, Arc::downgrade(page));
    }

    pub(crate) fn unregister_page(&self, page_id: u64) {
        self.inner.state.lock().unwrap().pages.remove(&page_id);
    }

    pub(crate) fn register_frame(&self, frame_id: u64, page_id: u64) {
        self.inner.frames.lock().unwrap().insert(frame_id, page_id);
    }

    fn page(&self, page_id: u64) -> Option<Arc<PageProxyInner>> {
        self.inner
            .state
            .lock()
            .unwrap()
            .pages
            .get(&page_id)
            .and_then(Weak::upgrade)
    }

    /// Canonical payload of a back-forward item, by id.
    pub fn back_forward_item(&self, item_id: u64) -> Option<BackForwardItemData> {
        self.inner.items.lock().unwrap().get(&item_id).cloned()
    }

    fn arm_responsiveness(&self) {
        if let Some(timer) = self.inner.responsiveness_timer.lock().unwrap().as_ref() {
            timer.start(self.inner.responsiveness_timeout);
        }
    }

    pub(crate) fn mark_responsive(&self) {
        if let Some(timer) = self.inner.responsiveness_timer.lock().unwrap().as_ref() {
            timer.stop();
        }
        if self.inner.unresponsive.swap(false, Ordering::SeqCst) {
            self.notify_observer(|observer, proxy| observer.process_did_become_responsive(proxy));
        }
    }

    fn did_become_unresponsive(&self) {
        if !self.inner.unresponsive.swap(true, Ordering::SeqCst) {
            warn!("renderer process is unresponsive");
            self.notify_observer(|observer, proxy| {
                observer.process_did_become_unresponsive(proxy)
            });
        }
    }

    // Mirrors PageProxy::notify_client: the observer is taken out of its
    // slot during the call so the callback can re-enter the proxy.
    fn notify_observer(&self, f: impl FnOnce(&mut dyn ProcessObserver, &ProcessProxy)) {
        let Some(mut observer) = self.inner.observer.lock().unwrap().take() else {
            return;
        };
        f(observer.as_mut(), self);
        let mut slot = self.inner.observer.lock().unwrap();
        if slot.is_none() {
            *slot = Some(observer);
        }
    }

    /// Single closed path for crash, graceful exit, terminate, and launch
    /// failure. Every owned page resets its visible state (and resolves all
    /// outstanding callbacks to cancellation) without being destroyed.
    pub(crate) fn connection_did_close(&self) {
        let (channel, pages) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase == LaunchPhase::Closed {
                return;
            }
            state.phase = LaunchPhase::Closed;
            state.buffered.clear();
            let channel = state.channel.take();
            let pages: Vec<_> = state.pages.values().filter_map(Weak::upgrade).collect();
            (channel, pages)
        };
        if let Some(channel) = channel {
            channel.invalidate();
        }
        if let Some(timer) = self.inner.responsiveness_timer.lock().unwrap().as_ref() {
            timer.stop();
        }
        self.inner.unresponsive.store(false, Ordering::SeqCst);
        self.inner.frames.lock().unwrap().clear();
        debug!(
            "renderer process connection closed ({} pages affected)",
            pages.len()
        );
        for page in &pages {
            page.process_did_exit();
        }
        self.notify_observer(|observer, proxy| observer.process_did_close(proxy));
    }

    fn route_message(&self, channel: &Channel, message: IncomingMessage) {
        let Some(class) = message.id.class() else {
            return;
        };
        match class {
            MessageClass::ProcessHost => self.handle_process_host_message(message),
            MessageClass::PageHost => {
                // Callback results are reply-shaped: signs of life.
                if matches!(
                    message.id.get::<PageHostKind>(),
                    Some(
                        PageHostKind::ScriptValueCallback
                            | PageHostKind::SourceCallback
                            | PageHostKind::RenderTreeCallback
                    )
                ) {
                    self.mark_responsive();
                }
                match self.page(message.destination) {
                    Some(page) => page.did_receive_page_message(message),
                    None => debug!(
                        "page {} is gone; dropping {:#010x}",
                        message.destination,
                        message.id.raw()
                    ),
                }
            }
            MessageClass::DrawingHost => match self.page(message.destination) {
                Some(page) => page.did_receive_drawing_message(message),
                None => debug!("page {} is gone; dropping paint", message.destination),
            },
            _ => {
                // This endpoint never expects browser->renderer classes.
                warn!(
                    "unexpected {class:?} message on the browser side; invalidating connection"
                );
                channel.invalidate();
                self.connection_did_close();
            }
        }
    }

    fn handle_process_host_message(&self, message: IncomingMessage) {
        let Some(kind) = message.id.get::<ProcessHostKind>() else {
            warn!(
                "unknown ProcessHost kind {} dropped",
                message.id.kind_bits()
            );
            return;
        };
        if let Err(err) = self.decode_process_host_message(kind, &message) {
            warn!("dropping malformed {kind:?}: {err}");
        }
    }

    fn decode_process_host_message(
        &self,
        kind: ProcessHostKind,
        message: &IncomingMessage,
    ) -> Result<(), DecodeError> {
        let mut decoder = message.decoder();
        match kind {
            ProcessHostKind::AddBackForwardItem => {
                let page_id = decoder.read_u64()?;
                let item = decoder.decode::<BackForwardItemData>()?;
                let item_id = item.item_id;
                self.inner.items.lock().unwrap().insert(item_id, item);
                if let Some(page) = self.page(page_id) {
                    page.did_add_back_forward_item(item_id);
                }
            }
            ProcessHostKind::WentToBackForwardItem => {
                let page_id = decoder.read_u64()?;
                let item_id = decoder.read_u64()?;
                if let Some(page) = self.page(page_id) {
                    page.did_go_to_back_forward_item(item_id);
                }
            }
            ProcessHostKind::DidDestroyFrame => {
                let frame_id = decoder.read_u64()?;
                let page_id = self.inner.frames.lock().unwrap().remove(&frame_id);
                if let Some(page) = page_id.and_then(|id| self.page(id)) {
                    page.did_destroy_frame(frame_id);
                }
            }
        }
        Ok(())
    }
}

/// Channel client adapter; holds the proxy weakly so the channel's I/O
/// threads never keep a dead process alive.
struct ProcessProxyClient {
    process: Weak<ProcessProxyInner>,
}

impl ProcessProxyClient {
    fn proxy(&self) -> Option<ProcessProxy> {
        self.process.upgrade().map(|inner| ProcessProxy { inner })
    }
}

impl MessageClient for ProcessProxyClient {
    fn did_receive_message(&mut self, channel: &Channel, message: IncomingMessage) {
        if let Some(proxy) = self.proxy() {
            proxy.route_message(channel, message);
        }
    }

    fn did_receive_sync_message(
        &mut self,
        _channel: &Channel,
        message: IncomingMessage,
        _reply: &mut Encoder,
    ) {
        // No renderer->browser sync messages exist; release the peer with
        // an empty (failure) reply.
        warn!(
            "browser side received unexpected sync message {:#010x}",
            message.id.raw()
        );
    }

    fn did_close(&mut self, _channel: &Channel) {
        if let Some(proxy) = self.proxy() {
            proxy.connection_did_close();
        }
    }

    fn did_receive_invalid_message(&mut self, _channel: &Channel, id: MessageId) {
        warn!("invalid message {:#010x} from renderer", id.raw());
        if let Some(proxy) = self.proxy() {
            proxy.connection_did_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::transport;
    use crate::messages::PageKind;
    use crate::utils::LaunchError;

    struct NeverLauncher;

    impl ProcessLauncher for NeverLauncher {
        fn launch(&self, _options: &LaunchOptions) -> Result<TransportPair, LaunchError> {
            Err(LaunchError::Failed("no renderer available".into()))
        }
    }

    fn new_proxy() -> ProcessProxy {
        ProcessProxy::new(
            RunLoop::new("process-test"),
            Arc::new(NeverLauncher),
            LaunchOptions::default(),
            DEFAULT_RESPONSIVENESS_TIMEOUT,
        )
    }

    fn encoded(value: u64) -> Encoder {
        let mut encoder = Encoder::new();
        encoder.write_u64(value);
        encoder
    }

    #[test]
    fn test_messages_buffer_while_launching_and_flush_in_order() {
        let proxy = new_proxy();
        assert_eq!(proxy.phase(), LaunchPhase::Launching);
        for i in 0..3u64 {
            assert!(proxy.send_message(
                MessageId::of(PageKind::LoadUrl),
                7,
                encoded(i),
                true
            ));
        }

        let (browser_end, mut renderer_end) = transport::pair();
        proxy.did_finish_launching(browser_end);
        assert_eq!(proxy.phase(), LaunchPhase::Connected);
        proxy.send_message(MessageId::of(PageKind::Reload), 7, encoded(99), true);

        for expected in [0u64, 1, 2, 99] {
            let frame = renderer_end
                .receiver
                .receive_frame()
                .unwrap()
                .expect("frame missing");
            let value = u64::from_le_bytes(frame[12..20].try_into().unwrap());
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn test_failed_launch_closes() {
        let proxy = ProcessProxy::launch(
            RunLoop::new("fail"),
            Arc::new(NeverLauncher),
            LaunchOptions::default(),
            DEFAULT_RESPONSIVENESS_TIMEOUT,
        );
        assert_eq!(proxy.phase(), LaunchPhase::Closed);
        assert!(!proxy.send_message(
            MessageId::of(PageKind::Reload),
            1,
            Encoder::new(),
            true
        ));
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let proxy = new_proxy();
        let (browser_end, _renderer_end) = transport::pair();
        proxy.did_finish_launching(browser_end);
        proxy.terminate();
        proxy.terminate();
        assert_eq!(proxy.phase(), LaunchPhase::Closed);
    }

    #[test]
    fn test_sync_send_without_connection_returns_none() {
        let proxy = new_proxy();
        let reply = proxy.send_sync_message(
            MessageId::of_sync(PageKind::Reload),
            1,
            Encoder::new(),
            Duration::from_millis(50),
        );
        assert!(reply.is_none());
    }

    #[test]
    fn test_back_forward_items_survive_close() {
        let proxy = new_proxy();
        proxy.inner.items.lock().unwrap().insert(
            5,
            BackForwardItemData {
                item_id: 5,
                original_url: "https://a.test/".into(),
                url: "https://a.test/".into(),
                title: "A".into(),
            },
        );
        let (browser_end, _renderer_end) = transport::pair();
        proxy.did_finish_launching(browser_end);
        proxy.terminate();
        assert!(proxy.back_forward_item(5).is_some());
    }
}
