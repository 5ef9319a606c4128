//! Renderer process endpoint
//!
//! Owns the client end of the channel, creates and destroys pages on the
//! browser's request, and routes page-scoped traffic by destination. Also
//! mints the process-global ids (frames, history items, policy listeners,
//! edit commands) so they never collide across pages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};

use super::engine::PageEngine;
use super::page::{RendererPage, DISPLAY_COALESCE_DELAY};
use crate::ipc::{
    Channel, Encoder, IncomingMessage, MessageClass, MessageClient, MessageId, Role,
    TransportPair,
};
use crate::messages::{DrawingKind, PageKind, ProcessKind};
use crate::utils::{RunLoop, Timer};

/// Process-global id mint. Every id space starts at 1; 0 never names
/// anything.
pub(crate) struct IdAllocator {
    next_frame: AtomicU64,
    next_item: AtomicU64,
    next_listener: AtomicU64,
    next_command: AtomicU64,
}

impl IdAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next_frame: AtomicU64::new(0),
            next_item: AtomicU64::new(0),
            next_listener: AtomicU64::new(0),
            next_command: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_frame_id(&self) -> u64 {
        self.next_frame.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn next_item_id(&self) -> u64 {
        self.next_item.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn next_listener_id(&self) -> u64 {
        self.next_listener.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn next_command_id(&self) -> u64 {
        self.next_command.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct PageEntry {
    page: RendererPage,
    /// Coalesces display passes; fires on its own thread.
    display_timer: Timer,
}

struct RendererProcessInner {
    channel: Channel,
    pages: Mutex<HashMap<u64, PageEntry>>,
    ids: Arc<IdAllocator>,
    engine_factory: Box<dyn Fn() -> Box<dyn PageEngine> + Send + Sync>,
}

/// One renderer process. For out-of-process use this is the child's entire
/// world; the in-process launcher runs it on background threads instead.
#[derive(Clone)]
pub struct RendererProcess {
    inner: Arc<RendererProcessInner>,
}

impl RendererProcess {
    /// Wire a renderer up to its browser transport and start serving. The
    /// returned handle is only needed for shutdown and tests; the channel's
    /// threads keep the process alive.
    pub fn run<F>(transport: TransportPair, engine_factory: F) -> Self
    where
        F: Fn() -> Box<dyn PageEngine> + Send + Sync + 'static,
    {
        let run_loop = RunLoop::new("strix-renderer");
        let channel = Channel::new(Role::Client, run_loop);
        let process = Self {
            inner: Arc::new(RendererProcessInner {
                channel: channel.clone(),
                pages: Mutex::new(HashMap::new()),
                ids: Arc::new(IdAllocator::new()),
                engine_factory: Box::new(engine_factory),
            }),
        };
        let client = Arc::new(Mutex::new(RendererClient {
            process: Arc::downgrade(&process.inner),
        }));
        channel.open(transport, client);
        info!("renderer process running");
        process
    }

    pub fn is_running(&self) -> bool {
        self.inner.channel.is_valid()
    }

    pub fn page_count(&self) -> usize {
        self.inner.pages.lock().unwrap().len()
    }

    fn create_page(&self, page_id: u64, width: u32, height: u32) {
        debug!("creating renderer page {page_id} ({width}x{height})");
        let page = RendererPage::new(
            page_id,
            self.inner.channel.clone(),
            Arc::clone(&self.inner.ids),
            (self.inner.engine_factory)(),
            width,
            height,
        );
        let weak = Arc::downgrade(&self.inner);
        let display_timer = Timer::new(move || {
            if let Some(inner) = weak.upgrade() {
                RendererProcess { inner }.display_page(page_id);
            }
        });
        let mut pages = self.inner.pages.lock().unwrap();
        if pages
            .insert(page_id, PageEntry { page, display_timer })
            .is_some()
        {
            warn!("page {page_id} created twice");
        }
    }

    fn close_page(&self, page_id: u64) {
        debug!("closing renderer page {page_id}");
        if self.inner.pages.lock().unwrap().remove(&page_id).is_none() {
            debug!("close of unknown page {page_id}");
        }
    }

    fn display_page(&self, page_id: u64) {
        let mut pages = self.inner.pages.lock().unwrap();
        if let Some(entry) = pages.get_mut(&page_id) {
            entry.page.display();
        }
    }

    /// Run a page operation, then schedule a coalesced display pass if the
    /// operation produced damage.
    fn with_page(&self, page_id: u64, f: impl FnOnce(&mut RendererPage) -> bool) {
        let mut pages = self.inner.pages.lock().unwrap();
        let Some(entry) = pages.get_mut(&page_id) else {
            debug!("message for unknown page {page_id} dropped");
            return;
        };
        if f(&mut entry.page) && !entry.display_timer.is_active() {
            entry.display_timer.start(DISPLAY_COALESCE_DELAY);
        }
    }

    fn handle_message(&self, channel: &Channel, message: IncomingMessage) {
        let Some(class) = message.id.class() else {
            return;
        };
        match class {
            MessageClass::Process => self.handle_process_message(&message),
            MessageClass::Page => {
                let Some(kind) = message.id.get::<PageKind>() else {
                    warn!("unknown Page kind {} dropped", message.id.kind_bits());
                    return;
                };
                self.with_page(message.destination, |page| {
                    let mut decoder = message.decoder();
                    match page.handle_page_message(kind, &mut decoder) {
                        Ok(schedule) => schedule,
                        Err(err) => {
                            warn!("dropping malformed {kind:?}: {err}");
                            false
                        }
                    }
                });
            }
            MessageClass::Drawing => match message.id.get::<DrawingKind>() {
                Some(DrawingKind::DidUpdate) => {
                    self.with_page(message.destination, |page| page.did_update());
                }
                Some(DrawingKind::SetSize) => {
                    // SetSize only travels as a sync message.
                    warn!("async SetSize dropped");
                }
                None => warn!("unknown Drawing kind {} dropped", message.id.kind_bits()),
            },
            _ => {
                warn!("unexpected {class:?} message on the renderer side; invalidating");
                channel.invalidate();
            }
        }
    }

    fn handle_process_message(&self, message: &IncomingMessage) {
        let Some(kind) = message.id.get::<ProcessKind>() else {
            warn!("unknown Process kind {} dropped", message.id.kind_bits());
            return;
        };
        let mut decoder = message.decoder();
        let outcome: Result<(), crate::utils::DecodeError> = (|| {
            match kind {
                ProcessKind::CreatePage => {
                    let page_id = decoder.read_u64()?;
                    let width = decoder.read_u32()?;
                    let height = decoder.read_u32()?;
                    self.create_page(page_id, width, height);
                }
                ProcessKind::ClosePage => {
                    let page_id = decoder.read_u64()?;
                    self.close_page(page_id);
                }
                ProcessKind::Close => {
                    info!("renderer asked to exit");
                    self.inner.pages.lock().unwrap().clear();
                    self.inner.channel.invalidate();
                }
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            warn!("dropping malformed {kind:?}: {err}");
        }
    }

    fn handle_sync_message(&self, message: IncomingMessage, reply: &mut Encoder) {
        if message.id.class() != Some(MessageClass::Drawing)
            || message.id.get::<DrawingKind>() != Some(DrawingKind::SetSize)
        {
            // Empty reply releases the waiting browser thread.
            warn!("unexpected sync message {:#010x}", message.id.raw());
            return;
        }
        let mut decoder = message.decoder();
        let (width, height) = match (decoder.read_u32(), decoder.read_u32()) {
            (Ok(width), Ok(height)) => (width, height),
            _ => {
                warn!("dropping malformed SetSize");
                return;
            }
        };
        let mut pages = self.inner.pages.lock().unwrap();
        match pages.get_mut(&message.destination) {
            Some(entry) => {
                let chunk = entry.page.set_size(width, height);
                reply.encode(&chunk);
            }
            None => debug!("resize for unknown page {} dropped", message.destination),
        }
    }
}

struct RendererClient {
    process: Weak<RendererProcessInner>,
}

impl RendererClient {
    fn process(&self) -> Option<RendererProcess> {
        self.process.upgrade().map(|inner| RendererProcess { inner })
    }
}

impl MessageClient for RendererClient {
    fn did_receive_message(&mut self, channel: &Channel, message: IncomingMessage) {
        if let Some(process) = self.process() {
            process.handle_message(channel, message);
        }
    }

    fn did_receive_sync_message(
        &mut self,
        _channel: &Channel,
        message: IncomingMessage,
        reply: &mut Encoder,
    ) {
        if let Some(process) = self.process() {
            process.handle_sync_message(message, reply);
        }
    }

    fn did_close(&mut self, _channel: &Channel) {
        if let Some(process) = self.process() {
            info!("browser connection closed; renderer shutting down");
            process.inner.pages.lock().unwrap().clear();
        }
    }

    fn did_receive_invalid_message(&mut self, _channel: &Channel, id: MessageId) {
        warn!("invalid message {:#010x} from browser", id.raw());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::transport;
    use crate::renderer::engine::DefaultPageEngine;

    struct NullClient;

    impl MessageClient for NullClient {
        fn did_receive_message(&mut self, _: &Channel, _: IncomingMessage) {}
        fn did_receive_sync_message(&mut self, _: &Channel, _: IncomingMessage, _: &mut Encoder) {}
        fn did_close(&mut self, _: &Channel) {}
    }

    fn encoded_create_page(page_id: u64, width: u32, height: u32) -> Encoder {
        let mut encoder = Encoder::new();
        encoder.write_u64(page_id);
        encoder.write_u32(width);
        encoder.write_u32(height);
        encoder
    }

    /// Drive the renderer through a raw channel acting as the browser.
    #[test]
    fn test_create_and_close_page() {
        let (browser_end, renderer_end) = transport::pair();
        let process = RendererProcess::run(renderer_end, || {
            Box::new(DefaultPageEngine::new()) as Box<dyn PageEngine>
        });

        let browser = Channel::new(Role::Server, RunLoop::new("browser-test"));
        browser.open(
            browser_end,
            Arc::new(Mutex::new(NullClient)),
        );

        browser.send(
            MessageId::of(ProcessKind::CreatePage),
            0,
            encoded_create_page(1, 320, 240),
        );
        browser.send(
            MessageId::of(ProcessKind::CreatePage),
            0,
            encoded_create_page(2, 320, 240),
        );
        wait_until(|| process.page_count() == 2);

        let mut arguments = Encoder::new();
        arguments.write_u64(1);
        browser.send(MessageId::of(ProcessKind::ClosePage), 0, arguments);
        wait_until(|| process.page_count() == 1);
    }

    #[test]
    fn test_graceful_close_tears_everything_down() {
        let (browser_end, renderer_end) = transport::pair();
        let process = RendererProcess::run(renderer_end, || {
            Box::new(DefaultPageEngine::new()) as Box<dyn PageEngine>
        });

        let browser = Channel::new(Role::Server, RunLoop::new("browser-test"));
        browser.open(
            browser_end,
            Arc::new(Mutex::new(NullClient)),
        );

        browser.send(MessageId::of(ProcessKind::Close), 0, Encoder::new());
        wait_until(|| !process.is_running());
        assert_eq!(process.page_count(), 0);
    }

    fn wait_until(predicate: impl Fn() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("condition not reached in time");
    }
}
