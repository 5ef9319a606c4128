//! Integration tests for the Strix engine core
//!
//! Each test runs a real browser context against an in-process renderer:
//! both halves of the protocol, the channel, and the engine boundary are
//! exercised end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use url::Url;

use strix::browser::{
    BrowserContext, InProcessLauncher, PageClient, PageProxy, PolicyDelegate, PolicyListener,
};
use strix::ipc::{self, Channel, Encoder, IncomingMessage, MessageClient, MessageId, Role};
use strix::messages::{LoadError, NavigationType, PageHostKind, PageKind};
use strix::renderer::{DefaultPageEngine, LoadedPage, PageEngine};
use strix::utils::RunLoop;
use strix::CallbackResult;

const SETTLE: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq, Clone)]
enum Event {
    Started(String),
    Finished,
    Failed(i32),
    Title(String),
    ProcessExited,
}

struct RecordingClient {
    events: mpsc::Sender<Event>,
}

impl PageClient for RecordingClient {
    fn did_start_provisional_load(&mut self, _page: &PageProxy, _frame_id: u64, url: &str) {
        let _ = self.events.send(Event::Started(url.to_owned()));
    }

    fn did_finish_load(&mut self, _page: &PageProxy, _frame_id: u64) {
        let _ = self.events.send(Event::Finished);
    }

    fn did_fail_load(&mut self, _page: &PageProxy, _frame_id: u64, error: &LoadError) {
        let _ = self.events.send(Event::Failed(error.code));
    }

    fn did_receive_title(&mut self, _page: &PageProxy, title: &str) {
        let _ = self.events.send(Event::Title(title.to_owned()));
    }

    fn process_did_exit(&mut self, _page: &PageProxy) {
        let _ = self.events.send(Event::ProcessExited);
    }
}

fn new_context() -> BrowserContext {
    BrowserContext::new(Arc::new(InProcessLauncher::new(|| {
        Box::new(DefaultPageEngine::new())
    })))
}

fn recorded_page(context: &BrowserContext) -> (PageProxy, mpsc::Receiver<Event>) {
    let page = context.create_page(320, 240);
    let (tx, rx) = mpsc::channel();
    page.set_client(Box::new(RecordingClient { events: tx }));
    (page, rx)
}

fn wait_for(rx: &mpsc::Receiver<Event>, wanted: &Event) {
    let deadline = Instant::now() + SETTLE;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) if event == *wanted => return,
            Ok(_) => continue,
            Err(_) => panic!("never saw {wanted:?}"),
        }
    }
}

#[test]
fn test_load_commits_title_history_and_finish() {
    let context = new_context();
    let (page, events) = recorded_page(&context);

    page.load_url("https://example.test/").unwrap();
    wait_for(&events, &Event::Started("https://example.test/".into()));
    wait_for(&events, &Event::Title("example.test".into()));
    wait_for(&events, &Event::Finished);

    assert_eq!(page.url().as_deref(), Some("https://example.test/"));
    assert!(!page.is_loading());
    assert!(!page.can_go_back());

    page.load_url("https://second.test/").unwrap();
    wait_for(&events, &Event::Finished);
    assert!(page.can_go_back());

    let item_id = page.current_back_forward_item().expect("no current item");
    let item = page.back_forward_item(item_id).expect("no item payload");
    assert_eq!(item.url, "https://second.test/");
}

#[test]
fn test_back_and_forward_traverse_committed_items() {
    let context = new_context();
    let (page, events) = recorded_page(&context);

    for url in ["https://a.test/", "https://b.test/"] {
        page.load_url(url).unwrap();
        wait_for(&events, &Event::Finished);
    }

    page.go_back();
    wait_for(&events, &Event::Finished);
    assert_eq!(page.url().as_deref(), Some("https://a.test/"));
    assert!(page.can_go_forward());

    page.go_forward();
    wait_for(&events, &Event::Finished);
    assert_eq!(page.url().as_deref(), Some("https://b.test/"));
    assert!(!page.can_go_forward());
}

#[test]
fn test_engine_failure_is_an_ordinary_load_error() {
    let context = new_context();
    let (page, events) = recorded_page(&context);

    page.load_url("https://unreachable.test/x").unwrap();
    wait_for(&events, &Event::Failed(-1001));
    // The channel survived the failure.
    assert!(context.process().unwrap().is_connected());
}

struct BlockingDelegate;

impl PolicyDelegate for BlockingDelegate {
    fn decide_policy_for_navigation_action(
        &mut self,
        _page: &PageProxy,
        _frame_id: u64,
        url: &str,
        _navigation_type: NavigationType,
        listener: PolicyListener,
    ) {
        if url.contains("blocked") {
            listener.ignore();
        } else {
            listener.allow();
        }
    }
}

#[test]
fn test_policy_delegate_can_reject_navigations() {
    let context = new_context();
    let (page, events) = recorded_page(&context);
    page.set_policy_delegate(Box::new(BlockingDelegate));

    page.load_url("https://blocked.test/").unwrap();
    wait_for(&events, &Event::Failed(-999));

    page.load_url("https://allowed.test/").unwrap();
    wait_for(&events, &Event::Finished);
    assert_eq!(page.url().as_deref(), Some("https://allowed.test/"));
}

#[test]
fn test_run_javascript_value_and_failure() {
    let context = new_context();
    let (page, events) = recorded_page(&context);
    page.load_url("https://example.test/").unwrap();
    wait_for(&events, &Event::Finished);

    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    page.run_javascript("1 + 1", move |result| {
        let _ = tx.send(result);
    });
    assert_eq!(
        rx.recv_timeout(SETTLE).unwrap(),
        CallbackResult::Value("evaluated:1 + 1".into())
    );

    page.run_javascript("throw new Error()", move |result| {
        let _ = tx2.send(result);
    });
    assert_eq!(rx.recv_timeout(SETTLE).unwrap(), CallbackResult::Failure);
}

#[test]
fn test_source_and_render_tree_callbacks() {
    let context = new_context();
    let (page, events) = recorded_page(&context);
    page.load_url("https://example.test/").unwrap();
    wait_for(&events, &Event::Finished);

    let frame_id = page.main_frame_id().expect("no main frame");
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    page.get_source_for_frame(frame_id, move |result| {
        let _ = tx.send(result);
    });
    match rx.recv_timeout(SETTLE).unwrap() {
        CallbackResult::Value(source) => assert!(source.contains("<title>example.test</title>")),
        other => panic!("unexpected source result {other:?}"),
    }

    page.get_render_tree(move |result| {
        let _ = tx2.send(result);
    });
    match rx.recv_timeout(SETTLE).unwrap() {
        CallbackResult::Value(tree) => assert!(tree.starts_with("RenderView")),
        other => panic!("unexpected render tree result {other:?}"),
    }
}

/// Engine whose evaluation never finishes, so callbacks stay outstanding
/// until the process dies.
struct StuckEngine {
    inner: DefaultPageEngine,
}

impl PageEngine for StuckEngine {
    fn load(&mut self, url: &Url) -> Result<LoadedPage, LoadError> {
        self.inner.load(url)
    }

    fn evaluate(&mut self, _script: &str) -> Option<String> {
        thread::sleep(Duration::from_secs(30));
        None
    }

    fn document_source(&self) -> Option<String> {
        self.inner.document_source()
    }

    fn render_tree(&self) -> Option<String> {
        self.inner.render_tree()
    }

    fn paint(&self, rect: &strix::messages::Rect) -> Vec<u8> {
        self.inner.paint(rect)
    }
}

#[test]
fn test_terminate_cancels_outstanding_callbacks() {
    let context = BrowserContext::new(Arc::new(InProcessLauncher::new(|| {
        Box::new(StuckEngine {
            inner: DefaultPageEngine::new(),
        })
    })));
    let (page, events) = recorded_page(&context);
    page.load_url("https://example.test/").unwrap();
    wait_for(&events, &Event::Finished);

    let (tx, rx) = mpsc::channel();
    page.run_javascript("anything", move |result| {
        let _ = tx.send(result);
    });
    assert!(rx.try_recv().is_err());

    context.terminate_process();
    assert_eq!(rx.recv_timeout(SETTLE).unwrap(), CallbackResult::Cancelled);
    wait_for(&events, &Event::ProcessExited);
}

#[test]
fn test_page_revives_after_process_termination() {
    let context = new_context();
    let (page, events) = recorded_page(&context);
    page.load_url("https://before.test/").unwrap();
    wait_for(&events, &Event::Finished);

    context.terminate_process();
    wait_for(&events, &Event::ProcessExited);
    assert!(!page.is_running());
    // History ids outlive the process.
    assert!(page.current_back_forward_item().is_some());

    page.load_url("https://after.test/").unwrap();
    wait_for(&events, &Event::Finished);
    assert_eq!(page.url().as_deref(), Some("https://after.test/"));
    assert!(page.is_running());
}

#[test]
fn test_set_size_repaints_synchronously() {
    let context = new_context();
    let (page, events) = recorded_page(&context);
    page.load_url("https://example.test/").unwrap();
    wait_for(&events, &Event::Finished);

    page.set_size(64, 32);
    let surface = page.surface();
    assert_eq!((surface.width, surface.height), (64, 32));
    // The resize reply carried a full repaint of the document.
    assert_eq!(surface.get_pixel(63, 31).unwrap()[3], 255);
}

#[test]
fn test_commit_paints_through_update_chunks() {
    let context = new_context();
    let (page, events) = recorded_page(&context);
    page.load_url("https://example.test/").unwrap();
    wait_for(&events, &Event::Finished);

    // The commit schedules a coalesced display pass; poll for its arrival.
    let deadline = Instant::now() + SETTLE;
    loop {
        if page.surface().get_pixel(0, 0).unwrap()[3] == 255 {
            break;
        }
        assert!(Instant::now() < deadline, "no paint arrived");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_undo_stack_tracks_renderer_edits() {
    let context = new_context();
    let (page, events) = recorded_page(&context);
    page.load_url("https://example.test/").unwrap();
    wait_for(&events, &Event::Finished);
    assert!(!page.can_undo());

    page.key_event(strix::messages::KeyEventData {
        kind: strix::messages::KeyEventKind::Down,
        key_code: 65,
        text: "a".into(),
    });
    let deadline = Instant::now() + SETTLE;
    while !page.can_undo() {
        assert!(Instant::now() < deadline, "edit command never registered");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(page.undo_label().as_deref(), Some("Typing"));

    page.undo();
    assert!(page.can_redo());

    // A committed navigation clears the document's commands.
    page.load_url("https://next.test/").unwrap();
    wait_for(&events, &Event::Finished);
    let deadline = Instant::now() + SETTLE;
    while page.can_undo() || page.can_redo() {
        assert!(Instant::now() < deadline, "edit commands never cleared");
        thread::sleep(Duration::from_millis(10));
    }
}

// -- channel-level properties -----------------------------------------------

struct CollectingClient {
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    count: Arc<AtomicUsize>,
}

impl MessageClient for CollectingClient {
    fn did_receive_message(&mut self, _channel: &Channel, message: IncomingMessage) {
        self.received.lock().unwrap().push(message.payload);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn did_receive_sync_message(
        &mut self,
        _channel: &Channel,
        _message: IncomingMessage,
        _reply: &mut Encoder,
    ) {
    }

    fn did_close(&mut self, _channel: &Channel) {}
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever the payloads, one-way messages arrive complete and in
    /// send order.
    #[test]
    fn test_channel_preserves_order_and_content(payloads in prop::collection::vec(
        prop::collection::vec(any::<u8>(), 0..256),
        1..32,
    )) {
        let (server_end, client_end) = ipc::transport::pair();
        let server = Channel::new(Role::Server, RunLoop::new("prop-server"));
        let client = Channel::new(Role::Client, RunLoop::new("prop-client"));

        let received = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        server.open(server_end, Arc::new(Mutex::new(CollectingClient {
            received: Arc::clone(&received),
            count: Arc::clone(&count),
        })));
        client.open(client_end, Arc::new(Mutex::new(CollectingClient {
            received: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicUsize::new(0)),
        })));

        for payload in &payloads {
            let mut encoder = Encoder::new();
            encoder.write_bytes(payload);
            prop_assert!(client.send(MessageId::of(PageHostKind::DidFinishLoad), 1, encoder));
        }

        let deadline = Instant::now() + SETTLE;
        while count.load(Ordering::SeqCst) < payloads.len() {
            prop_assert!(Instant::now() < deadline, "messages never arrived");
            thread::sleep(Duration::from_millis(2));
        }

        let received = received.lock().unwrap();
        for (sent, got) in payloads.iter().zip(received.iter()) {
            let mut encoder = Encoder::new();
            encoder.write_bytes(sent);
            prop_assert_eq!(&encoder.finish(), got);
        }
    }
}

#[test]
fn test_closing_one_page_leaves_others_alone() {
    let context = new_context();
    let (first, first_events) = recorded_page(&context);
    let (second, second_events) = recorded_page(&context);

    first.load_url("https://one.test/").unwrap();
    wait_for(&first_events, &Event::Finished);
    second.load_url("https://two.test/").unwrap();
    wait_for(&second_events, &Event::Finished);

    first.close();

    second.reload();
    wait_for(&second_events, &Event::Finished);
    assert_eq!(second.url().as_deref(), Some("https://two.test/"));
}

#[test]
fn test_page_scoped_kinds_never_collide_across_classes() {
    // Kind numbering is per class; the same bits under different classes
    // must resolve to different ids.
    let page = MessageId::of(PageKind::StopLoading);
    let host = MessageId::of(PageHostKind::DidCreateSubframe);
    assert_eq!(page.kind_bits(), host.kind_bits());
    assert_ne!(page.raw(), host.raw());
}
