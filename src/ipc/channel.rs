//! Bidirectional message channel
//!
//! One channel per process pair. Two execution contexts: the I/O context
//! (a send thread draining the outgoing queue and a receive thread parsing
//! frames) and the client context (a run loop where handlers execute). Sync
//! replies are satisfied directly from the receive thread so a blocked
//! synchronous caller never depends on a possibly-busy run loop; everything
//! else is marshaled to the run loop in arrival order.
//!
//! Lock discipline: the outgoing-queue mutex and the sync-state mutex are
//! leaf locks and are never held at the same time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use super::codec::{Decoder, Encoder};
use super::message::{ChannelKind, IncomingMessage, MessageClass, MessageId, OutgoingMessage};
use super::transport::{TransportPair, TransportReceiver, TransportSender};
use crate::utils::RunLoop;

/// Frame header: MessageId (u32) + destination (u64).
const HEADER_LEN: usize = 12;

/// Which end of the process pair created this channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The browser-process end.
    Server,
    /// The renderer-process end.
    Client,
}

/// Handlers for incoming traffic. Invoked on the channel's run loop except
/// where noted; a channel reference is passed so handlers can respond.
pub trait MessageClient: Send {
    fn did_receive_message(&mut self, channel: &Channel, message: IncomingMessage);

    /// Must fill `reply` before returning; whatever it contains (possibly
    /// nothing, signalling failure) is sent back to release the waiting
    /// peer.
    fn did_receive_sync_message(
        &mut self,
        channel: &Channel,
        message: IncomingMessage,
        reply: &mut Encoder,
    );

    /// The underlying transport was lost (crash and graceful exit look the
    /// same). Fired at most once per channel.
    fn did_close(&mut self, channel: &Channel);

    /// A frame arrived whose class this receiver never expects. The
    /// connection has already been invalidated when this runs.
    fn did_receive_invalid_message(&mut self, _channel: &Channel, _id: MessageId) {}
}

/// A decoded-on-demand synchronous reply payload.
pub struct Reply {
    payload: Vec<u8>,
}

impl Reply {
    pub fn decoder(&self) -> Decoder<'_> {
        Decoder::new(&self.payload)
    }

    /// An empty reply is the peer's failure signal for a sync request it
    /// could not decode or fulfill.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

enum PendingSync {
    Waiting,
    Replied(Vec<u8>),
}

#[derive(Default)]
struct SyncState {
    /// sync-request id -> reply slot
    pending: HashMap<u64, PendingSync>,
    /// (message id bits, destination) pairs with a sync call outstanding
    in_flight: HashSet<(u32, u64)>,
    /// `wait_for` slots keyed by (message id bits, destination)
    waits: HashMap<(u32, u64), Option<IncomingMessage>>,
}

struct ChannelInner {
    role: Role,
    run_loop: RunLoop,
    valid: AtomicBool,
    opened: AtomicBool,
    close_reported: AtomicBool,
    next_sync_id: AtomicU64,
    queue: Mutex<VecDeque<OutgoingMessage>>,
    outgoing_cv: Condvar,
    sync: Mutex<SyncState>,
    sync_cv: Condvar,
    /// Called from the I/O context whenever a sync reply arrives; used by
    /// the process proxy to feed its responsiveness check without taking
    /// the client lock.
    activity_observer: Mutex<Option<Box<dyn Fn() + Send>>>,
}

/// A typed, bidirectional, framed message channel. Cheap to clone; all
/// clones refer to the same endpoint.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Create a channel in the given role. I/O does not start until
    /// [`Channel::open`]; sends issued before then queue in order.
    pub fn new(role: Role, run_loop: RunLoop) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                role,
                run_loop,
                valid: AtomicBool::new(true),
                opened: AtomicBool::new(false),
                close_reported: AtomicBool::new(false),
                next_sync_id: AtomicU64::new(0),
                queue: Mutex::new(VecDeque::new()),
                outgoing_cv: Condvar::new(),
                sync: Mutex::new(SyncState::default()),
                sync_cv: Condvar::new(),
                activity_observer: Mutex::new(None),
            }),
        }
    }

    /// Begin I/O over `transport`, delivering to `client`.
    pub fn open(&self, transport: TransportPair, client: Arc<Mutex<dyn MessageClient>>) {
        assert!(
            !self.inner.opened.swap(true, Ordering::SeqCst),
            "channel opened twice"
        );
        debug!("channel opened in {:?} role", self.inner.role);

        let TransportPair { sender, receiver } = transport;

        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("strix-ipc-send".into())
            .spawn(move || send_loop(inner, sender))
            .expect("failed to spawn ipc send thread");

        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("strix-ipc-recv".into())
            .spawn(move || receive_loop(inner, receiver, client))
            .expect("failed to spawn ipc receive thread");
    }

    /// Queue a one-way message. Returns false (and drops the message
    /// silently apart from a log line) if the channel is no longer valid.
    pub fn send(&self, id: MessageId, destination: u64, arguments: Encoder) -> bool {
        self.inner.send_payload(id, destination, arguments.finish())
    }

    /// Queue an already-serialized message (launch-buffer flushing).
    pub(crate) fn send_message(&self, message: OutgoingMessage) -> bool {
        self.inner
            .send_payload(message.id, message.destination, message.payload)
    }

    /// Send a synchronous message and block the calling thread until a
    /// matching reply arrives, the channel closes, or `timeout` elapses.
    ///
    /// At most one synchronous call per (id, destination) may be
    /// outstanding from this endpoint; violating that is a programmer
    /// error. Reentrant sync sends from inside a dispatch handler are fine:
    /// replies are fulfilled by the receive thread, never by the run loop
    /// this call may be blocking.
    pub fn send_sync(
        &self,
        id: MessageId,
        destination: u64,
        arguments: Encoder,
        timeout: Duration,
    ) -> Option<Reply> {
        assert!(id.is_sync(), "send_sync requires a sync-flagged message id");
        let sync_id = self.inner.next_sync_id.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut sync = self.inner.sync.lock().unwrap();
            assert!(
                sync.in_flight.insert((id.raw(), destination)),
                "synchronous call already outstanding for id {:#010x} destination {destination}",
                id.raw()
            );
            sync.pending.insert(sync_id, PendingSync::Waiting);
        }

        let mut payload = Encoder::new();
        payload.write_u64(sync_id);
        payload.append(arguments);

        let reply = if self.inner.send_payload(id, destination, payload.finish()) {
            self.inner.wait_for_sync_reply(sync_id, timeout)
        } else {
            None
        };

        {
            let mut sync = self.inner.sync.lock().unwrap();
            sync.pending.remove(&sync_id);
            sync.in_flight.remove(&(id.raw(), destination));
        }

        reply.map(|payload| Reply { payload })
    }

    /// Block for a specific *unsolicited* incoming message (not a sync
    /// reply). A matching frame is handed to this waiter from the I/O
    /// context and is not dispatched to the message client.
    pub fn wait_for(
        &self,
        id: MessageId,
        destination: u64,
        timeout: Duration,
    ) -> Option<IncomingMessage> {
        let key = (id.raw(), destination);
        let deadline = Instant::now() + timeout;

        let mut sync = self.inner.sync.lock().unwrap();
        assert!(
            !sync.waits.contains_key(&key),
            "already waiting for id {:#010x} destination {destination}",
            id.raw()
        );
        sync.waits.insert(key, None);

        loop {
            if sync.waits.get(&key).is_some_and(|slot| slot.is_some()) {
                return sync.waits.remove(&key).flatten();
            }
            let now = Instant::now();
            if !self.inner.valid.load(Ordering::SeqCst) || now >= deadline {
                sync.waits.remove(&key);
                return None;
            }
            let (guard, _) = self
                .inner
                .sync_cv
                .wait_timeout(sync, deadline - now)
                .unwrap();
            sync = guard;
        }
    }

    /// Terminal and idempotent: after this, every send is a silent no-op
    /// and every blocked waiter returns empty-handed.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }

    /// Register a hook called from the I/O context whenever a sync reply
    /// arrives from the peer.
    pub fn set_sync_activity_observer<F>(&self, observer: F)
    where
        F: Fn() + Send + 'static,
    {
        *self.inner.activity_observer.lock().unwrap() = Some(Box::new(observer));
    }

    fn from_inner(inner: &Arc<ChannelInner>) -> Self {
        Self {
            inner: Arc::clone(inner),
        }
    }
}

impl ChannelInner {
    fn send_payload(&self, id: MessageId, destination: u64, payload: Vec<u8>) -> bool {
        if !self.valid.load(Ordering::SeqCst) {
            debug!(
                "dropping send of {:#010x} to {destination}: channel invalid",
                id.raw()
            );
            return false;
        }
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(OutgoingMessage {
            id,
            destination,
            payload,
        });
        self.outgoing_cv.notify_one();
        true
    }

    fn wait_for_sync_reply(&self, sync_id: u64, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut sync = self.sync.lock().unwrap();
        loop {
            if matches!(sync.pending.get(&sync_id), Some(PendingSync::Replied(_))) {
                match sync.pending.remove(&sync_id) {
                    Some(PendingSync::Replied(payload)) => return Some(payload),
                    _ => unreachable!(),
                }
            }
            let now = Instant::now();
            if !self.valid.load(Ordering::SeqCst) || now >= deadline {
                return None;
            }
            let (guard, _) = self.sync_cv.wait_timeout(sync, deadline - now).unwrap();
            sync = guard;
        }
    }

    fn invalidate(&self) {
        if !self.valid.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("channel ({:?} role) invalidated", self.role);
        {
            let mut queue = self.queue.lock().unwrap();
            queue.clear();
            self.outgoing_cv.notify_all();
        }
        {
            let _sync = self.sync.lock().unwrap();
            self.sync_cv.notify_all();
        }
    }

    /// Returns false when the receive loop should stop without reporting a
    /// transport close (protocol-invariant violation path).
    fn process_incoming(
        self: &Arc<Self>,
        frame: Vec<u8>,
        client: &Arc<Mutex<dyn MessageClient>>,
    ) -> bool {
        if frame.len() < HEADER_LEN {
            warn!("dropping undersized frame ({} bytes)", frame.len());
            return true;
        }
        let id = MessageId::from_raw(u32::from_le_bytes(frame[0..4].try_into().unwrap()));
        let destination = u64::from_le_bytes(frame[4..12].try_into().unwrap());
        let payload = frame[HEADER_LEN..].to_vec();

        let Some(class) = id.class() else {
            return self.handle_invalid_message(id, client);
        };

        if class == MessageClass::Channel {
            if id.get::<ChannelKind>() == Some(ChannelKind::SyncReply) {
                self.fulfill_sync_reply(destination, payload);
                return true;
            }
            return self.handle_invalid_message(id, client);
        }

        // A wait_for in progress claims the frame before normal dispatch.
        {
            let mut sync = self.sync.lock().unwrap();
            if let Some(slot) = sync.waits.get_mut(&(id.raw(), destination)) {
                if slot.is_none() {
                    *slot = Some(IncomingMessage {
                        id,
                        destination,
                        payload,
                    });
                    self.sync_cv.notify_all();
                    return true;
                }
            }
        }

        if id.is_sync() {
            if payload.len() < 8 {
                warn!(
                    "dropping sync message {:#010x} with no request id",
                    id.raw()
                );
                return true;
            }
            let sync_request_id = u64::from_le_bytes(payload[0..8].try_into().unwrap());
            let message = IncomingMessage {
                id,
                destination,
                payload: payload[8..].to_vec(),
            };
            let channel = Channel::from_inner(self);
            let client = Arc::clone(client);
            self.run_loop.dispatch(move || {
                let mut reply = Encoder::new();
                client
                    .lock()
                    .unwrap()
                    .did_receive_sync_message(&channel, message, &mut reply);
                channel.inner.send_payload(
                    MessageId::of(ChannelKind::SyncReply),
                    sync_request_id,
                    reply.finish(),
                );
            });
        } else {
            let message = IncomingMessage {
                id,
                destination,
                payload,
            };
            let channel = Channel::from_inner(self);
            let client = Arc::clone(client);
            self.run_loop.dispatch(move || {
                if !channel.is_valid() {
                    return;
                }
                client
                    .lock()
                    .unwrap()
                    .did_receive_message(&channel, message);
            });
        }
        true
    }

    fn fulfill_sync_reply(&self, sync_id: u64, payload: Vec<u8>) {
        {
            let mut sync = self.sync.lock().unwrap();
            match sync.pending.get_mut(&sync_id) {
                Some(slot @ PendingSync::Waiting) => {
                    trace!("sync reply for request {sync_id}");
                    *slot = PendingSync::Replied(payload);
                    self.sync_cv.notify_all();
                }
                _ => debug!("stale sync reply for request {sync_id} dropped"),
            }
        }
        let observer = self.activity_observer.lock().unwrap();
        if let Some(observer) = observer.as_ref() {
            observer();
        }
    }

    fn handle_invalid_message(
        self: &Arc<Self>,
        id: MessageId,
        client: &Arc<Mutex<dyn MessageClient>>,
    ) -> bool {
        warn!(
            "message {:#010x} has a class this endpoint never expects; invalidating connection",
            id.raw()
        );
        self.invalidate();
        let channel = Channel::from_inner(self);
        let client = Arc::clone(client);
        self.run_loop.dispatch(move || {
            client
                .lock()
                .unwrap()
                .did_receive_invalid_message(&channel, id);
        });
        false
    }

    fn report_close(self: &Arc<Self>, client: &Arc<Mutex<dyn MessageClient>>) {
        if self.close_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("channel ({:?} role) connection closed", self.role);
        self.invalidate();
        let channel = Channel::from_inner(self);
        let client = Arc::clone(client);
        self.run_loop.dispatch(move || {
            client.lock().unwrap().did_close(&channel);
        });
    }
}

fn encode_frame(message: &OutgoingMessage) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + message.payload.len());
    frame.extend_from_slice(&message.id.raw().to_le_bytes());
    frame.extend_from_slice(&message.destination.to_le_bytes());
    frame.extend_from_slice(&message.payload);
    frame
}

fn send_loop(inner: Arc<ChannelInner>, mut sender: Box<dyn TransportSender>) {
    loop {
        let message = {
            let mut queue = inner.queue.lock().unwrap();
            loop {
                if !inner.valid.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(message) = queue.pop_front() {
                    break message;
                }
                queue = inner.outgoing_cv.wait(queue).unwrap();
            }
        };
        let frame = encode_frame(&message);
        if let Err(err) = sender.send_frame(&frame) {
            debug!("channel write failed ({err}); peer is gone");
            inner.invalidate();
            return;
        }
        trace!(
            "sent {:#010x} to {} ({} byte payload)",
            message.id.raw(),
            message.destination,
            message.payload.len()
        );
    }
}

fn receive_loop(
    inner: Arc<ChannelInner>,
    mut receiver: Box<dyn TransportReceiver>,
    client: Arc<Mutex<dyn MessageClient>>,
) {
    loop {
        let frame = match receiver.receive_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                warn!("channel transport error: {err}");
                break;
            }
        };
        if !inner.valid.load(Ordering::SeqCst) {
            break;
        }
        if !inner.process_incoming(frame, &client) {
            // Protocol violation: invalidated without a transport close.
            return;
        }
    }
    inner.report_close(&client);
}
