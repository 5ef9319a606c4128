//! Message envelope
//!
//! A `MessageId` packs {class, kind} into the low 24 bits of a `u32`
//! (kind: bits 0-15, class: bits 16-23) and flags into the high 8 bits.
//! Pure value type; every frame on the wire starts with one.

/// Flag bit marking a message as synchronous (the sender blocks for a reply).
const SYNC_FLAG: u32 = 1 << 24;

/// Message classes, one per protocol endpoint pair.
///
/// `*Host` classes flow from the renderer process to the browser process;
/// the unsuffixed classes flow the other way. `Channel` is reserved for the
/// channel's own traffic (sync replies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageClass {
    Channel = 0,
    Process = 1,
    ProcessHost = 2,
    Page = 3,
    PageHost = 4,
    Drawing = 5,
    DrawingHost = 6,
}

impl MessageClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Channel),
            1 => Some(Self::Process),
            2 => Some(Self::ProcessHost),
            3 => Some(Self::Page),
            4 => Some(Self::PageHost),
            5 => Some(Self::Drawing),
            6 => Some(Self::DrawingHost),
            _ => None,
        }
    }
}

/// A kind enum belonging to exactly one message class.
///
/// Implemented by the per-class enums in [`crate::messages`]; ties each kind
/// value to its class so dispatch tables are looked up by one packed integer.
pub trait MessageKind: Copy {
    const CLASS: MessageClass;

    fn raw(self) -> u16;
    fn from_raw(raw: u16) -> Option<Self>;
}

/// Packed {class, kind, flags} message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(u32);

impl MessageId {
    /// Identifier for an asynchronous (one-way) message.
    pub fn of<K: MessageKind>(kind: K) -> Self {
        Self(((K::CLASS as u32) << 16) | u32::from(kind.raw()))
    }

    /// Identifier for a synchronous message.
    pub fn of_sync<K: MessageKind>(kind: K) -> Self {
        Self(Self::of(kind).0 | SYNC_FLAG)
    }

    /// Reconstruct from wire bits. Validity is checked at dispatch, not here.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// The stored class, if the class bits are meaningful.
    pub fn class(self) -> Option<MessageClass> {
        MessageClass::from_u8(((self.0 >> 16) & 0xff) as u8)
    }

    pub fn kind_bits(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn is_sync(self) -> bool {
        self.0 & SYNC_FLAG != 0
    }

    /// Whether this identifier belongs to `K`'s class.
    pub fn is<K: MessageKind>(self) -> bool {
        self.class() == Some(K::CLASS)
    }

    /// Decode the kind as `K`.
    ///
    /// Panics if the stored class is not `K::CLASS` -- asking for the wrong
    /// enum is a programmer error, not peer data. An unknown kind *within*
    /// the right class is peer data and comes back as `None`.
    pub fn get<K: MessageKind>(self) -> Option<K> {
        assert_eq!(
            self.class(),
            Some(K::CLASS),
            "message class mismatch: id {:#010x} decoded as {:?}",
            self.0,
            K::CLASS
        );
        K::from_raw(self.kind_bits())
    }
}

/// The channel's own message kinds, invisible above the channel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Reply to a synchronous request; the frame's destination carries the
    /// originating sync-request id.
    SyncReply,
}

impl MessageKind for ChannelKind {
    const CLASS: MessageClass = MessageClass::Channel;

    fn raw(self) -> u16 {
        match self {
            Self::SyncReply => 1,
        }
    }

    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::SyncReply),
            _ => None,
        }
    }
}

/// A message queued for transmission. The payload is owned exclusively by
/// whichever queue currently holds the message.
#[derive(Debug)]
pub struct OutgoingMessage {
    pub id: MessageId,
    pub destination: u64,
    pub payload: Vec<u8>,
}

/// A message received from the peer, header already parsed.
#[derive(Debug)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub destination: u64,
    pub payload: Vec<u8>,
}

impl IncomingMessage {
    pub fn decoder(&self) -> crate::ipc::codec::Decoder<'_> {
        crate::ipc::codec::Decoder::new(&self.payload)
    }
}
