//! Inter-process communication substrate
//!
//! Custom binary RPC between the browser process and renderer processes:
//! - Message envelope: packed {class, kind, flags} identifiers
//! - Codec: flat, ordered argument blobs with no self-describing schema
//! - Transport: in-process pair or length-prefixed byte stream
//! - Channel: queued one-way sends, blocking synchronous calls, dispatch

pub mod channel;
pub mod codec;
pub mod message;
pub mod transport;

pub use channel::{Channel, MessageClient, Reply, Role};
pub use codec::{ArgumentCoder, Decoder, Encoder};
pub use message::{
    ChannelKind, IncomingMessage, MessageClass, MessageId, MessageKind, OutgoingMessage,
};
pub use transport::{TransportPair, TransportReceiver, TransportSender};
