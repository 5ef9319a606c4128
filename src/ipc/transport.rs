//! Transport endpoints
//!
//! Two flavors with one logical contract (exactly one complete, ordered
//! frame per send): an in-process message-boundary-preserving pair, and a
//! length-prefixed framing layer over any byte stream (socket, pipe).

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};

/// Upper bound on a single frame; anything larger is a hostile or broken
/// peer and closes the connection.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write half of a transport.
pub trait TransportSender: Send {
    /// Send one complete frame. An error means the peer is gone.
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
    /// Block for the next complete frame. `Ok(None)` means the peer closed.
    fn receive_frame(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// One endpoint of a transport: paired send and receive halves.
pub struct TransportPair {
    pub sender: Box<dyn TransportSender>,
    pub receiver: Box<dyn TransportReceiver>,
}

struct PairSender {
    tx: Sender<Vec<u8>>,
}

impl TransportSender for PairSender {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer endpoint dropped"))
    }
}

struct PairReceiver {
    rx: Receiver<Vec<u8>>,
}

impl TransportReceiver for PairReceiver {
    fn receive_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.rx.recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(_) => Ok(None),
        }
    }
}

/// Create a connected in-process endpoint pair. Frames are handed off whole,
/// never copied through a byte stream.
pub fn pair() -> (TransportPair, TransportPair) {
    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();

    let a = TransportPair {
        sender: Box::new(PairSender { tx: tx_b }),
        receiver: Box::new(PairReceiver { rx: rx_a }),
    };
    let b = TransportPair {
        sender: Box::new(PairSender { tx: tx_a }),
        receiver: Box::new(PairReceiver { rx: rx_b }),
    };
    (a, b)
}

/// Length-prefixed frame writer over a byte stream.
pub struct StreamSender<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> StreamSender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> TransportSender for StreamSender<W> {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let len = frame.len() as u32;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(frame)?;
        self.writer.flush()
    }
}

/// Length-prefixed frame reader over a byte stream. Partial reads continue
/// until the frame completes; EOF at a frame boundary is a clean close, EOF
/// mid-frame is transport loss (also a close, never a per-frame error).
pub struct StreamReceiver<R: Read + Send> {
    reader: R,
}

impl<R: Read + Send> StreamReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read + Send> TransportReceiver for StreamReceiver<R> {
    fn receive_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut header = [0u8; 4];
        if let Err(err) = self.reader.read_exact(&mut header) {
            return match err.kind() {
                io::ErrorKind::UnexpectedEof => Ok(None),
                _ => Err(err),
            };
        }
        let len = u32::from_le_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {len} exceeds limit"),
            ));
        }
        let mut frame = vec![0u8; len];
        match self.reader.read_exact(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            // Mid-frame EOF: the peer died while writing.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_delivers_frames_in_order() {
        let (mut a, mut b) = pair();
        a.sender.send_frame(b"first").unwrap();
        a.sender.send_frame(b"second").unwrap();
        assert_eq!(b.receiver.receive_frame().unwrap().unwrap(), b"first");
        assert_eq!(b.receiver.receive_frame().unwrap().unwrap(), b"second");
    }

    #[test]
    fn test_pair_close_on_drop() {
        let (a, mut b) = pair();
        drop(a);
        assert!(b.receiver.receive_frame().unwrap().is_none());
    }

    #[test]
    fn test_pair_send_after_peer_drop_is_broken_pipe() {
        let (mut a, b) = pair();
        drop(b);
        assert_eq!(
            a.sender.send_frame(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_stream_framing_roundtrip() {
        let mut buffer = Vec::new();
        {
            let mut sender = StreamSender::new(&mut buffer);
            sender.send_frame(b"hello").unwrap();
            sender.send_frame(b"").unwrap();
            sender.send_frame(b"world!").unwrap();
        }
        let mut receiver = StreamReceiver::new(io::Cursor::new(buffer));
        assert_eq!(receiver.receive_frame().unwrap().unwrap(), b"hello");
        assert_eq!(receiver.receive_frame().unwrap().unwrap(), b"");
        assert_eq!(receiver.receive_frame().unwrap().unwrap(), b"world!");
        assert!(receiver.receive_frame().unwrap().is_none());
    }

    #[test]
    fn test_stream_partial_frame_is_close() {
        let mut buffer = Vec::new();
        {
            let mut sender = StreamSender::new(&mut buffer);
            sender.send_frame(b"truncated payload").unwrap();
        }
        buffer.truncate(buffer.len() - 3);
        let mut receiver = StreamReceiver::new(io::Cursor::new(buffer));
        assert!(receiver.receive_frame().unwrap().is_none());
    }

    #[test]
    fn test_stream_oversized_frame_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut receiver = StreamReceiver::new(io::Cursor::new(buffer));
        assert!(receiver.receive_frame().is_err());
    }
}
