//! Argument blob encoding
//!
//! A payload is a flat, ordered sequence of encoded arguments with no
//! self-describing schema: fixed-width little-endian scalars, length-prefixed
//! strings and byte buffers, aggregates encoded field by field. Encoder and
//! decoder agree on the argument shape per message kind by construction; the
//! decoder bounds-checks every read and never panics on hostile input.

use crate::utils::DecodeError;

/// Serializes arguments into a payload buffer.
#[derive(Default)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Length-prefixed raw byte buffer.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    /// Length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Encode any wire-encodable value.
    pub fn encode<T: ArgumentCoder>(&mut self, value: &T) {
        value.encode(self);
    }

    /// Append another encoder's buffer verbatim (no length prefix).
    pub fn append(&mut self, other: Encoder) {
        self.buffer.extend_from_slice(&other.buffer);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Bounds-checked reader over a received payload.
pub struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < wanted {
            return Err(DecodeError::UnexpectedEof {
                wanted,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + wanted];
        self.offset += wanted;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue("bool")),
        }
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn decode<T: ArgumentCoder>(&mut self) -> Result<T, DecodeError> {
        T::decode(self)
    }
}

/// A value with an agreed wire encoding.
pub trait ArgumentCoder: Sized {
    fn encode(&self, encoder: &mut Encoder);
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError>;
}

macro_rules! scalar_coder {
    ($ty:ty, $write:ident, $read:ident) => {
        impl ArgumentCoder for $ty {
            fn encode(&self, encoder: &mut Encoder) {
                encoder.$write(*self);
            }

            fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
                decoder.$read()
            }
        }
    };
}

scalar_coder!(u8, write_u8, read_u8);
scalar_coder!(u16, write_u16, read_u16);
scalar_coder!(u32, write_u32, read_u32);
scalar_coder!(u64, write_u64, read_u64);
scalar_coder!(i32, write_i32, read_i32);
scalar_coder!(i64, write_i64, read_i64);
scalar_coder!(f64, write_f64, read_f64);
scalar_coder!(bool, write_bool, read_bool);

impl ArgumentCoder for String {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_str(self);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        decoder.read_str()
    }
}

impl<T: ArgumentCoder> ArgumentCoder for Option<T> {
    fn encode(&self, encoder: &mut Encoder) {
        match self {
            Some(value) => {
                encoder.write_bool(true);
                value.encode(encoder);
            }
            None => encoder.write_bool(false),
        }
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        if decoder.read_bool()? {
            Ok(Some(T::decode(decoder)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: ArgumentCoder> ArgumentCoder for Vec<T> {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u32(self.len() as u32);
        for item in self {
            item.encode(encoder);
        }
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let count = decoder.read_u32()? as usize;
        // Count is attacker-controlled; cap the up-front reservation.
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::decode(decoder)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let mut encoder = Encoder::new();
        encoder.write_u32(0xdead_beef);
        encoder.write_u64(42);
        encoder.write_bool(true);
        encoder.write_f64(1.5);
        let payload = encoder.finish();

        let mut decoder = Decoder::new(&payload);
        assert_eq!(decoder.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(decoder.read_u64().unwrap(), 42);
        assert!(decoder.read_bool().unwrap());
        assert_eq!(decoder.read_f64().unwrap(), 1.5);
        assert!(decoder.is_exhausted());
    }

    #[test]
    fn test_string_roundtrip() {
        let mut encoder = Encoder::new();
        encoder.write_str("https://example.test/päge");
        let payload = encoder.finish();
        let mut decoder = Decoder::new(&payload);
        assert_eq!(decoder.read_str().unwrap(), "https://example.test/päge");
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let mut encoder = Encoder::new();
        encoder.write_u64(7);
        let payload = encoder.finish();
        let mut decoder = Decoder::new(&payload[..5]);
        assert!(matches!(
            decoder.read_u64(),
            Err(DecodeError::UnexpectedEof { wanted: 8, remaining: 5 })
        ));
    }

    #[test]
    fn test_lying_length_prefix_is_error() {
        let mut encoder = Encoder::new();
        encoder.write_u32(1000); // claims 1000 bytes follow
        encoder.write_u8(1);
        let payload = encoder.finish();
        let mut decoder = Decoder::new(&payload);
        assert!(decoder.read_bytes().is_err());
    }

    #[test]
    fn test_invalid_utf8_is_error() {
        let mut encoder = Encoder::new();
        encoder.write_bytes(&[0xff, 0xfe]);
        let payload = encoder.finish();
        let mut decoder = Decoder::new(&payload);
        assert_eq!(decoder.read_str(), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn test_option_and_vec_coders() {
        let mut encoder = Encoder::new();
        encoder.encode(&Some(9u64));
        encoder.encode(&None::<String>);
        encoder.encode(&vec![1u32, 2, 3]);
        let payload = encoder.finish();

        let mut decoder = Decoder::new(&payload);
        assert_eq!(decoder.decode::<Option<u64>>().unwrap(), Some(9));
        assert_eq!(decoder.decode::<Option<String>>().unwrap(), None);
        assert_eq!(decoder.decode::<Vec<u32>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bad_bool_tag() {
        let payload = [7u8];
        let mut decoder = Decoder::new(&payload);
        assert_eq!(
            decoder.read_bool(),
            Err(DecodeError::InvalidValue("bool"))
        );
    }
}
