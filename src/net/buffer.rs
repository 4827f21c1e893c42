//! Packet buffer implementation
//!
//! Provides a byte buffer for the wire protocol with:
//! - Big-endian integer reads and writes
//! - Smart encoding for small counts (1 or 2 bytes)
//! - Length-prefixed strings and byte blobs
//!
//! Every read is bounds-checked and fails with
//! [`ProtocolError::MalformedPacket`] instead of yielding garbage.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Largest value `write_smart` can encode
pub const MAX_SMART: u16 = 0x7FFF;

type ReadResult<T> = std::result::Result<T, ProtocolError>;

/// Packet buffer for reading and writing protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Current read position
    read_pos: usize,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Create a packet buffer from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    // ============ Properties ============

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the written bytes into a cheaply clonable frame
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    // ============ Reading Methods ============

    fn take(&mut self, count: usize) -> ReadResult<&[u8]> {
        if self.remaining() < count {
            return Err(ProtocolError::MalformedPacket(format!(
                "needed {} bytes at offset {}, {} remaining",
                count,
                self.read_pos,
                self.remaining()
            )));
        }
        let start = self.read_pos;
        self.read_pos += count;
        Ok(&self.data[start..start + count])
    }

    fn take_array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read an unsigned byte
    pub fn read_ubyte(&mut self) -> ReadResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Read a big-endian signed short
    pub fn read_short(&mut self) -> ReadResult<i16> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian signed int
    pub fn read_int(&mut self) -> ReadResult<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian unsigned long
    pub fn read_ulong(&mut self) -> ReadResult<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    /// Read a smart: one byte below 128, otherwise two bytes with the high bit set
    pub fn read_smart(&mut self) -> ReadResult<u16> {
        let first = self.read_ubyte()?;
        if first < 128 {
            Ok(first as u16)
        } else {
            let second = self.read_ubyte()?;
            Ok((((first & 0x7F) as u16) << 8) | second as u16)
        }
    }

    /// Read a ushort-length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> ReadResult<String> {
        let len = u16::from_be_bytes(self.take_array()?) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::MalformedPacket("string is not UTF-8".to_string()))
    }

    /// Read a uint-length-prefixed byte blob
    pub fn read_blob(&mut self) -> ReadResult<Vec<u8>> {
        let len = u32::from_be_bytes(self.take_array()?) as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, length: usize) -> ReadResult<Vec<u8>> {
        Ok(self.take(length)?.to_vec())
    }

    /// Take everything left
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let rest = self.data[self.read_pos.min(self.data.len())..].to_vec();
        self.read_pos = self.data.len();
        rest
    }

    // ============ Writing Methods ============

    pub fn write_ubyte(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn write_short(&mut self, value: i16) {
        self.data.put_i16(value);
    }

    pub fn write_int(&mut self, value: i32) {
        self.data.put_i32(value);
    }

    pub fn write_ulong(&mut self, value: u64) {
        self.data.put_u64(value);
    }

    /// Write a smart (values above [`MAX_SMART`] are clamped)
    pub fn write_smart(&mut self, value: u16) {
        let value = value.min(MAX_SMART);
        if value < 128 {
            self.data.put_u8(value as u8);
        } else {
            self.data.put_u16(value | 0x8000);
        }
    }

    /// Write a ushort-length-prefixed UTF-8 string (truncated to 65535 bytes)
    pub fn write_string(&mut self, value: &str) {
        let mut end = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.data.put_u16(end as u16);
        self.data.put_slice(&value.as_bytes()[..end]);
    }

    /// Write a uint-length-prefixed byte blob
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.data.put_u32(bytes.len() as u32);
        self.data.put_slice(bytes);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }
}
