//! Buffered wire transport: big-endian framing over TCP streams and UDP
//! datagrams.
//!
//! Both transports expose the same capability, split into a read half
//! ([`ReadBuffer`]) and a write half ([`WriteBuffer`]) because every buffer
//! instance is used in one direction only. The TCP buffers coalesce bytes:
//! reads refill from the stream on demand and writes flush when the buffer
//! would overflow. The UDP buffers honor datagram boundaries: `force_receive`
//! pulls exactly one datagram, `force_send` emits exactly one, and running
//! out of bytes mid-message is an immediate error rather than more I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use thiserror::Error;

/// Largest payload a single UDP datagram can carry.
pub const UDP_BUFFER_SIZE: usize = 65507;
/// Working buffer size for TCP streams.
pub const TCP_BUFFER_SIZE: usize = 2048;

/// Everything that can go wrong on the wire.
#[derive(Debug, Error)]
pub enum WireError {
    /// Stream EOF, or a datagram too short for the message it carries.
    #[error("not enough buffered data to read from")]
    BadRead,
    /// Encoding would overflow the buffer or a length prefix.
    #[error("not enough buffer space to write to")]
    BadWrite,
    /// A variant tag outside the declared range.
    #[error("message type resolution failed (tag {0})")]
    BadType(u8),
    /// Transport failure underneath the buffer.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Read half of the buffer capability.
pub trait ReadBuffer {
    /// Makes the transport's next message available where the transport has
    /// message boundaries; a no-op on streams.
    fn force_receive(&mut self) -> Result<(), WireError>;
    fn read_u8(&mut self) -> Result<u8, WireError>;
    fn read_u16(&mut self) -> Result<u16, WireError>;
    fn read_u32(&mut self) -> Result<u32, WireError>;
    fn read_str(&mut self, len: usize) -> Result<String, WireError>;
}

/// Write half of the buffer capability.
pub trait WriteBuffer {
    fn write_u8(&mut self, value: u8) -> Result<(), WireError>;
    fn write_u16(&mut self, value: u16) -> Result<(), WireError>;
    fn write_u32(&mut self, value: u32) -> Result<(), WireError>;
    /// Raw bytes; the caller writes whatever length prefix applies.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError>;
    /// Pushes everything buffered so far onto the transport.
    fn force_send(&mut self) -> Result<(), WireError>;
}

/// A value with a fixed binary layout on the wire.
pub trait Wire: Sized {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError>;
    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError>;
}

/// Coalescing reader over any byte stream.
pub struct TcpReadBuffer<R> {
    inner: R,
    buf: Box<[u8]>,
    left: usize,
    right: usize,
}

impl<R: Read> TcpReadBuffer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0; TCP_BUFFER_SIZE].into_boxed_slice(),
            left: 0,
            right: 0,
        }
    }

    /// Ensures at least `bytes` readable bytes are buffered, compacting the
    /// unread span `[left, right)` to the front when the request would run
    /// past the end of the buffer.
    fn pull(&mut self, bytes: usize) -> Result<(), WireError> {
        debug_assert!(bytes <= self.buf.len());
        if self.left + bytes > self.buf.len() {
            self.buf.copy_within(self.left..self.right, 0);
            self.right -= self.left;
            self.left = 0;
        }
        while self.right - self.left < bytes {
            match self.inner.read(&mut self.buf[self.right..]) {
                Ok(0) => return Err(WireError::BadRead),
                Ok(read) => self.right += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WireError::Io(e)),
            }
        }
        Ok(())
    }

    fn take(&mut self, bytes: usize) -> &[u8] {
        let start = self.left;
        self.left += bytes;
        &self.buf[start..self.left]
    }
}

impl<R: Read> ReadBuffer for TcpReadBuffer<R> {
    fn force_receive(&mut self) -> Result<(), WireError> {
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        self.pull(1)?;
        Ok(self.take(1)[0])
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        self.pull(2)?;
        let bytes = self.take(2);
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        self.pull(4)?;
        let bytes = self.take(4);
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_str(&mut self, len: usize) -> Result<String, WireError> {
        self.pull(len)?;
        let bytes = self.take(len).to_vec();
        String::from_utf8(bytes).map_err(|_| WireError::BadRead)
    }
}

/// Coalescing writer over any byte stream.
pub struct TcpWriteBuffer<W> {
    inner: W,
    buf: Box<[u8]>,
    filled: usize,
}

impl<W: Write> TcpWriteBuffer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: vec![0; TCP_BUFFER_SIZE].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Makes room for `bytes` more bytes, flushing buffered output first if
    /// appending them would overflow.
    fn push(&mut self, bytes: usize) -> Result<(), WireError> {
        if self.filled + bytes > self.buf.len() {
            self.drain()?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), WireError> {
        if self.filled > 0 {
            self.inner.write_all(&self.buf[..self.filled])?;
            self.filled = 0;
        }
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) {
        self.buf[self.filled..self.filled + bytes.len()].copy_from_slice(bytes);
        self.filled += bytes.len();
    }
}

impl<W: Write> WriteBuffer for TcpWriteBuffer<W> {
    fn write_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.push(1)?;
        self.append(&[value]);
        Ok(())
    }

    fn write_u16(&mut self, value: u16) -> Result<(), WireError> {
        self.push(2)?;
        self.append(&value.to_be_bytes());
        Ok(())
    }

    fn write_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.push(4)?;
        self.append(&value.to_be_bytes());
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        // Chunked so a payload larger than the buffer still streams through.
        for chunk in bytes.chunks(self.buf.len()) {
            self.push(chunk.len())?;
            self.append(chunk);
        }
        Ok(())
    }

    fn force_send(&mut self) -> Result<(), WireError> {
        self.drain()?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Datagram reader: one `force_receive` per message, no implicit I/O.
pub struct UdpReadBuffer {
    socket: Arc<UdpSocket>,
    buf: Box<[u8]>,
    left: usize,
    right: usize,
}

impl UdpReadBuffer {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            buf: vec![0; UDP_BUFFER_SIZE].into_boxed_slice(),
            left: 0,
            right: 0,
        }
    }

    fn pull(&self, bytes: usize) -> Result<(), WireError> {
        if self.right - self.left < bytes {
            return Err(WireError::BadRead);
        }
        Ok(())
    }

    fn take(&mut self, bytes: usize) -> &[u8] {
        let start = self.left;
        self.left += bytes;
        &self.buf[start..self.left]
    }
}

impl ReadBuffer for UdpReadBuffer {
    /// Exactly one datagram receive; the datagram is the message and any
    /// bytes left unread when the next receive happens are discarded.
    fn force_receive(&mut self) -> Result<(), WireError> {
        loop {
            match self.socket.recv(&mut self.buf) {
                Ok(received) => {
                    self.left = 0;
                    self.right = received;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WireError::Io(e)),
            }
        }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        self.pull(1)?;
        Ok(self.take(1)[0])
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        self.pull(2)?;
        let bytes = self.take(2);
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        self.pull(4)?;
        let bytes = self.take(4);
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_str(&mut self, len: usize) -> Result<String, WireError> {
        self.pull(len)?;
        let bytes = self.take(len).to_vec();
        String::from_utf8(bytes).map_err(|_| WireError::BadRead)
    }
}

/// Datagram writer: everything written between `force_send`s becomes one
/// datagram addressed to `peer`.
pub struct UdpWriteBuffer {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    buf: Box<[u8]>,
    filled: usize,
}

impl UdpWriteBuffer {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            buf: vec![0; UDP_BUFFER_SIZE].into_boxed_slice(),
            filled: 0,
        }
    }

    fn push(&self, bytes: usize) -> Result<(), WireError> {
        if self.buf.len() - self.filled < bytes {
            return Err(WireError::BadWrite);
        }
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) {
        self.buf[self.filled..self.filled + bytes.len()].copy_from_slice(bytes);
        self.filled += bytes.len();
    }
}

impl WriteBuffer for UdpWriteBuffer {
    fn write_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.push(1)?;
        self.append(&[value]);
        Ok(())
    }

    fn write_u16(&mut self, value: u16) -> Result<(), WireError> {
        self.push(2)?;
        self.append(&value.to_be_bytes());
        Ok(())
    }

    fn write_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.push(4)?;
        self.append(&value.to_be_bytes());
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.push(bytes.len())?;
        self.append(bytes);
        Ok(())
    }

    fn force_send(&mut self) -> Result<(), WireError> {
        self.socket.send_to(&self.buf[..self.filled], self.peer)?;
        self.filled = 0;
        Ok(())
    }
}

impl Wire for u8 {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        reader.read_u8()
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        writer.write_u8(*self)
    }
}

impl Wire for u16 {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        reader.read_u16()
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        writer.write_u16(*self)
    }
}

impl Wire for u32 {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        reader.read_u32()
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        writer.write_u32(*self)
    }
}

/// Strings carry a single length byte, so anything longer than 255 bytes is
/// unencodable and rejected before any I/O happens.
impl Wire for String {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        let len = reader.read_u8()?;
        reader.read_str(usize::from(len))
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        let len = u8::try_from(self.len()).map_err(|_| WireError::BadWrite)?;
        writer.write_u8(len)?;
        writer.write_bytes(self.as_bytes())
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        let len = reader.read_u32()?;
        // No up-front reservation: the length prefix is peer-controlled, so
        // memory grows only as elements actually decode.
        let mut items = Vec::new();
        for _ in 0..len {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        let len = u32::try_from(self.len()).map_err(|_| WireError::BadWrite)?;
        writer.write_u32(len)?;
        for item in self {
            item.encode(writer)?;
        }
        Ok(())
    }
}

/// Maps travel as a u32 count followed by key/value pairs, emitted in
/// ascending key order.
impl<K: Wire + Ord, V: Wire> Wire for BTreeMap<K, V> {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        let len = reader.read_u32()?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::decode(reader)?;
            let value = V::decode(reader)?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        let len = u32::try_from(self.len()).map_err(|_| WireError::BadWrite)?;
        writer.write_u32(len)?;
        for (key, value) in self {
            key.encode(writer)?;
            value.encode(writer)?;
        }
        Ok(())
    }
}

/// Sets travel exactly like lists, emitted in ascending order.
impl<T: Wire + Ord> Wire for BTreeSet<T> {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        let len = reader.read_u32()?;
        let mut set = BTreeSet::new();
        for _ in 0..len {
            set.insert(T::decode(reader)?);
        }
        Ok(set)
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        let len = u32::try_from(self.len()).map_err(|_| WireError::BadWrite)?;
        writer.write_u32(len)?;
        for item in self {
            item.encode(writer)?;
        }
        Ok(())
    }
}
