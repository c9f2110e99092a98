//! Buffer management for received output

use bytes::{Buf, BytesMut};

/// Control byte the capture process sends to announce end of stream.
pub const EOF_MARKER: u8 = 0x04;

/// Unconsumed output received from the target.
///
/// Incoming chunks are appended; a successful match consumes everything up
/// to the end of the match. Nothing is discarded otherwise, so a buffer that
/// is never matched against grows with the output.
#[derive(Debug, Default)]
pub struct ExpectBuffer {
    buffer: BytesMut,
}

impl ExpectBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append data to the buffer
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get the buffer as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the buffer as text, replacing invalid UTF-8
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Get the current buffer length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop the first `end` bytes
    pub fn consume(&mut self, end: usize) {
        self.buffer.advance(end.min(self.buffer.len()));
    }

    /// Remove and return everything
    pub fn take(&mut self) -> BytesMut {
        self.buffer.split()
    }
}

/// Split a received chunk at the end-of-stream marker.
///
/// Returns the bytes before the marker and whether the marker was present.
/// Anything after the marker is discarded.
pub fn split_eof_marker(chunk: &[u8]) -> (&[u8], bool) {
    match chunk.iter().position(|&b| b == EOF_MARKER) {
        Some(pos) => (&chunk[..pos], true),
        None => (chunk, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer() {
        let buffer = ExpectBuffer::new();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.as_bytes().is_empty());
    }

    #[test]
    fn test_multiple_appends() {
        let mut buffer = ExpectBuffer::new();
        buffer.append(b"Hello ");
        buffer.append(b"World");
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.as_bytes(), b"Hello World");
    }

    #[test]
    fn test_consume() {
        let mut buffer = ExpectBuffer::new();
        buffer.append(b"Hello World");
        buffer.consume(6);
        assert_eq!(buffer.as_bytes(), b"World");

        buffer.consume(100);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_take_empties_buffer() {
        let mut buffer = ExpectBuffer::new();
        buffer.append(b"left over");
        let taken = buffer.take();
        assert_eq!(&taken[..], b"left over");
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_empty_append() {
        let mut buffer = ExpectBuffer::new();
        buffer.append(b"");
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_utf8_handling() {
        let mut buffer = ExpectBuffer::new();
        buffer.append("Hello 世界! 🎉".as_bytes());
        assert_eq!(buffer.to_string_lossy(), "Hello 世界! 🎉");
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buffer = ExpectBuffer::new();
        buffer.append(&[b'a', 0xFF, b'b']);
        assert_eq!(buffer.to_string_lossy(), "a\u{FFFD}b");
        assert_eq!(buffer.as_bytes(), &[b'a', 0xFF, b'b']);
    }

    #[test]
    fn test_split_eof_marker() {
        assert_eq!(split_eof_marker(b"done\r\n"), (&b"done\r\n"[..], false));
        assert_eq!(split_eof_marker(b"done\x04junk"), (&b"done"[..], true));
        assert_eq!(split_eof_marker(b"\x04"), (&b""[..], true));
    }
}
