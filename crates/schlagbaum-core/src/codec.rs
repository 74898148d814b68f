//! Newline-framed line protocol codec.
//!
//! Bytes arriving from the transport are appended with [`LineCodec::extend`];
//! [`LineCodec::next_frame`] yields at most one complete record per call and
//! never consumes bytes of a record whose terminator has not arrived yet.
//! A TLS read may deliver several bundled records at once, or half of one;
//! both cases are handled by keeping the remainder buffered.

/// Record terminator.
pub const TERMINATOR: u8 = b'\n';

/// Maximum record length accepted by the server.
pub const SERVER_MAX_RECORD: usize = 1024;

/// Maximum record length accepted by the client.
pub const CLIENT_MAX_RECORD: usize = 8192;

/// Protocol violations detected while framing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// `max_len` bytes arrived without a terminator.
    #[error("record exceeds {max_len} bytes without terminator")]
    TooLong { max_len: usize },
}

/// Buffers a byte stream and splits it into newline-terminated records.
#[derive(Debug)]
pub struct LineCodec {
    buf: Vec<u8>,
    max_len: usize,
}

impl LineCodec {
    /// `max_len` counts the terminator.
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_len.min(4096)),
            max_len,
        }
    }

    /// Append freshly read transport bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for a terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete record with its terminator stripped.
    ///
    /// Returns `Ok(None)` when no terminator has arrived within the first
    /// `max_len` bytes yet. Once `max_len` bytes are buffered without one
    /// the stream is unrecoverable and [`FrameError::TooLong`] is returned;
    /// nothing of that record is ever handed out.
    pub fn next_frame(&mut self) -> Result<Option<String>, FrameError> {
        let window = self.buf.len().min(self.max_len);
        match self.buf[..window].iter().position(|&b| b == TERMINATOR) {
            Some(end) => {
                let record: Vec<u8> = self.buf.drain(..=end).collect();
                let token = String::from_utf8_lossy(&record[..end]).into_owned();
                Ok(Some(token))
            }
            None if self.buf.len() >= self.max_len => Err(FrameError::TooLong {
                max_len: self.max_len,
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_record_is_not_consumed() {
        let mut codec = LineCodec::new(SERVER_MAX_RECORD);
        codec.extend(b"op");
        assert_eq!(codec.next_frame().unwrap(), None);
        assert_eq!(codec.buffered(), 2);

        codec.extend(b"en\n");
        assert_eq!(codec.next_frame().unwrap().as_deref(), Some("open"));
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn bundled_records_come_out_one_per_call() {
        let mut codec = LineCodec::new(SERVER_MAX_RECORD);
        codec.extend(b"open\nclose\nsir");
        assert_eq!(codec.next_frame().unwrap().as_deref(), Some("open"));
        assert_eq!(codec.next_frame().unwrap().as_deref(), Some("close"));
        assert_eq!(codec.next_frame().unwrap(), None);
        assert_eq!(codec.buffered(), 3);
    }

    #[test]
    fn empty_record_is_a_frame() {
        let mut codec = LineCodec::new(SERVER_MAX_RECORD);
        codec.extend(b"\n");
        assert_eq!(codec.next_frame().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn terminator_exactly_at_limit_is_accepted() {
        let mut codec = LineCodec::new(8);
        codec.extend(b"1234567\n");
        assert_eq!(codec.next_frame().unwrap().as_deref(), Some("1234567"));
    }

    #[test]
    fn oversized_record_is_rejected_without_partial_dispatch() {
        let mut codec = LineCodec::new(8);
        codec.extend(b"12345678");
        assert_eq!(
            codec.next_frame(),
            Err(FrameError::TooLong { max_len: 8 })
        );
        // Terminator arriving late does not resurrect the record.
        codec.extend(b"\n");
        assert!(codec.next_frame().is_err());
    }

    #[test]
    fn terminator_beyond_limit_does_not_count() {
        let mut codec = LineCodec::new(4);
        codec.extend(b"abcdef\n");
        assert!(codec.next_frame().is_err());
    }

    #[test]
    fn invalid_utf8_is_framed_lossily() {
        let mut codec = LineCodec::new(SERVER_MAX_RECORD);
        codec.extend(&[0xff, b'x', b'\n']);
        let frame = codec.next_frame().unwrap().unwrap();
        assert!(frame.ends_with('x'));
        assert!(frame.parse::<crate::Command>().is_err());
    }
}
