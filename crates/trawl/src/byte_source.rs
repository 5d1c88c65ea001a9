//! 🚰 Byte sources: the two kinds of pipe, and the adapters between them.
//!
//! 🧠 Knowledge graph:
//! - **Seekable**: anything `Read + Seek` (a local file, a `Cursor` over a buffer). Gets full
//!   head/tail/probe sniffing.
//! - **Forward-only**: anything `Read` (a network body bridged out of tokio). Gets either a
//!   [`PeekedSource`] (look at the first bytes, then stitch them back on) or an explicit
//!   [`materialize`] into a seekable buffer when the caller can afford the memory.
//! - [`TransportReader`] tags errors that came from the *pipe* so that, after a decoder
//!   has wrapped them, we can still tell "the network died" from "the frame is garbage".
//!
//! No runtime capability probing. You pick the path by the type you hold. 🦆

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Chain, Cursor, Read, Seek};

use crate::errors::ObjectFailure;

/// 🔎 The seekable capability. Blanket-implemented; exists to make signatures say what they mean.
pub trait SeekableByteSource: Read + Seek {}
impl<T: Read + Seek> SeekableByteSource for T {}

/// ➡️ The forward-only capability. Also blanket-implemented. Also honest.
pub trait ForwardByteSource: Read {}
impl<T: Read> ForwardByteSource for T {}

/// 📥 The explicit "I give up on streaming" adapter: read everything into a seekable buffer.
pub fn materialize<R: ForwardByteSource>(mut source: R) -> io::Result<Cursor<Vec<u8>>> {
    let mut the_everything = Vec::new();
    source.read_to_end(&mut the_everything)?;
    Ok(Cursor::new(the_everything))
}

/// 👀 A forward-only source whose first bytes have been read ahead for sniffing.
///
/// `into_reader` chains the peeked bytes back in front of the rest, so whoever reads next
/// sees the exact original byte sequence. Nothing lost, nothing doubled.
#[derive(Debug)]
pub struct PeekedSource<R> {
    prefix: Vec<u8>,
    reached_eof: bool,
    rest: R,
}

impl<R: Read> PeekedSource<R> {
    /// 📏 Read up to `limit` bytes ahead. Short reads are retried until `limit` or EOF.
    pub fn peek(mut source: R, limit: usize) -> io::Result<Self> {
        let mut the_prefix = Vec::with_capacity(limit);
        (&mut source).take(limit as u64).read_to_end(&mut the_prefix)?;
        let the_eof = the_prefix.len() < limit;
        Ok(Self {
            prefix: the_prefix,
            reached_eof: the_eof,
            rest: source,
        })
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// ✅ True when the peek swallowed the whole source.
    pub fn reached_eof(&self) -> bool {
        self.reached_eof
    }

    pub fn into_reader(self) -> Chain<Cursor<Vec<u8>>, R> {
        Cursor::new(self.prefix).chain(self.rest)
    }
}

/// 🏷️ Marker payload for io errors that came from the transport, not the codec.
#[derive(Debug)]
pub(crate) struct TransportFault(String);

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for TransportFault {}

/// 📡 Wraps the raw body and tags every read error it produces as a [`TransportFault`].
#[derive(Debug)]
pub(crate) struct TransportReader<R> {
    inner: R,
}

impl<R> TransportReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for TransportReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::Interrupted {
                // -- EINTR is a retry, not a fault. read_to_end and friends know the drill
                return e;
            }
            io::Error::new(e.kind(), TransportFault(e.to_string()))
        })
    }
}

/// ⚖️ Decide who to blame for an io error that surfaced from the decode pipeline.
pub(crate) fn classify_read_error(err: &io::Error) -> ObjectFailure {
    let the_transport_fault = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<TransportFault>());
    match the_transport_fault {
        Some(fault) => ObjectFailure::Transport(fault.to_string()),
        None => ObjectFailure::Decode(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 🔌 A pipe that hands out a few bytes and then dies, like a cheap USB cable.
    struct FlakyPipe {
        remaining: usize,
    }

    impl Read for FlakyPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer hung up"));
            }
            let the_n = self.remaining.min(buf.len()).min(3);
            buf[..the_n].fill(b'x');
            self.remaining -= the_n;
            Ok(the_n)
        }
    }

    #[test]
    fn the_one_where_peeking_gives_every_byte_back_in_order() {
        let the_bytes: Vec<u8> = (0..=255u8).cycle().take(2000).collect();
        let the_peeked = PeekedSource::peek(Cursor::new(the_bytes.clone()), 512)
            .expect("💀 peeking a cursor should not fail");
        assert_eq!(the_peeked.prefix(), &the_bytes[..512]);
        assert!(!the_peeked.reached_eof());

        let mut the_round_trip = Vec::new();
        the_peeked
            .into_reader()
            .read_to_end(&mut the_round_trip)
            .expect("💀 reading the chained source should not fail");
        assert_eq!(the_round_trip, the_bytes);
    }

    #[test]
    fn the_one_where_a_short_source_is_swallowed_whole() {
        let the_peeked = PeekedSource::peek(Cursor::new(b"tiny".to_vec()), 512)
            .expect("💀 peeking a tiny cursor should not fail");
        assert!(the_peeked.reached_eof());
        assert_eq!(the_peeked.prefix(), b"tiny");
    }

    #[test]
    fn the_one_where_pipe_errors_are_blamed_on_the_pipe() {
        let mut the_reader = TransportReader::new(FlakyPipe { remaining: 5 });
        let mut the_sink = Vec::new();
        let the_err = the_reader
            .read_to_end(&mut the_sink)
            .expect_err("💀 the flaky pipe was supposed to fail");
        assert!(matches!(classify_read_error(&the_err), ObjectFailure::Transport(_)));

        let the_codec_err = io::Error::new(io::ErrorKind::InvalidData, "bad frame checksum");
        assert!(matches!(classify_read_error(&the_codec_err), ObjectFailure::Decode(_)));
    }

    #[test]
    fn the_one_where_materialize_makes_a_seekable_copy() {
        let mut the_cursor = materialize(&b"forward only, for now"[..])
            .expect("💀 materializing a byte slice should not fail");
        let the_end = the_cursor
            .seek(io::SeekFrom::End(0))
            .expect("💀 cursors can always seek");
        assert_eq!(the_end, 21);
    }
}
