//! 🗜️ StreamDecoder: squished bytes in, lines out, one pull at a time.
//!
//! 🎬 *[the snappy frame arrives. 'sNaPpY', it announces, like a wrestler entering the ring.]*
//! *[the decoder nods. it has seen ten thousand of these. it will see ten thousand more.]*
//!
//! Lazy, forward-only, single-pass. The decoder wraps whatever `Read` it is handed and
//! never materialises the whole output; the consumer pulls lines as fast as it can write
//! them. If you need it all in memory anyway, that's [`crate::byte_source::materialize`]'s
//! job, upstream, on purpose.
//!
//! 🧠 Knowledge graph:
//! - `ContainerCodec::SnappyFramed` → `snap::read::FrameDecoder` (the `.snz` corpus)
//! - `ContainerCodec::Gzip` → `flate2::read::MultiGzDecoder` (concatenated members welcome)
//! - `ContainerCodec::Identity` → the bytes, as-is, for already-plain NDJSON
//! - Errors: transport-tagged io errors → `ObjectFailure::Transport`, everything else the
//!   codec spits out → `ObjectFailure::Decode`.

use std::io::{BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use snap::read::FrameDecoder;

use crate::byte_source::classify_read_error;
use crate::errors::ObjectFailure;

/// 📦 64 KiB read buffer for the decoded side. Big enough to amortise, small enough to not care.
const DECODED_BUFFER_BYTES: usize = 64 * 1024;

/// 🏷️ Which container the objects are wrapped in. Known up front, from config.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerCodec {
    #[default]
    SnappyFramed,
    Gzip,
    Identity,
}

impl ContainerCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SnappyFramed => "snappy_framed",
            Self::Gzip => "gzip",
            Self::Identity => "identity",
        }
    }

    /// 🔄 Wrap a raw byte stream in the matching decoder. Nothing is read yet.
    pub fn decode<'a, R>(self, raw: R) -> DecodedStream<'a>
    where
        R: Read + Send + 'a,
    {
        let the_decoder: Box<dyn Read + Send + 'a> = match self {
            Self::SnappyFramed => Box::new(FrameDecoder::new(raw)),
            Self::Gzip => Box::new(MultiGzDecoder::new(raw)),
            Self::Identity => Box::new(raw),
        };
        DecodedStream {
            inner: BufReader::with_capacity(DECODED_BUFFER_BYTES, the_decoder),
            bytes_out: 0,
        }
    }
}

/// 🚿 The decoded side of the pipe. Pull lines until it says zero.
pub struct DecodedStream<'a> {
    inner: BufReader<Box<dyn Read + Send + 'a>>,
    bytes_out: u64,
}

impl std::fmt::Debug for DecodedStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- the boxed decoder doesn't Debug, and nobody wants to read its internals anyway
        f.debug_struct("DecodedStream")
            .field("bytes_out", &self.bytes_out)
            .finish()
    }
}

impl DecodedStream<'_> {
    /// 📄 Append the next line (terminator included, if there was one) to `buf`.
    ///
    /// Returns the number of bytes appended; `0` means the stream is done. Raw bytes, not
    /// `String`, because the decoder has no business deciding what's valid UTF-8.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize, ObjectFailure> {
        let the_n = self
            .inner
            .read_until(b'\n', buf)
            .map_err(|e| classify_read_error(&e))?;
        self.bytes_out += the_n as u64;
        Ok(the_n)
    }

    /// 📊 Decoded bytes handed out so far.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// 🥤 Drain the rest into a Vec. Tests and tiny objects only, please.
    pub fn read_to_end(mut self) -> Result<Vec<u8>, ObjectFailure> {
        let mut the_everything = Vec::new();
        self.inner
            .read_to_end(&mut the_everything)
            .map_err(|e| classify_read_error(&e))?;
        Ok(the_everything)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    use flate2::Compression;
    use flate2::write::GzEncoder;

    const THE_TRIPS: &str = "{\"trip_id\":1,\"dropoff_datetime\":\"2016-01-01T05:33:00.000Z\"}\n\
                             {\"trip_id\":2,\"dropoff_datetime\":\"2016-01-01T05:34:00.000Z\"}\n\
                             {\"trip_id\":3,\"dropoff_datetime\":\"2016-01-01T05:35:00.000Z\"}";

    fn snappy(plain: &[u8]) -> Vec<u8> {
        let mut the_encoder = snap::write::FrameEncoder::new(Vec::new());
        the_encoder
            .write_all(plain)
            .expect("💀 snappy encoder refused bytes");
        the_encoder
            .into_inner()
            .expect("💀 snappy encoder refused to finish")
    }

    fn gzip(plain: &[u8]) -> Vec<u8> {
        let mut the_encoder = GzEncoder::new(Vec::new(), Compression::default());
        the_encoder
            .write_all(plain)
            .expect("💀 gzip encoder refused bytes");
        the_encoder.finish().expect("💀 gzip encoder refused to finish")
    }

    #[test]
    fn the_one_where_snappy_gives_back_exactly_what_went_in() {
        let the_decoded = ContainerCodec::SnappyFramed
            .decode(Cursor::new(snappy(THE_TRIPS.as_bytes())))
            .read_to_end()
            .expect("💀 a freshly encoded snappy stream should decode");
        assert_eq!(the_decoded, THE_TRIPS.as_bytes());
    }

    #[test]
    fn the_one_where_gzip_gives_back_exactly_what_went_in() {
        let the_decoded = ContainerCodec::Gzip
            .decode(Cursor::new(gzip(THE_TRIPS.as_bytes())))
            .read_to_end()
            .expect("💀 a freshly encoded gzip stream should decode");
        assert_eq!(the_decoded, THE_TRIPS.as_bytes());
    }

    #[test]
    fn the_one_where_lines_come_out_one_at_a_time_in_order() {
        let mut the_stream =
            ContainerCodec::SnappyFramed.decode(Cursor::new(snappy(THE_TRIPS.as_bytes())));
        let mut the_lines = Vec::new();
        loop {
            let mut the_line = Vec::new();
            let the_n = the_stream
                .read_line(&mut the_line)
                .expect("💀 line read should not fail");
            if the_n == 0 {
                break;
            }
            the_lines.push(String::from_utf8(the_line).expect("💀 fixture is utf-8"));
        }
        assert_eq!(the_lines.len(), 3);
        assert!(the_lines[0].contains("\"trip_id\":1"));
        assert!(the_lines[0].ends_with('\n'));
        // -- no trailing newline on the last line of the fixture, and the decoder doesn't invent one
        assert!(!the_lines[2].ends_with('\n'));
        assert_eq!(the_stream.bytes_out(), THE_TRIPS.len() as u64);
    }

    #[test]
    fn the_one_where_a_truncated_frame_is_a_decode_error() {
        let mut the_squished = snappy(THE_TRIPS.as_bytes());
        the_squished.truncate(the_squished.len() - 5);
        let the_failure = ContainerCodec::SnappyFramed
            .decode(Cursor::new(the_squished))
            .read_to_end()
            .expect_err("💀 a truncated frame should not decode cleanly");
        assert!(matches!(the_failure, ObjectFailure::Decode(_)), "{the_failure:?}");
    }

    #[test]
    fn the_one_where_garbage_is_not_gzip() {
        let the_failure = ContainerCodec::Gzip
            .decode(Cursor::new(b"\x1f\x8bthis is not deflate at all".to_vec()))
            .read_to_end()
            .expect_err("💀 garbage should not inflate");
        assert!(matches!(the_failure, ObjectFailure::Decode(_)));
    }

    #[test]
    fn the_one_where_identity_is_a_polite_no_op() {
        let the_decoded = ContainerCodec::Identity
            .decode(Cursor::new(THE_TRIPS.as_bytes().to_vec()))
            .read_to_end()
            .expect("💀 identity cannot fail on a cursor");
        assert_eq!(the_decoded, THE_TRIPS.as_bytes());
    }
}
