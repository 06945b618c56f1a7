use std::str;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::serial::{error::SerialPortError, InboundMessage};

/// This codec has a configurable delimiter character for reading.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a delimiter into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
        }
    }

    /// The buffer was cut down to `len` bytes, so do not resume searching past that.
    fn truncated(&mut self, len: usize) {
        self.cursor = self.cursor.min(len);
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl Decoder for LinesCodec {
    type Item = Vec<u8>;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at
            .iter()
            .position(|&byte| byte == self.read_delimiter)
        {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the delimiter by advancing the source buffer beyond it.
            src.advance(1);

            Ok(Some(line.to_vec()))
        } else {
            // No full frame yet.
            // The same buffer will be provided next time, possibly with more data,
            // so there is no need to look at these bytes again.
            self.cursor = read_to;

            Ok(None)
        }
    }
}

/// Turns chunks of bytes read from the device into [`InboundMessage`]s.
///
/// Bytes after the last delimiter stay buffered until a later chunk completes the line.
/// There is no bound on how long such a partial line may grow.
///
/// A chunk which would make the stream invalid UTF-8 is discarded as a whole,
/// leaving what was buffered before it untouched.
/// A multi-byte character split across two chunks is fine.
#[derive(Debug, Default)]
pub struct Framer {
    codec: LinesCodec,
    buffer: BytesMut,

    // How many bytes at the end of `buffer` are the start of a not yet complete UTF-8 character.
    incomplete: usize,
}

impl Framer {
    /// Create a framer splitting on the given delimiter.
    pub fn new(delimiter: u8) -> Self {
        Self {
            codec: LinesCodec::new(delimiter),
            ..Default::default()
        }
    }

    /// How many bytes are waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and return every line it completed, in order.
    ///
    /// Lines are trimmed of surrounding whitespace. Lines which are empty after trimming are skipped.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<InboundMessage>, SerialPortError> {
        self.check_utf8(chunk)?;
        self.buffer.extend_from_slice(chunk);

        let mut messages = vec![];

        while let Some(line) = self.codec.decode(&mut self.buffer)? {
            let line = String::from_utf8(line).map_err(|e| SerialPortError::Utf8 {
                discarded: e.as_bytes().len(),
                source: e.utf8_error(),
            })?;

            let line = line.trim();
            if line.is_empty() {
                trace!("Skipping blank line");
                continue;
            }

            messages.push(InboundMessage::from(line));
        }

        Ok(messages)
    }

    fn check_utf8(&mut self, chunk: &[u8]) -> Result<(), SerialPortError> {
        let tail = &self.buffer[self.buffer.len() - self.incomplete..];

        let mut candidate = Vec::with_capacity(tail.len() + chunk.len());
        candidate.extend_from_slice(tail);
        candidate.extend_from_slice(chunk);

        match str::from_utf8(&candidate) {
            Ok(_) => {
                self.incomplete = 0;
                Ok(())
            }
            // The chunk ends in the middle of a character; the rest should arrive next time.
            Err(e) if e.error_len().is_none() => {
                self.incomplete = candidate.len() - e.valid_up_to();
                Ok(())
            }
            // A partial character which the chunk cannot continue never completes.
            // Drop it, and judge the chunk on its own.
            Err(_) if self.incomplete > 0 && Self::starts_fresh(chunk) => {
                let keep = self.buffer.len() - self.incomplete;
                debug!(stale = self.incomplete, "Dropping incomplete character");

                self.buffer.truncate(keep);
                self.codec.truncated(keep);
                self.incomplete = 0;

                self.check_utf8(chunk)
            }
            Err(source) => Err(SerialPortError::Utf8 {
                discarded: chunk.len(),
                source,
            }),
        }
    }

    /// True if the chunk is valid UTF-8 by itself, possibly ending in a partial character.
    fn starts_fresh(chunk: &[u8]) -> bool {
        match str::from_utf8(chunk) {
            Ok(_) => true,
            Err(e) => e.error_len().is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn frame_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<InboundMessage> {
        let mut framer = Framer::default();

        chunks
            .into_iter()
            .flat_map(|chunk| framer.feed(chunk).unwrap())
            .collect()
    }

    fn device_output() -> String {
        lipsum::lipsum_from_seed(300, 7)
            .split_inclusive('.')
            .map(|sentence| format!("{}\r\n", sentence.trim()))
            .collect::<String>()
            + "blåbærsyltetøy kostet 25€\n"
    }

    #[test]
    fn decoder_strips_delimiter() {
        let mut codec = LinesCodec::default();
        let mut buffer = BytesMut::from(&b"first\nsecond"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(b"first".to_vec()));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        assert_eq!(&buffer[..], b"second");

        buffer.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(b"second".to_vec()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn line_split_over_two_reads() {
        let mut framer = Framer::default();

        assert!(framer.feed(b"O").unwrap().is_empty());
        assert_eq!(framer.buffered(), 1);

        let messages = framer.feed(b"K\n").unwrap();
        assert_eq!(messages, vec![InboundMessage::from("OK")]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let output = device_output();
        let bytes = output.as_bytes();

        let expected = frame_chunks([bytes]);
        assert!(expected.len() > 1);

        for chunk_size in 1..=17 {
            let actual = frame_chunks(bytes.chunks(chunk_size));
            assert_eq!(actual, expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn whitespace_is_trimmed_and_blank_lines_skipped() {
        let messages = frame_chunks([&b"  hello \r\n\r\n\n\t\nworld\n"[..]]);

        assert_eq!(
            messages,
            vec![InboundMessage::from("hello"), InboundMessage::from("world")]
        );
    }

    #[test]
    fn invalid_chunk_is_discarded_without_poisoning() {
        let mut framer = Framer::default();

        assert!(framer.feed(b"temp=").unwrap().is_empty());

        let err = framer.feed(&[0xff, 0xfe, b'\n']).unwrap_err();
        assert!(matches!(err, SerialPortError::Utf8 { discarded: 3, .. }));

        // What was buffered before the bad chunk survives.
        let messages = framer.feed(b"21\n").unwrap();
        assert_eq!(messages, vec![InboundMessage::from("temp=21")]);
    }

    #[test]
    fn character_split_across_chunks_is_kept() {
        let euro = "€".as_bytes();

        let messages = frame_chunks([&euro[..1], &euro[1..], &b"\n"[..]]);
        assert_eq!(messages, vec![InboundMessage::from("€")]);
    }

    #[test]
    fn unfinished_character_is_dropped_by_delimiter() {
        let euro = "€".as_bytes();
        let mut framer = Framer::default();

        assert!(framer.feed(&euro[..2]).unwrap().is_empty());
        assert!(framer.feed(b"\n").unwrap().is_empty());
        assert_eq!(framer.buffered(), 0);

        // The rest of the character arrives too late to mean anything.
        assert!(framer.feed(&euro[2..]).is_err());
        assert_eq!(framer.feed(b"ok\n").unwrap(), vec![InboundMessage::from("ok")]);
    }

    #[test]
    fn stray_lead_byte_does_not_block_later_lines() {
        let mut framer = Framer::default();

        assert!(framer.feed(b"a\xe2").unwrap().is_empty());

        assert_eq!(
            framer.feed(b"\nhello\n").unwrap(),
            vec![InboundMessage::from("a"), InboundMessage::from("hello")]
        );
        assert_eq!(framer.feed(b"world\n").unwrap(), vec![InboundMessage::from("world")]);
    }

    #[test]
    fn stray_lead_byte_mid_line_keeps_the_line() {
        let mut framer = Framer::default();

        assert!(framer.feed(b"temp=\xf0").unwrap().is_empty());
        assert_eq!(framer.feed(b"21\n").unwrap(), vec![InboundMessage::from("temp=21")]);
    }

    #[test]
    fn custom_delimiter() {
        let mut framer = Framer::new(b';');

        let messages = framer.feed(b"a;b;c").unwrap();
        assert_eq!(
            messages,
            vec![InboundMessage::from("a"), InboundMessage::from("b")]
        );
        assert_eq!(framer.buffered(), 1);
    }
}
