// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delimiter based message framing.
//!
//! [`DelimiterSplitter`] is the pure reassembly step: given the bytes accumulated so
//! far and whether the input has ended, it decides whether a complete message is
//! available. [`DelimiterCodec`] drives it over a [`BytesMut`] read buffer and is what
//! stream connections use.
//!
//! Memory per connection is bounded: once more than `max_message_size` bytes are
//! buffered without a delimiter, the message is dropped and the connection is closed,
//! since the framer can no longer tell where the next message starts.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{ConfigError, ConnectionError};

/// Result of a single invocation of [`DelimiterSplitter::split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// No complete message yet. At end of input this means nothing is left.
    NeedMore,
    /// A complete message is available.
    ///
    /// `advance` is the number of bytes to consume (delimiter included) and `len`
    /// the length of the message at the start of the buffer.
    Token { advance: usize, len: usize },
    /// More than the configured maximum was buffered without finding a delimiter.
    TooLarge { buffered: usize },
}

/// Splits a byte stream on a literal, non-empty delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimiterSplitter {
    delimiter: Bytes,
    max_message_size: usize,
}

impl DelimiterSplitter {
    /// Creates a splitter for `delimiter` that refuses messages longer than
    /// `max_message_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the delimiter is empty or the size limit is 0.
    pub fn new(
        delimiter: impl Into<Bytes>,
        max_message_size: usize,
    ) -> Result<Self, ConfigError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }
        if max_message_size == 0 {
            return Err(ConfigError::InvalidMaxMessageSize);
        }
        Ok(Self {
            delimiter,
            max_message_size,
        })
    }

    #[must_use]
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Looks for the next message at the start of `data`.
    ///
    /// With `at_eof` set, trailing bytes without a delimiter form the final message.
    #[must_use]
    pub fn split(&self, data: &[u8], at_eof: bool) -> Split {
        self.split_from(data, at_eof, 0)
    }

    /// Same as [`Self::split`], skipping the first `search_from` bytes when looking
    /// for the delimiter. Callers must guarantee no delimiter starts before it.
    pub(crate) fn split_from(&self, data: &[u8], at_eof: bool, search_from: usize) -> Split {
        let delimiter_len = self.delimiter.len();
        // A delimiter starting at or before max_message_size ends within this window
        let window = self.max_message_size.saturating_add(delimiter_len);

        let searchable = &data[..data.len().min(window)];
        if let Some(pos) = find(searchable, &self.delimiter, search_from) {
            return Split::Token {
                advance: pos + delimiter_len,
                len: self.message_len(&data[..pos]),
            };
        }

        if data.len() >= window {
            return Split::TooLarge {
                buffered: data.len(),
            };
        }

        if at_eof && !data.is_empty() {
            if data.len() > self.max_message_size {
                return Split::TooLarge {
                    buffered: data.len(),
                };
            }
            return Split::Token {
                advance: data.len(),
                len: self.message_len(data),
            };
        }

        Split::NeedMore
    }

    // A bare "\n" delimiter behaves like a line scanner and drops a trailing '\r'.
    fn message_len(&self, message: &[u8]) -> usize {
        if self.delimiter.as_ref() == b"\n" && message.last() == Some(&b'\r') {
            message.len() - 1
        } else {
            message.len()
        }
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    let tail = haystack.get(from..)?;
    let pos = match needle {
        [byte] => tail.iter().position(|b| b == byte),
        _ => tail.windows(needle.len()).position(|window| window == needle),
    };
    pos.map(|pos| pos + from)
}

/// [`Decoder`] yielding delimiter-stripped messages.
///
/// Keeps track of how far the buffer has already been searched so that a slow
/// stream of small reads is scanned once, while still matching delimiters that
/// straddle two reads.
#[derive(Debug, Clone)]
pub struct DelimiterCodec {
    splitter: DelimiterSplitter,
    next_index: usize,
}

impl DelimiterCodec {
    #[must_use]
    pub fn new(splitter: DelimiterSplitter) -> Self {
        Self {
            splitter,
            next_index: 0,
        }
    }

    fn take(&mut self, buf: &mut BytesMut, split: Split) -> Result<Option<Bytes>, ConnectionError> {
        match split {
            Split::NeedMore => {
                let overlap = self.splitter.delimiter.len() - 1;
                self.next_index = buf.len().saturating_sub(overlap);
                Ok(None)
            }
            Split::Token { advance, len } => {
                let mut message = buf.split_to(advance);
                message.truncate(len);
                self.next_index = 0;
                Ok(Some(message.freeze()))
            }
            Split::TooLarge { buffered } => {
                buf.clear();
                self.next_index = 0;
                Err(ConnectionError::MessageTooLarge {
                    limit: self.splitter.max_message_size,
                    buffered,
                })
            }
        }
    }
}

impl Decoder for DelimiterCodec {
    type Item = Bytes;
    type Error = ConnectionError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ConnectionError> {
        let split = self.splitter.split_from(buf, false, self.next_index);
        self.take(buf, split)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ConnectionError> {
        let split = self.splitter.split_from(buf, true, self.next_index);
        self.take(buf, split)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn splitter(delimiter: &str, max: usize) -> DelimiterSplitter {
        DelimiterSplitter::new(delimiter.as_bytes().to_vec(), max).unwrap()
    }

    fn decode_in_chunks(
        codec: &mut DelimiterCodec,
        input: &[u8],
        chunk_size: usize,
    ) -> Result<Vec<Bytes>, ConnectionError> {
        let mut buf = BytesMut::new();
        let mut messages = Vec::new();
        for chunk in input.chunks(chunk_size.max(1)) {
            buf.extend_from_slice(chunk);
            while let Some(message) = codec.decode(&mut buf)? {
                messages.push(message);
            }
        }
        while let Some(message) = codec.decode_eof(&mut buf)? {
            messages.push(message);
        }
        Ok(messages)
    }

    #[test]
    fn test_rejects_empty_delimiter() {
        assert!(matches!(
            DelimiterSplitter::new(Vec::<u8>::new(), 10),
            Err(ConfigError::EmptyDelimiter)
        ));
    }

    #[test]
    fn test_rejects_zero_max_message_size() {
        assert!(matches!(
            DelimiterSplitter::new(b";".to_vec(), 0),
            Err(ConfigError::InvalidMaxMessageSize)
        ));
    }

    #[test]
    fn test_split_finds_token() {
        let s = splitter(";", 100);
        assert_eq!(s.split(b"a;b;c", false), Split::Token { advance: 2, len: 1 });
        assert_eq!(s.split(b"c", false), Split::NeedMore);
        assert_eq!(s.split(b"c", true), Split::Token { advance: 1, len: 1 });
        assert_eq!(s.split(b"", true), Split::NeedMore);
    }

    #[test]
    fn test_split_multi_byte_delimiter() {
        let s = splitter("<END>", 100);
        assert_eq!(
            s.split(b"hello<END>world", false),
            Split::Token { advance: 10, len: 5 }
        );
        assert_eq!(s.split(b"hello<EN", false), Split::NeedMore);
        assert_eq!(s.split(b"hello", true), Split::Token { advance: 5, len: 5 });
    }

    #[test]
    fn test_split_newline_strips_carriage_return() {
        let s = splitter("\n", 100);
        assert_eq!(s.split(b"abc\r\ndef", false), Split::Token { advance: 5, len: 3 });
        assert_eq!(s.split(b"abc\r", true), Split::Token { advance: 4, len: 3 });

        // Only the plain newline delimiter behaves like a line scanner
        let s = splitter(";", 100);
        assert_eq!(s.split(b"abc\r;", false), Split::Token { advance: 5, len: 4 });
    }

    #[test]
    fn test_split_too_large() {
        let s = splitter(";", 4);
        assert_eq!(s.split(b"abcd;", false), Split::Token { advance: 5, len: 4 });
        assert_eq!(s.split(b"abcd", false), Split::NeedMore);
        assert_eq!(s.split(b"abcde", false), Split::TooLarge { buffered: 5 });
        assert_eq!(s.split(b"abcde", true), Split::TooLarge { buffered: 5 });
        assert_eq!(s.split(b"abcd", true), Split::Token { advance: 4, len: 4 });
    }

    #[test]
    fn test_split_too_large_even_if_delimiter_follows() {
        let s = splitter("<END>", 4);
        assert_eq!(
            s.split(b"abcdefghij<END>", false),
            Split::TooLarge { buffered: 15 }
        );
    }

    #[test]
    fn test_codec_examples() {
        let mut codec = DelimiterCodec::new(splitter(";", 1024));
        let messages = decode_in_chunks(&mut codec, b"a;b;c", 64).unwrap();
        assert_eq!(messages, vec!["a", "b", "c"]);

        let mut codec = DelimiterCodec::new(splitter("<END>", 1024));
        let messages = decode_in_chunks(&mut codec, b"hello", 64).unwrap();
        assert_eq!(messages, vec!["hello"]);
    }

    #[test]
    fn test_codec_delimiter_straddles_reads() {
        let mut codec = DelimiterCodec::new(splitter("<END>", 1024));
        let input = b"first<END>second<END>third";
        for chunk_size in 1..input.len() {
            let messages = decode_in_chunks(&mut codec, input, chunk_size).unwrap();
            assert_eq!(
                messages,
                vec!["first", "second", "third"],
                "chunk size {}",
                chunk_size
            );
        }
    }

    #[test]
    fn test_codec_drops_oversized_message() {
        let mut codec = DelimiterCodec::new(splitter("\n", 50_000));
        let input: Vec<u8> = (0..900_000).map(|_| fastrand::alphanumeric() as u8).collect();
        let result = decode_in_chunks(&mut codec, &input, 8192);
        assert!(matches!(
            result,
            Err(ConnectionError::MessageTooLarge { limit: 50_000, .. })
        ));
    }

    #[test]
    fn test_codec_accepts_message_within_raised_limit() {
        let mut codec = DelimiterCodec::new(splitter("\n", 1_000_000));
        let input: Vec<u8> = (0..900_000).map(|_| fastrand::alphanumeric() as u8).collect();
        let messages = decode_in_chunks(&mut codec, &input, 8192).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].as_ref(), input.as_slice());
    }

    #[test]
    fn test_codec_keeps_empty_messages() {
        let mut codec = DelimiterCodec::new(splitter(";", 16));
        let messages = decode_in_chunks(&mut codec, b"a;;b;", 2).unwrap();
        assert_eq!(messages, vec!["a", "", "b"]);
    }

    #[test]
    fn test_codec_clears_buffer_on_overflow() {
        let mut codec = DelimiterCodec::new(splitter(";", 3));
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        assert!(codec.decode(&mut buf).is_err());
        assert!(buf.is_empty());
    }

    proptest! {
        #[test]
        fn prop_joined_messages_round_trip(
            messages in prop::collection::vec("[a-zA-Z0-9]{1,40}", 1..20),
            delimiter in "[;|#<>~]{1,5}",
            chunk_size in 1usize..64,
            trailing in any::<bool>(),
        ) {
            let mut input = messages.join(&delimiter);
            if trailing {
                input.push_str(&delimiter);
            }
            let mut codec = DelimiterCodec::new(splitter(&delimiter, 64));
            let decoded = decode_in_chunks(&mut codec, input.as_bytes(), chunk_size).unwrap();
            let decoded: Vec<String> = decoded
                .iter()
                .map(|m| String::from_utf8(m.to_vec()).unwrap())
                .collect();
            prop_assert_eq!(decoded, messages);
        }

        #[test]
        fn prop_undelimited_input_over_limit_yields_nothing(
            len in 11usize..512,
            chunk_size in 1usize..64,
        ) {
            let input = vec![b'x'; len];
            let mut codec = DelimiterCodec::new(splitter(";", 10));
            prop_assert!(decode_in_chunks(&mut codec, &input, chunk_size).is_err());
        }
    }
}
