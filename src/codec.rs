// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Line framing for the chat protocol.
//!
//! Wraps [`LinesCodec`] so that an oversized or non-UTF-8 line surfaces as a
//! [`Frame::Discarded`] item instead of a stream error. `Framed` ends the
//! stream after any decoder error, which would turn one bad frame into a
//! disconnect.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// One decoded line, or a line that had to be thrown away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    Discarded(&'static str),
}

/// Newline-delimited UTF-8 codec with a per-line length limit.
#[derive(Debug, Clone)]
pub struct ChatCodec {
    inner: LinesCodec,
}

impl ChatCodec {
    pub fn new(max_line_length: usize) -> Self {
        ChatCodec {
            inner: LinesCodec::new_with_max_length(max_line_length),
        }
    }

    fn map(result: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Discarded("line too long"))),
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(Frame::Discarded("line is not UTF-8")))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for ChatCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::map(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::map(self.inner.decode_eof(buf))
    }
}

impl Encoder<String> for ChatCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.inner.encode(line, buf)
    }
}
