//! Framed codecs for worker communication.
//!
//! Instructions are bare bytes; responses are newline-terminated boolean
//! literals framed by LinesCodec. Both work over any AsyncRead/AsyncWrite
//! (child pipes, stdio, in-memory duplex streams).

use std::io;

use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::protocol::{Instruction, format_response, parse_response};

/// Longest response line accepted before the stream is treated as corrupt.
const MAX_RESPONSE_LINE: usize = 64;

/// Codec for the instruction channel: one byte per instruction.
///
/// Unknown bytes are consumed and skipped with a warning so a stray byte
/// cannot wedge the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstructionCodec;

impl Decoder for InstructionCodec {
    type Item = Instruction;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while src.has_remaining() {
            match Instruction::try_from(src.get_u8()) {
                Ok(instruction) => return Ok(Some(instruction)),
                Err(e) => tracing::warn!(error = %e, "Ignoring unknown instruction byte"),
            }
        }
        Ok(None)
    }
}

impl Encoder<Instruction> for InstructionCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Instruction, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(1);
        dst.put_u8(item.as_byte());
        Ok(())
    }
}

/// Codec for the response channel: `true`/`false` lines.
///
/// Wraps LinesCodec and adds boolean parsing.
#[derive(Debug)]
pub struct ResponseCodec {
    inner: LinesCodec,
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCodec {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_RESPONSE_LINE),
        }
    }

    fn parse(line: Option<String>) -> Result<Option<bool>, io::Error> {
        match line {
            Some(line) => parse_response(&line)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            None => Ok(None),
        }
    }
}

fn into_io_error(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response line longer than {MAX_RESPONSE_LINE} bytes"),
        ),
    }
}

impl Decoder for ResponseCodec {
    type Item = bool;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = self.inner.decode(src).map_err(into_io_error)?;
        Self::parse(line)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = self.inner.decode_eof(src).map_err(into_io_error)?;
        Self::parse(line)
    }
}

impl Encoder<bool> for ResponseCodec {
    type Error = io::Error;

    fn encode(&mut self, item: bool, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner
            .encode(format_response(item), dst)
            .map_err(into_io_error)
    }
}
