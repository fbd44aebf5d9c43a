//! Length-prefixed envelope framing shared by every streaming protocol.
//!
//! ```text
//! [flags:1][length:4 big-endian][payload:length]
//! ```
//!
//! Connect streaming, gRPC and gRPC-Web all use this layout; they differ only
//! in which flag marks the final frame. [`WireFormat`] layers the negotiated
//! codec, compression and size limits on top of it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{BoxedCodec, WireMessage};
use crate::compression::{BoxedCompressor, CompressionConfig};
use crate::error::{Code, ConnectError, EnvelopeError};

/// Envelope flag bits.
pub mod envelope_flags {
    /// Regular message.
    pub const MESSAGE: u8 = 0x00;
    /// Payload is compressed with the negotiated encoding.
    pub const COMPRESSED: u8 = 0x01;
    /// Connect end-of-stream message carrying the final status.
    pub const END_STREAM: u8 = 0x02;
    /// gRPC-Web trailers frame.
    pub const TRAILER: u8 = 0x80;
}

/// Envelope header size (flags + length).
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// One framed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub flags: u8,
    pub data: Bytes,
}

impl Envelope {
    pub fn new(flags: u8, data: Bytes) -> Self {
        Self { flags, data }
    }

    /// A data frame, flagged as compressed when `compressed` is set.
    pub fn message(data: Bytes, compressed: bool) -> Self {
        let flags = if compressed {
            envelope_flags::COMPRESSED
        } else {
            envelope_flags::MESSAGE
        };
        Self { flags, data }
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & envelope_flags::COMPRESSED != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & envelope_flags::END_STREAM != 0
    }

    pub fn is_trailer(&self) -> bool {
        self.flags & envelope_flags::TRAILER != 0
    }

    /// Whether this frame terminates its direction.
    pub fn is_final(&self) -> bool {
        self.is_end_stream() || self.is_trailer()
    }

    /// Serialize to `[flags][len][payload]`.
    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.data.len());
        frame.put_u8(self.flags);
        frame.put_u32(self.data.len() as u32);
        frame.extend_from_slice(&self.data);
        frame.freeze()
    }
}

/// Parse the 5-byte header into `(flags, length)`.
pub fn parse_envelope_header(data: &[u8]) -> Result<(u8, u32), EnvelopeError> {
    if data.len() < ENVELOPE_HEADER_SIZE {
        return Err(EnvelopeError::IncompleteHeader {
            expected: ENVELOPE_HEADER_SIZE,
            actual: data.len(),
        });
    }
    let flags = data[0];
    let length = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Ok((flags, length))
}

/// Incremental envelope parser.
///
/// Bytes are pushed as they arrive; complete envelopes are popped. A declared
/// length above `read_max` fails as soon as the header is visible, before any
/// of the payload is buffered.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    buffer: BytesMut,
    read_max: Option<usize>,
}

impl EnvelopeDecoder {
    pub fn new(read_max: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::new(),
            read_max,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete envelope, if one is buffered.
    pub fn decode(&mut self) -> Result<Option<Envelope>, EnvelopeError> {
        if self.buffer.len() < ENVELOPE_HEADER_SIZE {
            return Ok(None);
        }
        let (flags, length) = parse_envelope_header(&self.buffer)?;
        let length = length as usize;
        if let Some(max) = self.read_max {
            if length > max {
                return Err(EnvelopeError::TooLarge { size: length, max });
            }
        }
        if self.buffer.len() < ENVELOPE_HEADER_SIZE + length {
            return Ok(None);
        }
        self.buffer.advance(ENVELOPE_HEADER_SIZE);
        let data = self.buffer.split_to(length).freeze();
        Ok(Some(Envelope { flags, data }))
    }

    /// Called once the byte source ends; leftover bytes mean a truncated frame.
    pub fn finish(&self) -> Result<(), EnvelopeError> {
        match self.buffer.len() {
            0 => Ok(()),
            n if n < ENVELOPE_HEADER_SIZE => Err(EnvelopeError::IncompleteHeader {
                expected: ENVELOPE_HEADER_SIZE,
                actual: n,
            }),
            n => {
                let (_, length) = parse_envelope_header(&self.buffer)?;
                Err(EnvelopeError::IncompletePayload {
                    expected: length as usize,
                    actual: n - ENVELOPE_HEADER_SIZE,
                })
            }
        }
    }
}

/// Codec, compression and limits negotiated for one connection.
///
/// Fixed for the connection's lifetime.
#[derive(Clone, Debug)]
pub struct WireFormat {
    pub codec: BoxedCodec,
    /// Compression applied to outbound messages, if any.
    pub send_compression: Option<BoxedCompressor>,
    /// Compression the peer declared for its messages, if any.
    pub recv_compression: Option<BoxedCompressor>,
    pub compression: CompressionConfig,
    pub read_max_bytes: Option<usize>,
    pub send_max_bytes: Option<usize>,
}

impl WireFormat {
    pub fn new(codec: BoxedCodec) -> Self {
        Self {
            codec,
            send_compression: None,
            recv_compression: None,
            compression: CompressionConfig::default(),
            read_max_bytes: None,
            send_max_bytes: None,
        }
    }

    /// Marshal and, past the threshold, compress one outbound message.
    pub fn encode(&self, message: &dyn WireMessage) -> Result<Envelope, ConnectError> {
        let data = self.codec.marshal(message)?;
        self.encode_bytes(data)
    }

    /// Apply compression and send limits to an already marshaled payload.
    pub fn encode_bytes(&self, data: Bytes) -> Result<Envelope, ConnectError> {
        if let Some(compressor) = &self.send_compression {
            if self.compression.should_compress(data.len()) {
                let compressed = compressor.compress(&data)?;
                if let Some(max) = self.send_max_bytes {
                    if compressed.len() > max {
                        return Err(ConnectError::new(
                            Code::ResourceExhausted,
                            format!(
                                "compressed message size {} exceeds sendMaxBytes {}",
                                compressed.len(),
                                max
                            ),
                        ));
                    }
                }
                return Ok(Envelope::message(compressed, true));
            }
        }
        if let Some(max) = self.send_max_bytes {
            if data.len() > max {
                return Err(ConnectError::new(
                    Code::ResourceExhausted,
                    format!("message size {} exceeds sendMaxBytes {}", data.len(), max),
                ));
            }
        }
        Ok(Envelope::message(data, false))
    }

    /// Decompress (when flagged) and unmarshal one inbound message.
    pub fn decode(
        &self,
        envelope: Envelope,
        message: &mut dyn WireMessage,
    ) -> Result<(), ConnectError> {
        let payload = self.decompress(envelope)?;
        self.codec.unmarshal(&payload, message)
    }

    /// The logical payload of an envelope, size-checked after decompression.
    pub fn decompress(&self, envelope: Envelope) -> Result<Bytes, ConnectError> {
        if !envelope.is_compressed() {
            return Ok(envelope.data);
        }
        let Some(compressor) = &self.recv_compression else {
            return Err(ConnectError::new(
                Code::Internal,
                "protocol error: received compressed message without compression support",
            ));
        };
        Ok(compressor.decompress(&envelope.data, self.read_max_bytes)?)
    }
}
