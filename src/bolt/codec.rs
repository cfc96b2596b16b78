//! Bolt protocol codecs for tokio_util.
//!
//! [`ChunkCodec`] implements chunked message framing: a message is split into
//! chunks with a 2-byte big-endian length prefix and terminated by an empty
//! chunk. [`BoltServerCodec`] layers PackStream and request parsing on top.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::{BoltError, RequestError};
use super::message::{BoltRequest, BoltResponse, RecordMessage};
use super::packstream::{
    PackStreamDecoder, PackStreamEncoder, PackStreamError, PackStreamValue, StructProfile,
    DEFAULT_MAX_CONTAINER_SIZE,
};

/// Default chunk size for outgoing messages (16KB)
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// Smallest chunk size accepted for outgoing messages
pub const MIN_CHUNK_SIZE: usize = 32;

/// Largest chunk payload expressible in the 2-byte header
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;

/// Default bound on a reassembled message (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// End of message marker (0x00 0x00)
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

/// Unit written by [`ChunkCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete message body
    Message(Bytes),
    /// A lone end marker, used as keep-alive
    Noop,
}

/// Chunked message framing.
#[derive(Debug)]
pub struct ChunkCodec {
    chunk_size: usize,
    max_message_size: usize,
    message_buffer: BytesMut,
    in_message: bool,
}

impl ChunkCodec {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// `chunk_size` is clamped to `MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE`.
    pub fn with_limits(chunk_size: usize, max_message_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            max_message_size,
            message_buffer: BytesMut::with_capacity(4096),
            in_message: false,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn encode_chunked(&self, data: &[u8], dst: &mut BytesMut) {
        dst.reserve(data.len() + 2 * (data.len() / self.chunk_size + 2));
        for chunk in data.chunks(self.chunk_size) {
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        dst.put_slice(&END_MARKER);
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkCodec {
    type Item = BytesMut;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(2);
                if !self.in_message {
                    // NOOP between messages
                    continue;
                }
                self.in_message = false;
                return Ok(Some(self.message_buffer.split()));
            }

            if self.message_buffer.len() + chunk_size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: self.message_buffer.len() + chunk_size,
                    max: self.max_message_size,
                });
            }

            if src.len() < 2 + chunk_size {
                src.reserve(2 + chunk_size - src.len());
                return Ok(None);
            }

            src.advance(2);
            self.message_buffer.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
            self.in_message = true;
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            return Err(BoltError::Framing(format!(
                "stream ended inside a chunk ({} bytes pending)",
                src.len()
            )));
        }
        if self.in_message {
            return Err(BoltError::Framing(
                "stream ended before the end-of-message marker".to_string(),
            ));
        }
        Ok(None)
    }
}

impl Encoder<Frame> for ChunkCodec {
    type Error = BoltError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::Message(data) => self.encode_chunked(&data, dst),
            Frame::Noop => dst.put_slice(&END_MARKER),
        }
        Ok(())
    }
}

/// Item produced by [`BoltServerCodec`].
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(BoltRequest),
    /// Well-framed message that failed validation; the connection stays open
    Invalid(RequestError),
}

/// Item consumed by [`BoltServerCodec`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Response(BoltResponse),
    Noop,
}

impl From<BoltResponse> for Outbound {
    fn from(response: BoltResponse) -> Self {
        Outbound::Response(response)
    }
}

/// Server-side message codec for one connection.
///
/// Decoding only fails for fatal errors, since a `FramedRead` stops after
/// the first error; recoverable ones are delivered as [`Inbound::Invalid`].
#[derive(Debug)]
pub struct BoltServerCodec {
    chunks: ChunkCodec,
    profile: StructProfile,
    max_container_size: usize,
    /// Patches are negotiated by the first HELLO only.
    hello_seen: bool,
}

impl BoltServerCodec {
    pub fn new(profile: StructProfile) -> Self {
        Self {
            chunks: ChunkCodec::new(),
            profile,
            max_container_size: DEFAULT_MAX_CONTAINER_SIZE,
            hello_seen: false,
        }
    }

    pub fn with_limits(
        profile: StructProfile,
        chunk_size: usize,
        max_message_size: usize,
        max_container_size: usize,
    ) -> Self {
        Self {
            chunks: ChunkCodec::with_limits(chunk_size, max_message_size),
            profile,
            max_container_size,
            hello_seen: false,
        }
    }

    pub fn profile(&self) -> &StructProfile {
        &self.profile
    }

    fn parse(&mut self, body: &[u8]) -> Result<Inbound, BoltError> {
        let mut decoder = PackStreamDecoder::with_limit(body, self.max_container_size)
            .with_max_depth(self.profile.max_nesting_depth());
        let structure = match decoder.decode().map_err(BoltError::PackStream)? {
            PackStreamValue::Structure(s) => s,
            other => {
                return Err(BoltError::PackStream(PackStreamError::InvalidStructure(format!(
                    "expected a message structure, found {}",
                    other.type_name()
                ))))
            }
        };
        if !decoder.is_empty() {
            return Err(BoltError::PackStream(PackStreamError::TrailingBytes(
                decoder.remaining(),
            )));
        }

        match BoltRequest::from_structure(structure, &self.profile) {
            Ok(request) => {
                if let BoltRequest::Hello(hello) = &request {
                    if !self.hello_seen {
                        self.hello_seen = true;
                        // Later messages in the same read buffer must already
                        // see the negotiated DateTime form.
                        self.profile.negotiate_patches(&hello.patch_bolt);
                    }
                }
                Ok(Inbound::Request(request))
            }
            Err(BoltError::Request(e)) => Ok(Inbound::Invalid(e)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for BoltServerCodec {
    type Item = Inbound;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.chunks.decode(src)? {
            Some(body) => self.parse(&body).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.chunks.decode_eof(src)? {
            Some(body) => self.parse(&body).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Outbound> for BoltServerCodec {
    type Error = BoltError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let response = match item {
            Outbound::Noop => return self.chunks.encode(Frame::Noop, dst),
            Outbound::Response(BoltResponse::Record(record)) => {
                let fields = record
                    .fields
                    .into_iter()
                    .map(|v| self.profile.dehydrate(v))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(BoltError::PackStream)?;
                BoltResponse::Record(RecordMessage::new(fields))
            }
            Outbound::Response(other) => other,
        };

        let mut encoder = PackStreamEncoder::new();
        encoder.encode_structure(&response.to_structure())?;
        self.chunks
            .encode(Frame::Message(encoder.into_bytes().freeze()), dst)
    }
}
