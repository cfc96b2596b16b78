//! Bolt handshake negotiation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{BoltVersion, HandshakeError, BOLT_MAGIC, HANDSHAKE_SIZE, NO_VERSION};
use crate::bolt::error::{BoltError, BoltResult};

/// Result of a successful handshake.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// Negotiated protocol version
    pub version: BoltVersion,
    /// Client's raw proposals, for logging
    pub proposals: [[u8; 4]; 4],
}

/// Bolt handshake handler.
///
/// The client sends 20 bytes: the magic preamble followed by four version
/// proposals. Each proposal is `[reserved, range, minor, major]` and covers
/// `major.minor` down to `major.(minor - range)`. The server answers with the
/// highest version named by any proposal that it supports.
#[derive(Debug, Clone)]
pub struct Handshake {
    supported_versions: Vec<BoltVersion>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            supported_versions: BoltVersion::ALL.to_vec(),
        }
    }

    pub fn with_versions(versions: Vec<BoltVersion>) -> Self {
        Self {
            supported_versions: versions,
        }
    }

    /// Validates the preamble and picks a version.
    pub fn process(&self, data: &[u8; HANDSHAKE_SIZE]) -> Result<HandshakeResult, HandshakeError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        if magic != BOLT_MAGIC {
            return Err(HandshakeError::InvalidMagic {
                expected: BOLT_MAGIC,
                received: magic,
            });
        }

        let mut proposals = [[0u8; 4]; 4];
        for (slot, chunk) in proposals.iter_mut().zip(data[4..].chunks_exact(4)) {
            slot.copy_from_slice(chunk);
        }

        let version = proposals
            .iter()
            .flat_map(|p| expand_proposal(*p))
            .filter(|v| self.supported_versions.contains(v))
            .max()
            .ok_or(HandshakeError::NoCompatibleVersion)?;

        Ok(HandshakeResult { version, proposals })
    }

    /// Reads the client preamble from `stream` and writes the response.
    ///
    /// A bad magic number closes without writing anything; no agreement
    /// writes the all-zero response.
    pub async fn negotiate<S>(&self, stream: &mut S) -> BoltResult<HandshakeResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut data = [0u8; HANDSHAKE_SIZE];
        if let Err(e) = stream.read_exact(&mut data).await {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => HandshakeError::ConnectionClosed.into(),
                _ => BoltError::Io(e),
            });
        }

        match self.process(&data) {
            Ok(result) => {
                stream.write_all(&result.version.to_bytes()).await?;
                stream.flush().await?;
                debug!(version = %result.version, "Bolt handshake complete");
                Ok(result)
            }
            Err(HandshakeError::NoCompatibleVersion) => {
                debug!(proposals = ?&data[4..], "No compatible Bolt version");
                stream.write_all(&NO_VERSION).await?;
                stream.flush().await?;
                Err(HandshakeError::NoCompatibleVersion.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Versions named by one proposal word.
fn expand_proposal(word: [u8; 4]) -> impl Iterator<Item = BoltVersion> {
    let [_, range, minor, major] = word;
    (minor.saturating_sub(range)..=minor)
        .rev()
        .filter_map(move |m| BoltVersion::from_major_minor(major, m))
}

/// Builds a client preamble from raw proposal words.
pub fn build_client_handshake(proposals: &[[u8; 4]]) -> [u8; HANDSHAKE_SIZE] {
    let mut data = [0u8; HANDSHAKE_SIZE];
    data[0..4].copy_from_slice(&BOLT_MAGIC);
    for (i, proposal) in proposals.iter().take(4).enumerate() {
        let offset = 4 + i * 4;
        data[offset..offset + 4].copy_from_slice(proposal);
    }
    data
}
