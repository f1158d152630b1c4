//! Frame encode/decode on top of the length-delimited codec.
//!
//! The length prefix is handled by `LengthDelimitedCodec`; this module owns
//! the JSON envelope inside each frame and the schema-version check.

use bytes::Bytes;

use chadbot_core::error::{ProtocolError, TransportError, TransportResult};
use chadbot_core::protocol::{Envelope, InboundFrame, OutboundFrame, PROTOCOL_VERSION};

/// Frames larger than this are a protocol violation (16 MiB).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Serialises an outbound frame into a versioned envelope body.
pub fn encode_outbound(frame: &OutboundFrame) -> TransportResult<Bytes> {
    let envelope = Envelope::new(frame);
    let body = serde_json::to_vec(&envelope).map_err(|e| TransportError::Codec(e.to_string()))?;
    Ok(Bytes::from(body))
}

/// Parses an inbound envelope body, enforcing the schema version.
pub fn decode_inbound(body: &[u8]) -> Result<InboundFrame, ProtocolError> {
    let envelope: Envelope<InboundFrame> =
        serde_json::from_slice(body).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            got: envelope.version,
            expected: PROTOCOL_VERSION,
        });
    }
    Ok(envelope.payload)
}
