//! The addressed, signed, encrypted unit relayed across the mesh

use crate::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on a single wire frame, including the length prefix
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Length of the big-endian frame length prefix
const LEN_PREFIX: usize = 4;

/// What an envelope carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// An encrypted chat message
    Text,
    /// Confirmation that a Text envelope reached its recipient;
    /// payload is the original message id, encrypted
    ReadReceipt,
    /// The sender's identity token in plaintext, for first contact
    Handshake,
}

/// A message envelope as it traverses the mesh
///
/// `message_id` is assigned once at origination and never changes across
/// relay hops; deduplication depends on it. `ttl` is the only field a relay
/// may modify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub ttl: u8,
    pub kind: EnvelopeKind,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl MessageEnvelope {
    /// The bytes covered by the envelope signature
    ///
    /// Covers message id, sender and payload so a relay cannot splice a
    /// valid signature onto different content. TTL and recipient are
    /// excluded: TTL legitimately changes per hop.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(16 + self.sender_id.len() + self.payload.len());
        bytes.extend_from_slice(self.message_id.as_bytes());
        bytes.extend_from_slice(self.sender_id.as_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Serialize to a length-prefixed wire frame
    pub fn encode_frame(&self) -> MeshResult<Vec<u8>> {
        let body = serde_json::to_vec(self)?;

        if LEN_PREFIX + body.len() > MAX_FRAME_LEN {
            return Err(MeshError::Serialization(format!(
                "Envelope of {} bytes exceeds frame limit",
                body.len()
            )));
        }

        let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parse a complete length-prefixed wire frame
    ///
    /// Any deviation (short prefix, length mismatch, oversized claim,
    /// undecodable body) is `MalformedFrame`; attacker-controlled bytes can
    /// never panic here.
    pub fn decode_frame(frame: &[u8]) -> MeshResult<Self> {
        if frame.len() < LEN_PREFIX {
            return Err(MeshError::MalformedFrame(format!(
                "Frame of {} bytes is shorter than the length prefix",
                frame.len()
            )));
        }

        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&frame[..LEN_PREFIX]);
        let body_len = u32::from_be_bytes(len_bytes) as usize;

        if LEN_PREFIX + body_len > MAX_FRAME_LEN {
            return Err(MeshError::MalformedFrame(format!(
                "Frame claims {} bytes, above the limit",
                body_len
            )));
        }

        let body = &frame[LEN_PREFIX..];
        if body.len() != body_len {
            return Err(MeshError::MalformedFrame(format!(
                "Frame length mismatch: prefix says {}, got {}",
                body_len,
                body.len()
            )));
        }

        serde_json::from_slice(body)
            .map_err(|e| MeshError::MalformedFrame(format!("Undecodable envelope: {}", e)))
    }
}
