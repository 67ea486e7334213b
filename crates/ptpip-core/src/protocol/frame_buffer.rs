//! Reassembles PTP/IP packets from partial socket reads.

use bytes::BytesMut;

use super::constants::{HEADER_SIZE, PACKET_OPERATION_RESPONSE, TransactionId};
use super::cursor::DecodeError;
use super::packet::Packet;

/// A frame whose length prefix was sane but whose payload did not decode.
///
/// The frame is still consumed, so the stream stays in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadFrame {
    /// Packet type from the header.
    pub kind: u32,
    /// Transaction id of a response frame, when the bytes are there.
    pub transaction_id: Option<TransactionId>,
    pub error: DecodeError,
}

impl BadFrame {
    fn new(frame: &[u8], error: DecodeError) -> Self {
        let kind = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        // OperationResponse: code u16, then transaction id u32.
        let transaction_id = match frame.get(HEADER_SIZE + 2..HEADER_SIZE + 6) {
            Some(id) if kind == PACKET_OPERATION_RESPONSE => {
                Some(u32::from_le_bytes([id[0], id[1], id[2], id[3]]))
            }
            _ => None,
        };
        Self {
            kind,
            transaction_id,
            error,
        }
    }

    pub fn is_response(&self) -> bool {
        self.kind == PACKET_OPERATION_RESPONSE
    }
}

/// Outcome of decoding one buffered frame.
pub type FrameResult = Result<Packet, BadFrame>;

/// Buffer for accumulating incoming bytes and extracting complete packets.
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Frames that precede a corrupt length prefix are still returned. The
    /// second element is set once a length prefix is corrupt; the stream
    /// cannot be resynchronised after that.
    pub fn push(&mut self, data: &[u8]) -> (Vec<FrameResult>, Option<DecodeError>) {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            let length = match Packet::peek_length(&self.buffer) {
                Ok(Some(length)) => length as usize,
                Ok(None) => break,
                Err(e) => return (frames, Some(e)),
            };
            if self.buffer.len() < length {
                break;
            }
            let frame = self.buffer.split_to(length);
            frames.push(Packet::decode(&frame).map_err(|e| BadFrame::new(&frame, e)));
        }
        (frames, None)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
