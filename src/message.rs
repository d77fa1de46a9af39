//! # BitTorrent Peer Wire Messages
//!
//! This module defines the message types and serialization for the
//! BitTorrent peer wire protocol.
//!
//! ## Message Structure
//!
//! Every message follows the same format:
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length Prefix**: 4 bytes (big-endian u32) - Length of message ID + payload
//! - **Message ID**: 1 byte - Identifies the message type
//! - **Payload**: Variable length - Message-specific data
//!
//! ## Message Types
//!
//! | ID | Name | Description |
//! |----|------|-------------|
//! | 0 | CHOKE | Peer will not send pieces (no payload) |
//! | 1 | UNCHOKE | Peer will send pieces (no payload) |
//! | 2 | INTERESTED | Client wants to download (no payload) |
//! | 5 | BITFIELD | Peer's piece availability (payload: bitfield) |
//! | 6 | REQUEST | Request a block (payload: index, begin, length) |
//! | 7 | PIECE | Block data (payload: index, begin, data) |
//!
//! During a download this client only ever sends INTERESTED and REQUEST.
//!
//! ## Keep-Alive Messages
//!
//! A keep-alive message has length 0 and no ID or payload. It is
//! represented here with a sentinel ID outside the protocol's range.

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use std::io::Cursor;

type MessageId = u8;
type MessagePayload = Vec<u8>;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_KEEPALIVE: MessageId = 255; // Special value for keep-alive (length 0)

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier
    pub id: MessageId,
    /// Message payload data
    pub payload: MessagePayload,
}

impl Message {
    /// Build a new message without a payload.
    ///
    /// # Arguments
    ///
    /// * `id` - The type of the message.
    ///
    pub fn new(id: MessageId) -> Self {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Build a new message with a payload.
    ///
    /// # Arguments
    ///
    /// * `id` - The type of the message.
    /// * `payload` - The content of the message.
    ///
    pub fn new_with_payload(id: MessageId, payload: MessagePayload) -> Self {
        Message { id, payload }
    }

    /// Build a REQUEST message for one block of a piece.
    ///
    /// The payload is 12 bytes: piece index, block offset within the piece
    /// and block length, all big-endian u32.
    pub fn request(index: u32, begin: u32, length: u32) -> Result<Self> {
        let mut payload: Vec<u8> = Vec::with_capacity(12);
        payload.write_u32::<BigEndian>(index)?;
        payload.write_u32::<BigEndian>(begin)?;
        payload.write_u32::<BigEndian>(length)?;

        Ok(Message::new_with_payload(MESSAGE_REQUEST, payload))
    }

    /// Encode this message with its 4-byte big-endian length prefix.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(4 + 1 + self.payload.len());

        // The prefix counts the id byte plus the payload, not itself
        frame.write_u32::<BigEndian>((1 + self.payload.len()) as u32)?;
        frame.push(self.id);
        frame.extend_from_slice(&self.payload);

        Ok(frame)
    }

    /// Split a PIECE message payload into its parts.
    ///
    /// The payload carries the piece index and block offset (big-endian
    /// u32 each) followed by the raw block bytes, so it must be at least 8
    /// bytes long.
    ///
    /// # Errors
    ///
    /// Returns an error if this message is not a PIECE or the payload is
    /// too short to hold the two header fields.
    pub fn parse_piece(&self) -> Result<(u32, u32, &[u8])> {
        if self.id != MESSAGE_PIECE || self.payload.len() < 8 {
            return Err(anyhow!("received invalid piece message from peer"));
        }

        let mut header = Cursor::new(&self.payload[0..8]);
        let index = header.read_u32::<BigEndian>()?;
        let begin = header.read_u32::<BigEndian>()?;

        Ok((index, begin, &self.payload[8..]))
    }
}

/// Parse a framed message body into its id and payload.
///
/// `message_buf` holds everything after the 4-byte length prefix, so its
/// first byte is the message id; keep-alives (length 0) never reach this
/// function.
pub fn deserialize_message(message_buf: &[u8], message_len: usize) -> Result<Message> {
    if message_buf.is_empty() || message_buf.len() < message_len {
        return Err(anyhow!("received truncated message from peer"));
    }

    Ok(Message::new_with_payload(
        message_buf[0],
        message_buf[1..message_len].to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_interested() {
        let message = Message::new(MESSAGE_INTERESTED);
        assert_eq!(message.serialize().unwrap(), vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn serialize_request() {
        let message = Message::request(1, 16384, 16384).unwrap();
        let encoded = message.serialize().unwrap();

        assert_eq!(encoded.len(), 4 + 13);
        assert_eq!(&encoded[0..4], &[0, 0, 0, 13]);
        assert_eq!(encoded[4], MESSAGE_REQUEST);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]);
        assert_eq!(&encoded[9..13], &[0, 0, 0x40, 0]);
        assert_eq!(&encoded[13..17], &[0, 0, 0x40, 0]);
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let message = Message::new_with_payload(MESSAGE_PIECE, vec![1, 2, 3, 4, 5]);
        let encoded = message.serialize().unwrap();

        // Skip the 4-byte length prefix like the framed reader does
        let decoded = deserialize_message(&encoded[4..], encoded.len() - 4).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn parse_piece_payload() {
        let mut payload = vec![0, 0, 0, 7, 0, 0, 0x40, 0];
        payload.extend_from_slice(b"blockdata");
        let message = Message::new_with_payload(MESSAGE_PIECE, payload);

        let (index, begin, block) = message.parse_piece().unwrap();
        assert_eq!(index, 7);
        assert_eq!(begin, 16384);
        assert_eq!(block, b"blockdata");
    }

    #[test]
    fn reject_short_piece_payload() {
        let message = Message::new_with_payload(MESSAGE_PIECE, vec![0, 0, 0, 7]);
        assert!(message.parse_piece().is_err());
    }

    #[test]
    fn reject_piece_parse_of_other_ids() {
        let message = Message::new_with_payload(MESSAGE_BITFIELD, vec![0; 16]);
        assert!(message.parse_piece().is_err());
    }
}
