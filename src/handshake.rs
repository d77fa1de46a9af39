//! # BitTorrent Handshake Protocol
//!
//! This module implements the initial handshake used to establish
//! communication between BitTorrent peers.
//!
//! ## Message Format
//!
//! The handshake is a fixed 68-byte message:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte - Length of the protocol string (19)
//! - **pstr**: 19 bytes - Protocol identifier ("BitTorrent protocol")
//! - **reserved**: 8 bytes - Extension flags
//! - **info_hash**: 20 bytes - SHA-1 hash of the torrent's info dictionary
//! - **peer_id**: 20 bytes - Unique identifier for the peer
//!
//! The info-hash binds the connection to one torrent: a peer that replies
//! with a different hash is serving a different swarm.

use anyhow::{anyhow, Result};

const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";

// Reserved bytes with the extension-protocol bit set
const RESERVED: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00];

/// Total size of a handshake frame on the wire.
pub const HANDSHAKE_LEN: usize = 68;

/// A BitTorrent handshake message.
///
/// The protocol string and reserved bytes are fixed; only the info-hash and
/// peer-id vary between connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; 20],
    /// 20-byte identifier of the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Build a new handshake for the given torrent and client identity.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake { info_hash, peer_id }
    }

    /// Serialize the handshake into its fixed 68-byte wire form.
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut frame = [0u8; HANDSHAKE_LEN];

        frame[0] = PROTOCOL_ID.len() as u8;
        frame[1..20].copy_from_slice(PROTOCOL_ID);
        frame[20..28].copy_from_slice(&RESERVED);
        frame[28..48].copy_from_slice(&self.info_hash);
        frame[48..68].copy_from_slice(&self.peer_id);

        frame
    }

    /// Parse a handshake received from a peer.
    ///
    /// Validates the protocol string; the reserved bytes are not inspected
    /// and the info-hash comparison is left to the caller, which knows the
    /// hash it asked for.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame does not announce the BitTorrent
    /// protocol.
    pub fn deserialize(frame: &[u8; HANDSHAKE_LEN]) -> Result<Handshake> {
        if frame[0] != PROTOCOL_ID.len() as u8 || &frame[1..20] != PROTOCOL_ID {
            return Err(anyhow!("invalid handshake received from peer"));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&frame[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&frame[48..68]);

        Ok(Handshake { info_hash, peer_id })
    }
}
