//! # BitTorrent Peer Client
//!
//! This module implements the client side of the peer wire protocol for a
//! single TCP connection: handshake, message framing, and the piece
//! download procedure.
//!
//! ## Download Procedure
//!
//! After the handshake, one piece is downloaded per connection in a fixed
//! sequence:
//!
//! 1. **Bitfield**: the peer's first framed message must announce its
//!    pieces
//! 2. **Interested**: the client declares it wants to download
//! 3. **Unchoke**: the peer allows requests
//! 4. **Request/Piece**: the piece is fetched block by block (16KB each,
//!    short final block)
//! 5. **Verification**: the assembled piece is SHA-1 checked against the
//!    digest published in the metainfo
//!
//! ## Deadlines
//!
//! Dialing and the handshake run under a caller-chosen deadline. The
//! deadline is cleared once the handshake completes: a slow peer may
//! legitimately take a long time to serve blocks, and the overall download
//! is bounded by the invocation, not per message.
//!
//! ## Connection Ownership
//!
//! The connection is owned by the client value and closed on every exit
//! path when it is dropped, success and failure alike.

use crate::handshake::{Handshake, HANDSHAKE_LEN};
use crate::message::*;
use crate::piece::{divide_blocks, PieceWork};

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, info};
use sha1::{Digest, Sha1};

use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// A connection to a single remote peer.
///
/// Wraps the TCP stream together with the torrent identity the connection
/// was opened for.
pub struct PeerClient {
    /// Remote end of the connection
    addr: SocketAddr,
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    info_hash: [u8; 20],
    /// TCP stream connection to the peer
    conn: TcpStream,
}

impl PeerClient {
    /// Dial a peer.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address of the remote peer.
    /// * `info_hash` - Identity of the torrent this connection serves.
    /// * `timeout` - Deadline for establishing the TCP connection.
    ///
    pub fn connect(addr: SocketAddr, info_hash: [u8; 20], timeout: Duration) -> Result<PeerClient> {
        let conn = TcpStream::connect_timeout(&addr, timeout)
            .with_context(|| format!("could not connect to peer {addr}"))?;

        debug!("Connected to peer {}", addr);

        Ok(PeerClient {
            addr,
            info_hash,
            conn,
        })
    }

    /// Set or clear the read and write deadlines on the connection.
    fn set_deadline(&self, deadline: Option<Duration>) -> Result<()> {
        self.conn
            .set_write_timeout(deadline)
            .context("could not set write timeout")?;
        self.conn
            .set_read_timeout(deadline)
            .context("could not set read timeout")?;

        Ok(())
    }

    /// Perform the BitTorrent handshake with the remote peer.
    ///
    /// Sends our 68-byte handshake, reads the peer's, validates the
    /// protocol string and checks that the peer answered for the torrent we
    /// asked about. The supplied deadline covers the whole exchange and is
    /// cleared afterwards so block transfers may block freely.
    ///
    /// # Returns
    ///
    /// The 20-byte peer id the remote end identified itself with.
    pub fn handshake(&mut self, deadline: Duration) -> Result<[u8; 20]> {
        self.set_deadline(Some(deadline))?;

        // Send handshake to remote peer
        let handshake = Handshake::new(self.info_hash, crate::PEER_ID);
        self.conn
            .write_all(&handshake.serialize())
            .context("could not send handshake to peer")?;

        // Read handshake received from remote peer
        let mut response = [0u8; HANDSHAKE_LEN];
        self.conn
            .read_exact(&mut response)
            .context("could not read handshake received from peer")?;

        let reply = Handshake::deserialize(&response)?;

        // Check info hash received from remote peer
        if reply.info_hash != self.info_hash {
            bail!("handshake info hash from peer {} does not match", self.addr);
        }

        self.set_deadline(None)?;

        debug!(
            "Handshake with peer {} complete (peer id {})",
            self.addr,
            hex::encode(reply.peer_id)
        );

        Ok(reply.peer_id)
    }

    /// Read and parse one framed message from the peer.
    ///
    /// Messages have a 4-byte big-endian length prefix, followed by the
    /// message ID and payload. Length 0 indicates a keep-alive message.
    pub fn read_message(&mut self) -> Result<Message> {
        let message_len = self.read_message_len()?;

        if message_len == 0 {
            debug!("Received keep-alive from peer {}", self.addr);
            return Ok(Message::new(MESSAGE_KEEPALIVE));
        }

        let mut message_buf: Vec<u8> = vec![0; message_len];
        self.conn
            .read_exact(&mut message_buf)
            .context("could not read message received from peer")?;

        deserialize_message(&message_buf, message_len)
    }

    /// Read the 4-byte big-endian length prefix of an incoming message.
    fn read_message_len(&mut self) -> Result<usize> {
        let mut buf = [0u8; 4];
        self.conn
            .read_exact(&mut buf)
            .context("could not read message length received from peer")?;

        let mut cursor = Cursor::new(buf);
        let message_len = cursor.read_u32::<BigEndian>()?;

        Ok(message_len as usize)
    }

    /// Serialize and send one message to the peer.
    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        let encoded = message.serialize()?;

        self.conn
            .write_all(&encoded)
            .with_context(|| format!("could not send message id {} to peer", message.id))?;

        Ok(())
    }

    /// Download and verify one piece over this connection.
    ///
    /// Runs the full post-handshake sequence: bitfield, interested,
    /// unchoke, then one request/piece exchange per block. The piece is
    /// returned only after its SHA-1 digest matches the published hash.
    ///
    /// # Errors
    ///
    /// Any unexpected message id, truncated frame, mismatched piece index,
    /// out-of-bounds block or digest mismatch aborts the attempt; the
    /// caller decides whether to reassign the piece.
    pub fn download(&mut self, work: &PieceWork) -> Result<Vec<u8>> {
        // The first framed message after the handshake must be the peer's
        // bitfield. Its content is not consulted: pieces are assigned
        // upfront and a peer that lacks one fails the attempt instead.
        let message = self.read_message()?;
        if message.id != MESSAGE_BITFIELD {
            bail!("expected bitfield message from peer, got id {}", message.id);
        }

        // Declare interest
        self.send_message(&Message::new(MESSAGE_INTERESTED))?;

        // Wait until the peer unchokes us
        let message = self.read_message()?;
        if message.id != MESSAGE_UNCHOKE {
            bail!("expected unchoke message from peer, got id {}", message.id);
        }

        info!("Downloading piece {} from peer {}", work.index, self.addr);

        let mut piece_data = vec![0u8; work.length as usize];

        // Request each block in turn and wait for its data
        for block in divide_blocks(work.length) {
            self.send_message(&Message::request(work.index, block.begin, block.length)?)?;

            let message = self.read_message()?;
            if message.id != MESSAGE_PIECE {
                bail!("expected piece message from peer, got id {}", message.id);
            }

            let (index, begin, data) = message.parse_piece()?;

            // Check the peer answered for the piece we asked about
            if index != work.index {
                bail!(
                    "received piece index {} does not match requested index {}",
                    index,
                    work.index
                );
            }

            // Check the block lands inside the piece
            let begin = begin as usize;
            let end = begin
                .checked_add(data.len())
                .ok_or_else(|| anyhow!("received invalid byte offset within piece from peer"))?;
            if end > piece_data.len() {
                bail!("received invalid byte offset within piece from peer");
            }

            piece_data[begin..end].copy_from_slice(data);
        }

        // Compare the assembled piece against its published digest
        let digest: [u8; 20] = Sha1::digest(&piece_data).into();
        if digest != work.hash {
            bail!("piece {} failed hash verification", work.index);
        }

        debug!("Verified piece {} from peer {}", work.index, self.addr);

        Ok(piece_data)
    }
}
