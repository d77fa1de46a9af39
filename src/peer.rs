//! # BitTorrent Peer Information
//!
//! This module defines the `Peer` structure and parses the compact peer
//! lists returned by trackers.
//!
//! ## Compact Peer Format
//!
//! The compact format consists of 6-byte entries:
//!
//! ```text
//! <IP: 4 bytes><Port: 2 bytes>
//! ```
//!
//! - IP address in network byte order (big-endian)
//! - Port number in network byte order (big-endian)

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt};

use std::fmt;
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const PEER_SIZE: usize = 6;

/// A remote peer in the swarm: an IPv4 address and a TCP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// IPv4 address of the peer
    pub ip: Ipv4Addr,
    /// Port number for connecting to the peer
    pub port: u16,
}

impl Peer {
    /// Get the socket address to dial this peer at.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.ip), self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parse a compact peer list from a tracker response.
///
/// Each peer occupies 6 bytes: a big-endian IPv4 address followed by a
/// big-endian port.
///
/// # Arguments
///
/// * `compact` - The raw `peers` byte string from the tracker reply.
///
/// # Errors
///
/// Returns an error if the length is not a multiple of 6 bytes.
pub fn parse_compact(compact: &[u8]) -> Result<Vec<Peer>> {
    if compact.len() % PEER_SIZE != 0 {
        return Err(anyhow!(
            "received invalid peers from tracker: length {} is not a multiple of {}",
            compact.len(),
            PEER_SIZE
        ));
    }

    let mut peers = Vec::with_capacity(compact.len() / PEER_SIZE);

    for chunk in compact.chunks_exact(PEER_SIZE) {
        let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);

        let mut port_cursor = Cursor::new(&chunk[4..6]);
        let port = port_cursor.read_u16::<BigEndian>()?;

        peers.push(Peer { ip, port });
    }

    Ok(peers)
}
