//! # Remora BitTorrent Client
//!
//! A minimal BitTorrent download client library.
//!
//! ## Features
//!
//! - Bencode decoding and canonical encoding
//! - Torrent metadata parsing with info-hash computation
//! - Magnet link parsing
//! - HTTP tracker peer discovery (compact peer lists)
//! - Peer wire protocol: handshake, message framing, piece downloads
//! - Multi-peer concurrent downloading with per-piece SHA-1 verification
//!
//! ## Architecture
//!
//! Downloads follow a worker-pool design:
//!
//! - **Scheduler**: queues one job per piece and assembles the final file
//! - **Worker threads**: one per peer, each downloading one piece at a time
//! - **Channels**: coordinate piece work distribution and result collection

pub mod bencode;
pub mod client;
pub mod handshake;
pub mod magnet;
pub mod message;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
pub mod worker;

/// 20-byte ASCII identifier presented to trackers and peers.
pub const PEER_ID: [u8; 20] = *b"-MY0001-123456789012";

/// Port advertised to trackers. This client only downloads and never
/// listens on it.
pub const PORT: u16 = 6881;
