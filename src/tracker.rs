//! # BitTorrent Tracker Client
//!
//! This module talks to the HTTP tracker named in a torrent's `announce`
//! field to discover peers.
//!
//! ## Announce Request
//!
//! The request is a plain GET carrying a fixed set of query parameters:
//!
//! - `info_hash`: the raw 20-byte info-hash, percent-encoded byte by byte
//! - `peer_id`: the client's 20-byte identifier, encoded the same way
//! - `port`: the advertised listening port
//! - `uploaded` / `downloaded`: byte counters, always 0 for this client
//! - `left`: bytes still needed, the full length at the start
//! - `compact`: always 1, requesting the 6-bytes-per-peer reply format
//!
//! No other parameters are sent.
//!
//! ## Announce Reply
//!
//! The reply body is a bencoded dictionary. Only `peers` is consumed: a
//! byte string holding one 6-byte group per peer. The refresh `interval`
//! is ignored because a download uses a single announce.

use crate::peer::{self, Peer};

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::Deserialize;
use serde_bencode::de;
use serde_bytes::ByteBuf;
use url::Url;

use std::time::Duration;

// Overall deadline for the announce round trip
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Nominal `left` value announced when the torrent length is not known,
/// as in the magnet flow before any metadata exchange.
pub const UNKNOWN_LEFT: u64 = 100;

/// Tracker announce reply.
#[derive(Debug, Deserialize)]
struct TrackerReply {
    // Interval time to refresh the list of peers in seconds
    #[serde(default)]
    interval: u32,
    // Compact peer list
    peers: ByteBuf,
}

/// Request the peer list for a torrent from its tracker.
///
/// # Arguments
///
/// * `announce` - The tracker URL.
/// * `info_hash` - The 20-byte SHA-1 hash of the info dictionary.
/// * `left` - Number of bytes still to download (total length at start).
///
/// # Errors
///
/// Returns an error if the tracker is unreachable within the deadline, if
/// the reply is not a bencoded dictionary with a well-formed `peers` byte
/// string, or if the peer list is empty.
pub fn request_peers(announce: &str, info_hash: &[u8; 20], left: u64) -> Result<Vec<Peer>> {
    let url = build_tracker_url(announce, info_hash, left)?;
    debug!("Requesting peers from tracker {}", announce);

    // Build blocking HTTP client
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("could not build http client")?;

    // Send GET request to the tracker
    let response = client
        .get(&url)
        .send()
        .and_then(|response| response.bytes())
        .context("could not get tracker response")?;

    // Deserialize bencoded tracker response
    let reply = de::from_bytes::<TrackerReply>(&response)
        .context("could not decode tracker response")?;
    debug!("Tracker refresh interval: {}s (unused)", reply.interval);

    let peers = peer::parse_compact(&reply.peers)?;
    if peers.is_empty() {
        bail!("no peers available from tracker");
    }

    info!("Tracker returned {} peers", peers.len());

    Ok(peers)
}

/// Build the announce URL with its query parameters.
///
/// The info-hash and peer-id are raw bytes, so their parameters cannot go
/// through a text-only query API; they are percent-encoded here and the
/// query is appended to the announce URL as-is.
fn build_tracker_url(announce: &str, info_hash: &[u8; 20], left: u64) -> Result<String> {
    let base = Url::parse(announce).context("could not parse tracker url")?;

    let params = [
        ("info_hash", percent_encode(info_hash)),
        ("peer_id", percent_encode(&crate::PEER_ID)),
        ("port", crate::PORT.to_string()),
        ("uploaded", "0".to_string()),
        ("downloaded", "0".to_string()),
        ("left", left.to_string()),
        ("compact", "1".to_string()),
    ];

    let query = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let separator = if base.query().is_some() { '&' } else { '?' };

    Ok(format!("{base}{separator}{query}"))
}

/// Percent-encode arbitrary bytes for a URL query value.
///
/// Unreserved characters (RFC 3986 §2.3) pass through untouched; every
/// other byte becomes `%XX`.
fn percent_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&byte| match byte {
            b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' | b'.' | b'_' | b'~' => {
                char::from(byte).to_string()
            }
            _ => format!("%{byte:02X}"),
        })
        .collect()
}
