//! # Magnet Link Parsing
//!
//! This module parses `magnet:?` URIs, which identify a torrent by its
//! info-hash and tracker hints without shipping the metainfo file itself.
//!
//! ## Recognised Parameters
//!
//! - `xt` (required): exact topic, must be `urn:btih:` followed by the
//!   40-hex-character info-hash
//! - `dn` (optional): display name
//! - `tr` (repeatable): tracker URL
//!
//! Values are percent-decoded. Non-BitTorrent `xt` schemes are rejected.

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

const BTIH_PREFIX: &str = "urn:btih:";

/// A parsed magnet link.
#[derive(Debug, Clone)]
pub struct Magnet {
    /// 20-byte SHA-1 info-hash decoded from the `xt` parameter
    pub info_hash: [u8; 20],
    /// Display name (dn parameter)
    pub display_name: Option<String>,
    /// Tracker URLs (tr parameters)
    pub trackers: Vec<String>,
}

impl Magnet {
    /// Parse a magnet URI.
    ///
    /// # Arguments
    ///
    /// * `uri` - The magnet link, starting with `magnet:?`.
    ///
    /// # Errors
    ///
    /// Returns an error when the scheme is wrong, when `xt` is missing or
    /// not a `urn:btih:` topic, or when the hash is not 40 hex characters.
    pub fn parse(uri: &str) -> Result<Magnet> {
        if !uri.starts_with("magnet:?") {
            bail!("invalid magnet link: missing magnet:? prefix");
        }

        let url = Url::parse(uri).context("invalid magnet link")?;

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => info_hash = Some(Self::decode_topic(&value)?),
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash =
            info_hash.ok_or_else(|| anyhow!("invalid magnet link: missing xt parameter"))?;

        Ok(Magnet {
            info_hash,
            display_name,
            trackers,
        })
    }

    /// Decode the info-hash from an `xt` value.
    fn decode_topic(topic: &str) -> Result<[u8; 20]> {
        let hash_hex = topic
            .strip_prefix(BTIH_PREFIX)
            .ok_or_else(|| anyhow!("invalid magnet link: xt is not a urn:btih topic"))?;

        if hash_hex.len() != 40 {
            bail!("invalid magnet link: info hash must be 40 hex characters");
        }

        let bytes =
            hex::decode(hash_hex).context("invalid magnet link: info hash is not valid hex")?;

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&bytes);

        Ok(info_hash)
    }

    /// Hex rendering of the info-hash.
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// First tracker URL of the link.
    ///
    /// # Errors
    ///
    /// Returns an error when the link carries no `tr` parameter; peer
    /// discovery is impossible without one.
    pub fn tracker(&self) -> Result<&str> {
        self.trackers
            .first()
            .map(String::as_str)
            .ok_or_else(|| anyhow!("magnet link has no tracker url"))
    }
}
