//! # BitTorrent Torrent Management
//!
//! This module handles torrent metadata and coordinates downloads.
//!
//! ## Torrent Metadata
//!
//! Torrent files are bencoded dictionaries:
//!
//! - **announce**: Tracker URL for peer discovery
//! - **created by** (optional): Client that produced the file
//! - **info**: Dictionary with file information and piece hashes
//!   - **name**: Suggested filename
//!   - **length**: Total file size in bytes
//!   - **piece length**: Size of each piece (except possibly the last)
//!   - **pieces**: Concatenated 20-byte SHA-1 digests, one per piece
//!
//! The info-hash identifying the torrent is the SHA-1 of the canonical
//! encoding of the complete `info` dictionary, unknown keys included, so
//! parsing keeps the decoded value tree around long enough to re-encode it
//! byte-exactly.
//!
//! ## Download Coordination
//!
//! A full download runs a worker pool:
//!
//! 1. One job per piece is queued, peers assigned round-robin
//! 2. One worker thread per peer drains the queue
//! 3. Results stream back over a channel in completion order
//! 4. The drain copies each piece into the file buffer at its offset
//! 5. Every piece digest is re-verified before the file is handed back
//!
//! The first failed piece aborts the whole download; closing the channels
//! makes the remaining workers wind down on their own.

use crate::bencode::{self, Value};
use crate::client::PeerClient;
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::worker::Worker;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use sha1::{Digest, Sha1};

use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

// Size of SHA-1 hash in bytes
const SHA1_HASH_SIZE: usize = 20;

// Deadline covering dial plus handshake in single-piece mode
const PIECE_FALLBACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Parsed torrent metadata.
///
/// Everything here is immutable once the metainfo is parsed; downloads
/// borrow it read-only.
#[derive(Debug, Clone)]
pub struct Torrent {
    /// Tracker URL for peer discovery
    pub announce: String,
    /// Client that produced the metainfo, when recorded
    pub created_by: Option<String>,
    /// Suggested filename from torrent metadata
    pub name: String,
    /// Total size of the file in bytes
    pub length: u64,
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u64,
    /// One 20-byte SHA-1 hash per piece
    piece_hashes: Vec<[u8; 20]>,
    /// 20-byte SHA-1 hash of the bencoded info dictionary
    info_hash: [u8; 20],
}

impl Torrent {
    /// Parse a torrent from the content of a metainfo file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the torrent.
    ///
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Torrent> {
        let buf = fs::read(&path).with_context(|| {
            format!("could not read torrent file {}", path.as_ref().display())
        })?;

        Self::from_bytes(&buf)
    }

    /// Parse a torrent from raw metainfo bytes.
    ///
    /// The top level must be a bencoded dictionary with `announce` and a
    /// well-formed `info` dictionary; anything else is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Torrent> {
        let (root, _) = bencode::decode(bytes).context("could not decode torrent file")?;

        if root.as_dict().is_none() {
            bail!("torrent is not a metainfo dictionary");
        }

        let announce = root
            .lookup(b"announce")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing or invalid field: announce"))?
            .to_string();

        let created_by = root
            .lookup(b"created by")
            .and_then(Value::as_str)
            .map(str::to_string);

        let info_dict = root
            .lookup(b"info")
            .filter(|value| value.as_dict().is_some())
            .ok_or_else(|| anyhow!("missing or invalid field: info"))?;

        let name = info_dict
            .lookup(b"name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing or invalid field: name"))?
            .to_string();

        let length = info_dict
            .lookup(b"length")
            .and_then(Value::as_integer)
            .filter(|&length| length > 0)
            .ok_or_else(|| anyhow!("missing or invalid field: length"))? as u64;

        let piece_length = info_dict
            .lookup(b"piece length")
            .and_then(Value::as_integer)
            .filter(|&length| length > 0)
            .ok_or_else(|| anyhow!("missing or invalid field: piece length"))? as u64;

        let pieces = info_dict
            .lookup(b"pieces")
            .and_then(Value::as_bytes)
            .ok_or_else(|| anyhow!("missing or invalid field: pieces"))?;

        let piece_hashes = split_piece_hashes(pieces)?;

        // One digest per piece, last piece short
        let expected_pieces = length.div_ceil(piece_length);
        if piece_hashes.len() as u64 != expected_pieces {
            bail!(
                "torrent is invalid: {} piece hashes for {} pieces",
                piece_hashes.len(),
                expected_pieces
            );
        }

        // The identity of the torrent is the digest of the canonical
        // encoding of the whole info dictionary, unknown keys included
        let info_hash: [u8; 20] = Sha1::digest(bencode::encode(info_dict)).into();

        Ok(Torrent {
            announce,
            created_by,
            name,
            length,
            piece_length,
            piece_hashes,
            info_hash,
        })
    }

    /// The 20-byte SHA-1 hash of the bencoded info dictionary.
    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Published digest of one piece.
    pub fn piece_hash(&self, index: u32) -> [u8; 20] {
        self.piece_hashes[index as usize]
    }

    /// All published piece digests, in piece order.
    pub fn piece_hashes(&self) -> &[[u8; 20]] {
        &self.piece_hashes
    }

    /// Actual length of one piece.
    ///
    /// Every piece is `piece length` bytes except the last, which only
    /// covers what remains of the file.
    pub fn piece_length_at(&self, index: u32) -> u64 {
        let count = self.piece_hashes.len() as u64;

        if u64::from(index) == count - 1 {
            self.length - self.piece_length * (count - 1)
        } else {
            self.piece_length
        }
    }

    /// Download the whole file from the given peers.
    ///
    /// Spawns one worker per peer over a shared queue holding one job per
    /// piece; results are drained in completion order and assembled into
    /// the file buffer by index. The buffer is returned only after every
    /// piece digest has been re-verified against the metainfo.
    ///
    /// # Arguments
    ///
    /// * `peers` - Peers returned by the tracker; assignment is
    ///   round-robin across them.
    ///
    pub fn download(&self, peers: &[Peer]) -> Result<Vec<u8>> {
        if peers.is_empty() {
            bail!("no peers available");
        }

        let piece_count = self.piece_count();
        info!(
            "Downloading {:?} ({} pieces) from {} peers",
            self.name,
            piece_count,
            peers.len()
        );

        // One slot per piece on both channels, so queueing every job up
        // front and emitting every result never blocks
        let (work_sender, work_receiver) = bounded::<PieceWork>(piece_count as usize);
        let (result_sender, result_receiver) = bounded::<PieceResult>(piece_count as usize);

        for index in 0..piece_count {
            let peer = peers[index as usize % peers.len()].clone();
            let length = u32::try_from(self.piece_length_at(index))
                .context("piece length exceeds supported size")?;
            let piece_work = PieceWork::new(index, self.piece_hash(index), length, peer);

            if work_sender.send(piece_work).is_err() {
                bail!("could not send piece to work channel");
            }
        }

        // Close the queue so workers exit once it drains
        drop(work_sender);

        for _ in 0..peers.len() {
            let worker = Worker::new(
                self.info_hash,
                work_receiver.clone(),
                result_sender.clone(),
            );

            thread::spawn(move || worker.run());
        }
        drop(work_receiver);
        drop(result_sender);

        let progress = ProgressBar::new(self.length);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")
                .unwrap()
                .progress_chars("#>-"),
        );

        // Build the file buffer from results as they complete
        let mut data: Vec<u8> = vec![0; self.length as usize];
        for _ in 0..piece_count {
            let result = result_receiver
                .recv()
                .map_err(|_| anyhow!("could not receive piece from result channel"))?;

            let bytes = result
                .outcome
                .with_context(|| format!("could not download piece {}", result.index))?;

            let begin = result.index as u64 * self.piece_length;
            data[begin as usize..begin as usize + bytes.len()].copy_from_slice(&bytes);

            progress.inc(bytes.len() as u64);
        }
        progress.finish_and_clear();

        // Re-verify every piece digest before handing the file back
        for index in 0..piece_count {
            let start = (index as u64 * self.piece_length) as usize;
            let end = ((index as u64 + 1) * self.piece_length).min(self.length) as usize;

            let digest: [u8; 20] = Sha1::digest(&data[start..end]).into();
            if digest != self.piece_hash(index) {
                bail!("assembled file failed verification at piece {}", index);
            }
        }

        info!("Downloaded and verified {:?}", self.name);

        Ok(data)
    }

    /// Download a single piece, trying each peer in turn.
    ///
    /// A short deadline covers dial plus handshake on every attempt so an
    /// unresponsive peer does not stall the fallback; the deadline is
    /// cleared for the block exchange itself. The last error is returned
    /// once every peer has failed.
    ///
    /// # Arguments
    ///
    /// * `peers` - Peers to try, in order.
    /// * `index` - The piece index.
    ///
    pub fn download_piece(&self, peers: &[Peer], index: u32) -> Result<Vec<u8>> {
        if index >= self.piece_count() {
            bail!(
                "piece index {} out of range ({} pieces)",
                index,
                self.piece_count()
            );
        }

        let length = u32::try_from(self.piece_length_at(index))
            .context("piece length exceeds supported size")?;

        let mut last_error = anyhow!("no peers available");

        for peer in peers {
            let work = PieceWork::new(index, self.piece_hash(index), length, peer.clone());

            match try_peer(&work, self.info_hash) {
                Ok(data) => return Ok(data),
                Err(error) => {
                    debug!("Peer {} failed for piece {}: {:#}", peer, index, error);
                    last_error = error;
                }
            }
        }

        warn!("Every peer failed for piece {}", index);

        Err(last_error)
            .with_context(|| format!("could not download piece {} from any peer", index))
    }
}

/// Download one piece from one peer over a fresh connection.
fn try_peer(work: &PieceWork, info_hash: [u8; 20]) -> Result<Vec<u8>> {
    let mut client =
        PeerClient::connect(work.peer.socket_addr(), info_hash, PIECE_FALLBACK_TIMEOUT)?;
    client.handshake(PIECE_FALLBACK_TIMEOUT)?;

    client.download(work)
}

/// Split the concatenated `pieces` digests into one hash per piece.
fn split_piece_hashes(pieces: &[u8]) -> Result<Vec<[u8; 20]>> {
    if pieces.len() % SHA1_HASH_SIZE != 0 {
        bail!("torrent is invalid: pieces length is not a multiple of 20");
    }

    let mut hashes = Vec::with_capacity(pieces.len() / SHA1_HASH_SIZE);

    for chunk in pieces.chunks_exact(SHA1_HASH_SIZE) {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(chunk);
        hashes.push(hash);
    }

    Ok(hashes)
}

/// Write downloaded data to its output path.
///
/// The file is created with permissions 0644 and truncated if it already
/// exists.
pub fn save_to(path: &Path, data: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("could not create output file {}", path.display()))?;

    file.write_all(data)
        .with_context(|| format!("could not write data to file {}", path.display()))?;

    Ok(())
}
