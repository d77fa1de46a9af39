//! # BitTorrent Download Worker
//!
//! This module implements the worker that downloads pieces on behalf of
//! the scheduler. One worker runs per peer, all of them draining a shared
//! work queue.
//!
//! ## Download Process
//!
//! For every job taken from the queue the worker:
//!
//! 1. Dials the peer the job was assigned to (fresh connection per piece)
//! 2. Performs the BitTorrent handshake
//! 3. Runs the piece download procedure and verifies the piece digest
//! 4. Emits exactly one result, carrying the piece bytes or the error
//!
//! Workers exit when the work queue closes or when the result channel is
//! gone, which is how the scheduler abandons in-flight work after a
//! failure.

use crate::client::PeerClient;
use crate::piece::{PieceResult, PieceWork};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};

use std::time::Duration;

// Deadline for dialing a peer and completing the handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Downloads queued pieces from their assigned peers.
pub struct Worker {
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    info_hash: [u8; 20],
    /// Channel for receiving piece work assignments
    work: Receiver<PieceWork>,
    /// Channel for sending piece results
    results: Sender<PieceResult>,
}

impl Worker {
    /// Build a new worker around the scheduler's channel endpoints.
    ///
    /// # Arguments
    ///
    /// * `info_hash` - Identity of the torrent being downloaded.
    /// * `work` - Receiving end of the piece work queue.
    /// * `results` - Sending end of the piece result channel.
    ///
    pub fn new(
        info_hash: [u8; 20],
        work: Receiver<PieceWork>,
        results: Sender<PieceResult>,
    ) -> Worker {
        Worker {
            info_hash,
            work,
            results,
        }
    }

    /// Take jobs until the queue closes, emitting one result per job.
    pub fn run(&self) {
        while let Ok(work) = self.work.recv() {
            let index = work.index;
            let outcome = self.download_piece(&work);

            if let Err(error) = &outcome {
                warn!("Piece {} failed on peer {}: {:#}", index, work.peer, error);
            }

            // The drain is gone once it has seen a failure; stop quietly
            if self.results.send(PieceResult { index, outcome }).is_err() {
                debug!("Worker exiting: result channel closed");
                return;
            }
        }

        debug!("Worker exiting: work queue drained");
    }

    /// Download a torrent piece from the peer it was assigned to.
    ///
    /// # Arguments
    ///
    /// * `work` - A piece to download.
    ///
    fn download_piece(&self, work: &PieceWork) -> Result<Vec<u8>> {
        let mut client = PeerClient::connect(work.peer.socket_addr(), self.info_hash, CONNECT_TIMEOUT)?;
        client.handshake(CONNECT_TIMEOUT)?;

        client.download(work)
    }
}
