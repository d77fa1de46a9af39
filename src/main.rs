//! # Remora BitTorrent Client
//!
//! Command-line front end for the download library.
//!
//! ## Usage
//!
//! ```bash
//! remora decode <bencoded-value>
//! remora info <torrent-file>
//! remora peers <torrent-file>
//! remora handshake <torrent-file> <host:port>
//! remora download_piece -o <output> <torrent-file> <piece-index>
//! remora download -o <output> <torrent-file>
//! remora magnet_parse <magnet-uri>
//! remora magnet_handshake <magnet-uri>
//! ```
//!
//! Every subcommand exits 0 on success and 1 on failure, with the error
//! printed to stderr.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use remora::bencode;
use remora::client::PeerClient;
use remora::magnet::Magnet;
use remora::torrent::{self, Torrent};
use remora::tracker;

// Deadline for dialing and handshaking a single explicit peer
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A minimal command-line BitTorrent download client, written in Rust."
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode {
        /// The bencoded value
        value: String,
    },

    /// Print tracker URL, length, info hash and piece hashes of a torrent
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// Print the peers returned by the torrent's tracker
    Peers {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// Handshake with one peer and print its peer id
    Handshake {
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Peer address as host:port
        peer: String,
    },

    /// Download a single piece, trying each peer in turn
    DownloadPiece {
        /// Output filename
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Zero-based piece index
        piece_index: u32,
    },

    /// Download the whole file
    Download {
        /// Output filename
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// Print the tracker URL and info hash of a magnet link
    MagnetParse {
        /// The magnet URI
        uri: String,
    },

    /// Resolve a magnet link and handshake with the first peer
    MagnetHandshake {
        /// The magnet URI
        uri: String,
    },
}

/// Resolve a host:port argument to a socket address.
fn resolve_peer_addr(peer: &str) -> Result<SocketAddr> {
    peer.to_socket_addrs()
        .with_context(|| format!("could not resolve peer address {peer}"))?
        .next()
        .ok_or_else(|| anyhow!("could not resolve peer address {peer}"))
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Decode { value } => {
            let (decoded, _) = bencode::decode(value.as_bytes())?;
            println!("{}", decoded.to_json());
        }

        Command::Info { torrent } => {
            let torrent = Torrent::from_file(torrent)?;

            println!("Tracker URL: {}", torrent.announce);
            println!("Length: {}", torrent.length);
            println!("Info Hash: {}", hex::encode(torrent.info_hash()));
            println!("Piece Length: {}", torrent.piece_length);
            println!("Piece Hashes:");
            for hash in torrent.piece_hashes() {
                println!("{}", hex::encode(hash));
            }
        }

        Command::Peers { torrent } => {
            let torrent = Torrent::from_file(torrent)?;
            let peers =
                tracker::request_peers(&torrent.announce, &torrent.info_hash(), torrent.length)?;

            for peer in peers {
                println!("{peer}");
            }
        }

        Command::Handshake { torrent, peer } => {
            let torrent = Torrent::from_file(torrent)?;
            let addr = resolve_peer_addr(&peer)?;

            let mut client = PeerClient::connect(addr, torrent.info_hash(), HANDSHAKE_TIMEOUT)?;
            let peer_id = client.handshake(HANDSHAKE_TIMEOUT)?;

            println!("Peer ID: {}", hex::encode(peer_id));
        }

        Command::DownloadPiece {
            output,
            torrent,
            piece_index,
        } => {
            let torrent = Torrent::from_file(torrent)?;
            let peers =
                tracker::request_peers(&torrent.announce, &torrent.info_hash(), torrent.length)?;

            let data = torrent.download_piece(&peers, piece_index)?;
            torrent::save_to(&output, &data)?;
        }

        Command::Download { output, torrent } => {
            let torrent = Torrent::from_file(torrent)?;
            let peers =
                tracker::request_peers(&torrent.announce, &torrent.info_hash(), torrent.length)?;

            let data = torrent.download(&peers)?;
            torrent::save_to(&output, &data)?;
        }

        Command::MagnetParse { uri } => {
            let magnet = Magnet::parse(&uri)?;

            println!("Tracker URL: {}", magnet.tracker()?);
            println!("Info Hash: {}", magnet.info_hash_hex());
        }

        Command::MagnetHandshake { uri } => {
            let magnet = Magnet::parse(&uri)?;
            let peers =
                tracker::request_peers(magnet.tracker()?, &magnet.info_hash, tracker::UNKNOWN_LEFT)?;

            // The metainfo is unavailable, so any peer that answers the
            // handshake will do
            let peer = peers
                .first()
                .ok_or_else(|| anyhow!("no peers available"))?;

            let mut client =
                PeerClient::connect(peer.socket_addr(), magnet.info_hash, HANDSHAKE_TIMEOUT)?;
            let peer_id = client.handshake(HANDSHAKE_TIMEOUT)?;

            println!("Peer ID: {}", hex::encode(peer_id));
        }
    }

    Ok(())
}

fn main() {
    pretty_env_logger::init_timed();

    let args = Args::parse();

    if let Err(error) = run(args) {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }

    std::process::exit(0);
}
