//! Integration tests for the peer wire protocol and the download
//! scheduler, driven against scripted in-process peers.
//!
//! Each scripted peer is a real TCP listener speaking just enough of the
//! protocol for a leecher: it answers the handshake, claims every piece in
//! its bitfield, unchokes after interest, and serves block requests from an
//! in-memory copy of the file.

use remora::bencode::{self, Value};
use remora::client::PeerClient;
use remora::peer::Peer;
use remora::torrent::{self, Torrent};

use sha1::{Digest, Sha1};

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

const SEEDER_PEER_ID: &[u8; 20] = b"-SEED01-999999999999";

/// Behaviour knobs for a scripted peer.
#[derive(Clone, Copy, Default)]
struct SeederScript {
    /// Reply to the handshake with a different info-hash
    wrong_info_hash: bool,
    /// Send a keep-alive frame before the bitfield
    keep_alive_first: bool,
    /// Serve zeroed block data instead of the real file
    corrupt_blocks: bool,
}

/// Start a scripted peer serving `file` and return its address.
fn spawn_seeder(
    file: Vec<u8>,
    piece_length: usize,
    info_hash: [u8; 20],
    script: SeederScript,
) -> Peer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let file = file.clone();
            thread::spawn(move || serve_leecher(stream, file, piece_length, info_hash, script));
        }
    });

    Peer {
        ip: Ipv4Addr::new(127, 0, 0, 1),
        port,
    }
}

fn serve_leecher(
    mut stream: TcpStream,
    file: Vec<u8>,
    piece_length: usize,
    info_hash: [u8; 20],
    script: SeederScript,
) {
    // Handshake exchange
    let mut incoming = [0u8; 68];
    if stream.read_exact(&mut incoming).is_err() {
        return;
    }
    assert_eq!(&incoming[1..20], b"BitTorrent protocol");
    assert_eq!(&incoming[28..48], &info_hash);

    let mut reply = [0u8; 68];
    reply[0] = 19;
    reply[1..20].copy_from_slice(b"BitTorrent protocol");
    if script.wrong_info_hash {
        reply[28..48].copy_from_slice(&[0x77; 20]);
    } else {
        reply[28..48].copy_from_slice(&info_hash);
    }
    reply[48..68].copy_from_slice(SEEDER_PEER_ID);
    if stream.write_all(&reply).is_err() {
        return;
    }

    if script.keep_alive_first && stream.write_all(&[0, 0, 0, 0]).is_err() {
        return;
    }

    // Bitfield claiming every piece
    let piece_count = file.len().div_ceil(piece_length);
    let bitfield = vec![0xFFu8; piece_count.div_ceil(8).max(1)];
    if send_frame(&mut stream, 5, &bitfield).is_err() {
        return;
    }

    // Expect interested, then unchoke
    let Some((id, _)) = read_frame(&mut stream) else {
        return;
    };
    assert_eq!(id, 2);
    if send_frame(&mut stream, 1, &[]).is_err() {
        return;
    }

    // Serve block requests until the leecher hangs up
    while let Some((id, payload)) = read_frame(&mut stream) {
        assert_eq!(id, 6);
        assert_eq!(payload.len(), 12);

        let index = u32::from_be_bytes(payload[0..4].try_into().unwrap()) as usize;
        let begin = u32::from_be_bytes(payload[4..8].try_into().unwrap()) as usize;
        let length = u32::from_be_bytes(payload[8..12].try_into().unwrap()) as usize;

        let offset = index * piece_length + begin;
        let block = if script.corrupt_blocks {
            vec![0u8; length]
        } else {
            file[offset..offset + length].to_vec()
        };

        let mut piece_payload = Vec::with_capacity(8 + block.len());
        piece_payload.extend_from_slice(&payload[0..8]);
        piece_payload.extend_from_slice(&block);

        if send_frame(&mut stream, 7, &piece_payload).is_err() {
            return;
        }
    }
}

fn send_frame(stream: &mut TcpStream, id: u8, payload: &[u8]) -> std::io::Result<()> {
    let length = (1 + payload.len()) as u32;
    stream.write_all(&length.to_be_bytes())?;
    stream.write_all(&[id])?;
    stream.write_all(payload)
}

fn read_frame(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut length_buf = [0u8; 4];
    stream.read_exact(&mut length_buf).ok()?;
    let length = u32::from_be_bytes(length_buf) as usize;
    if length == 0 {
        return Some((255, vec![]));
    }

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).ok()?;
    Some((body[0], body[1..].to_vec()))
}

/// Build a parsed torrent describing `file`.
fn build_torrent(file: &[u8], piece_length: usize) -> Torrent {
    let mut pieces = Vec::new();
    for chunk in file.chunks(piece_length) {
        let digest: [u8; 20] = Sha1::digest(chunk).into();
        pieces.extend_from_slice(&digest);
    }

    let info = Value::Dictionary(vec![
        (b"length".to_vec(), Value::Integer(file.len() as i64)),
        (b"name".to_vec(), Value::Bytes(b"scripted.bin".to_vec())),
        (b"piece length".to_vec(), Value::Integer(piece_length as i64)),
        (b"pieces".to_vec(), Value::Bytes(pieces)),
    ]);
    let root = Value::Dictionary(vec![
        (
            b"announce".to_vec(),
            Value::Bytes(b"http://127.0.0.1:1/announce".to_vec()),
        ),
        (b"info".to_vec(), info),
    ]);

    Torrent::from_bytes(&bencode::encode(&root)).unwrap()
}

/// A deterministic test file of the given size.
fn sample_file(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn temp_output(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("remora-test-{}-{}", std::process::id(), name))
}

#[test]
fn handshake_returns_the_remote_peer_id() {
    let file = sample_file(1024);
    let torrent = build_torrent(&file, 1024);
    let peer = spawn_seeder(file, 1024, torrent.info_hash(), SeederScript::default());

    let mut client = PeerClient::connect(
        peer.socket_addr(),
        torrent.info_hash(),
        Duration::from_secs(3),
    )
    .unwrap();
    let peer_id = client.handshake(Duration::from_secs(3)).unwrap();

    assert_eq!(&peer_id, SEEDER_PEER_ID);
}

#[test]
fn handshake_rejects_a_mismatched_info_hash() {
    let file = sample_file(1024);
    let torrent = build_torrent(&file, 1024);
    let script = SeederScript {
        wrong_info_hash: true,
        ..Default::default()
    };
    let peer = spawn_seeder(file, 1024, torrent.info_hash(), script);

    let mut client = PeerClient::connect(
        peer.socket_addr(),
        torrent.info_hash(),
        Duration::from_secs(3),
    )
    .unwrap();
    let error = client.handshake(Duration::from_secs(3)).unwrap_err();

    assert!(error.to_string().contains("info hash"));
}

#[test]
fn single_piece_download_with_a_short_final_block() {
    // 32896 bytes: two full 16384-byte blocks plus one 128-byte block
    let file = sample_file(32896);
    let torrent = build_torrent(&file, 32896);
    let peer = spawn_seeder(
        file.clone(),
        32896,
        torrent.info_hash(),
        SeederScript::default(),
    );

    let data = torrent.download_piece(&[peer], 0).unwrap();
    assert_eq!(data, file);

    // The piece lands on disk with mode 0644
    let output = temp_output("single-piece");
    torrent::save_to(&output, &data).unwrap();
    let written = std::fs::read(&output).unwrap();
    assert_eq!(written, file);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
    std::fs::remove_file(&output).unwrap();
}

#[test]
fn single_piece_download_falls_back_across_peers() {
    let file = sample_file(4096);
    let torrent = build_torrent(&file, 4096);

    // The first peer is a closed port; the fallback must reach the second
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Peer {
            ip: Ipv4Addr::new(127, 0, 0, 1),
            port,
        }
    };
    let live = spawn_seeder(
        file.clone(),
        4096,
        torrent.info_hash(),
        SeederScript::default(),
    );

    let data = torrent.download_piece(&[dead, live], 0).unwrap();
    assert_eq!(data, file);
}

#[test]
fn single_piece_download_reports_the_last_error() {
    let file = sample_file(4096);
    let torrent = build_torrent(&file, 4096);
    let script = SeederScript {
        corrupt_blocks: true,
        ..Default::default()
    };
    let peer = spawn_seeder(file, 4096, torrent.info_hash(), script);

    let error = torrent.download_piece(&[peer], 0).unwrap_err();
    assert!(format!("{error:#}").contains("hash verification"));
}

#[test]
fn keep_alive_is_not_accepted_in_place_of_the_bitfield() {
    let file = sample_file(4096);
    let torrent = build_torrent(&file, 4096);
    let script = SeederScript {
        keep_alive_first: true,
        ..Default::default()
    };
    let peer = spawn_seeder(file, 4096, torrent.info_hash(), script);

    let error = torrent.download_piece(&[peer], 0).unwrap_err();
    assert!(format!("{error:#}").contains("bitfield"));
}

#[test]
fn full_download_across_two_peers() {
    // Three pieces, the last one short, spread over two peers
    let piece_length = 8192;
    let file = sample_file(2 * piece_length + 4096);
    let torrent = build_torrent(&file, piece_length);

    let peer_a = spawn_seeder(
        file.clone(),
        piece_length,
        torrent.info_hash(),
        SeederScript::default(),
    );
    let peer_b = spawn_seeder(
        file.clone(),
        piece_length,
        torrent.info_hash(),
        SeederScript::default(),
    );

    let data = torrent.download(&[peer_a, peer_b]).unwrap();
    assert_eq!(data, file);

    let output = temp_output("full-download");
    torrent::save_to(&output, &data).unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), file);
    std::fs::remove_file(&output).unwrap();
}

#[test]
fn full_download_fails_fast_on_a_corrupt_peer() {
    let piece_length = 8192;
    let file = sample_file(3 * piece_length);
    let torrent = build_torrent(&file, piece_length);

    let good = spawn_seeder(
        file.clone(),
        piece_length,
        torrent.info_hash(),
        SeederScript::default(),
    );
    let bad = spawn_seeder(
        file.clone(),
        piece_length,
        torrent.info_hash(),
        SeederScript {
            corrupt_blocks: true,
            ..Default::default()
        },
    );

    let error = torrent.download(&[good, bad]).unwrap_err();
    assert!(format!("{error:#}").contains("could not download piece"));
}
