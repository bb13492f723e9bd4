use std::path::Path;

use block_exchange_protocol::{frame_length, BlockResponse, Decode, Encode, FileInfoResponse, Request};
use blockshare_lib::util::content_hash;
use blockshare_lib::{Error, FetchPolicy, FileRecord, FileStatus, Peer, PeerAddress, PeerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const BLOCK_SIZE: usize = 1024;

fn sample_file() -> Vec<u8> {
    (0..10_240).map(|idx| (idx % 251) as u8).collect()
}

async fn start_peer(neighbors: Vec<PeerAddress>, fetch_policy: FetchPolicy) -> Peer {
    let mut config = PeerConfig::new(PeerAddress::new("127.0.0.1", 0), neighbors);
    config.block_size = BLOCK_SIZE;
    config.fetch_policy = fetch_policy;

    Peer::start(config).await.expect("failed to start a peer")
}

fn address_of(peer: &Peer) -> PeerAddress {
    PeerAddress::new("127.0.0.1", peer.local_addr().port())
}

async fn unused_address() -> PeerAddress {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    PeerAddress::new("127.0.0.1", port)
}

/// Seeds `peer` with only some blocks of `data`
async fn seed_partial(peer: &Peer, filename: &str, data: &[u8], blocks: std::ops::Range<u32>) {
    let full = FileRecord::fragment(filename, data, BLOCK_SIZE).unwrap();
    let mut partial = FileRecord::new(filename, full.total_blocks(), full.content_hash());
    for index in blocks {
        partial.insert_block(index, full.block(index).unwrap().clone()).unwrap();
    }
    peer.files().insert(partial).await;
}

/// A neighbor that advertises `advertised` blocks of a file but answers every block request
/// with `block` (or `not_found` if it's `None`)
async fn spawn_fake_neighbor(
    total_blocks: u32,
    file_hash: String,
    advertised: std::ops::Range<u32>,
    block: Option<Vec<u8>>,
) -> PeerAddress {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = vec![0; 4096];
            let mut read = 0;
            loop {
                let n = stream.read(&mut buf[read..]).await.unwrap();
                read += n;
                if n == 0 || (read >= 4 && read >= frame_length(&buf[..4]).unwrap()) {
                    break;
                }
            }

            let mut output = Vec::new();
            match Request::decode(&buf[..read]).unwrap() {
                Request::GetFileInfo { .. } => FileInfoResponse::Success {
                    total_blocks,
                    file_hash: file_hash.clone(),
                    available_blocks: advertised.clone().collect(),
                }
                .encode(&mut output)
                .await
                .unwrap(),
                Request::GetBlock { .. } => match &block {
                    Some(block_data) => BlockResponse::Success {
                        block_data: block_data.clone(),
                    },
                    None => BlockResponse::NotFound,
                }
                .encode(&mut output)
                .await
                .unwrap(),
            }
            stream.write_all(&output).await.unwrap();
        }
    });

    PeerAddress::new("127.0.0.1", port)
}

#[tokio::test]
async fn downloads_from_a_single_seeder() {
    let data = sample_file();
    let seeder = start_peer(vec![], FetchPolicy::SinglePass).await;
    let loaded = seeder.share("shared.bin".to_string(), &data).await.unwrap();
    assert_eq!(loaded.total_blocks, 10);

    let leecher = start_peer(vec![address_of(&seeder)], FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("downloaded.bin");

    let report = leecher.download("shared.bin", Some(&output)).await.unwrap();

    assert_eq!(tokio::fs::read(&output).await.unwrap(), data);
    assert_eq!(report.total_blocks, 10);
    assert_eq!(report.fetched_blocks, 10);
    assert_eq!(report.sources, vec![(address_of(&seeder), 10)]);

    let record = leecher.files().get("shared.bin").await.unwrap();
    assert_eq!(record.read().await.content_hash(), content_hash(&data));
    assert_eq!(
        leecher.status().await.get("shared.bin"),
        Some(&FileStatus {
            held_blocks: 10,
            total_blocks: 10
        })
    );
}

#[tokio::test]
async fn combines_blocks_from_several_neighbors() {
    let data = sample_file();
    let first = start_peer(vec![], FetchPolicy::SinglePass).await;
    let second = start_peer(vec![], FetchPolicy::SinglePass).await;
    seed_partial(&first, "shared.bin", &data, 0..5).await;
    seed_partial(&second, "shared.bin", &data, 5..10).await;

    let leecher = start_peer(vec![address_of(&first), address_of(&second)], FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("downloaded.bin");

    let report = leecher.download("shared.bin", Some(&output)).await.unwrap();

    assert_eq!(tokio::fs::read(&output).await.unwrap(), data);
    assert_eq!(report.sources, vec![(address_of(&first), 5), (address_of(&second), 5)]);
}

#[tokio::test]
async fn downloaded_file_is_served_further() {
    let data = sample_file();
    let seeder = start_peer(vec![], FetchPolicy::SinglePass).await;
    seeder.share("shared.bin".to_string(), &data).await.unwrap();

    let middle = start_peer(vec![address_of(&seeder)], FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    middle
        .download("shared.bin", Some(&dir.path().join("middle.bin")))
        .await
        .unwrap();

    let last = start_peer(vec![address_of(&middle)], FetchPolicy::SinglePass).await;
    let output = dir.path().join("last.bin");
    last.download("shared.bin", Some(&output)).await.unwrap();

    assert_eq!(tokio::fs::read(&output).await.unwrap(), data);
}

#[tokio::test]
async fn unknown_file_is_not_found() {
    let first = start_peer(vec![], FetchPolicy::SinglePass).await;
    let second = start_peer(vec![], FetchPolicy::SinglePass).await;
    second.share("other.bin".to_string(), b"other").await.unwrap();

    let neighbors = vec![address_of(&first), unused_address().await, address_of(&second)];
    let leecher = start_peer(neighbors, FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("missing.bin");

    let err = leecher.download("missing.bin", Some(&output)).await.unwrap_err();

    assert!(matches!(err, Error::FileNotFound { ref filename } if filename == "missing.bin"));
    assert!(!output.exists());
    assert!(leecher.status().await.is_empty());
}

#[tokio::test]
async fn missing_blocks_fail_the_download() {
    let data = sample_file();
    let seeder = start_peer(vec![], FetchPolicy::SinglePass).await;
    seed_partial(&seeder, "shared.bin", &data, 0..5).await;

    let leecher = start_peer(vec![address_of(&seeder)], FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("downloaded.bin");

    let err = leecher.download("shared.bin", Some(&output)).await.unwrap_err();

    match err {
        Error::IncompleteDownload {
            have, total, missing, ..
        } => {
            assert_eq!((have, total), (5, 10));
            assert_eq!(missing, vec![5, 6, 7, 8, 9]);
        }
        other => panic!("expected an incomplete download, got {:?}", other),
    }
    assert!(!output.exists());

    // Blocks that were fetched are kept, so a later attempt only needs the rest
    seed_partial(&seeder, "shared.bin", &data, 0..10).await;
    let report = leecher.download("shared.bin", Some(&output)).await.unwrap();
    assert_eq!(report.fetched_blocks, 5);
    assert_eq!(tokio::fs::read(&output).await.unwrap(), data);
}

#[tokio::test]
async fn single_pass_does_not_retry_other_holders() {
    let data = sample_file();
    let seeder = start_peer(vec![], FetchPolicy::SinglePass).await;
    seeder.share("shared.bin".to_string(), &data).await.unwrap();
    let stale = spawn_fake_neighbor(10, content_hash(&data), 0..10, None).await;
    let neighbors = vec![stale.clone(), address_of(&seeder)];
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("downloaded.bin");

    let single_pass = start_peer(neighbors.clone(), FetchPolicy::SinglePass).await;
    let err = single_pass.download("shared.bin", Some(&output)).await.unwrap_err();
    assert!(matches!(err, Error::IncompleteDownload { have: 0, total: 10, .. }));
    assert!(!output.exists());

    let retrying = start_peer(neighbors, FetchPolicy::RetryAlternateHolders).await;
    let report = retrying.download("shared.bin", Some(&output)).await.unwrap();
    assert_eq!(report.sources, vec![(stale, 0), (address_of(&seeder), 10)]);
    assert_eq!(tokio::fs::read(&output).await.unwrap(), data);
}

#[tokio::test]
async fn corrupted_blocks_are_never_persisted() {
    let data = sample_file();
    let liar = spawn_fake_neighbor(10, content_hash(&data), 0..10, Some(vec![0; BLOCK_SIZE])).await;

    let leecher = start_peer(vec![liar], FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("downloaded.bin");

    let err = leecher.download("shared.bin", Some(&output)).await.unwrap_err();

    match err {
        Error::Integrity { expected, actual, .. } => {
            assert_eq!(expected, content_hash(&data));
            assert_eq!(actual, content_hash(&vec![0; 10 * BLOCK_SIZE]));
        }
        other => panic!("expected an integrity failure, got {:?}", other),
    }
    assert!(!output.exists());
    // The bad blocks are dropped, so the next attempt starts over
    assert_eq!(
        leecher.status().await.get("shared.bin"),
        Some(&FileStatus {
            held_blocks: 0,
            total_blocks: 10
        })
    );
}

#[tokio::test]
async fn corrupted_blocks_from_an_earlier_attempt_are_discarded() {
    let data = sample_file();
    let seeder = start_peer(vec![], FetchPolicy::SinglePass).await;
    let liar = spawn_fake_neighbor(10, content_hash(&data), 0..5, Some(vec![0; BLOCK_SIZE])).await;

    let leecher = start_peer(vec![address_of(&seeder), liar.clone()], FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("downloaded.bin");

    // Only the liar knows the file yet, and only half of it
    let err = leecher.download("shared.bin", Some(&output)).await.unwrap_err();
    assert!(matches!(err, Error::IncompleteDownload { have: 5, total: 10, .. }));

    // The rest arrives intact, but the bad half kept from the first attempt spoils the file
    seeder.share("shared.bin".to_string(), &data).await.unwrap();
    let err = leecher.download("shared.bin", Some(&output)).await.unwrap_err();
    assert!(matches!(err, Error::Integrity { .. }));
    assert!(!output.exists());
    assert_eq!(
        leecher.status().await.get("shared.bin"),
        Some(&FileStatus {
            held_blocks: 0,
            total_blocks: 10
        })
    );

    // Starting over, every block comes from the first holder in neighbor order
    let report = leecher.download("shared.bin", Some(&output)).await.unwrap();
    assert_eq!(report.fetched_blocks, 10);
    assert_eq!(report.sources, vec![(address_of(&seeder), 10), (liar, 0)]);
    assert_eq!(tokio::fs::read(&output).await.unwrap(), data);
}

#[tokio::test]
async fn blocks_of_unexpected_length_are_discarded() {
    let data = sample_file();
    let oversized = spawn_fake_neighbor(10, content_hash(&data), 0..10, Some(vec![7; 2 * BLOCK_SIZE])).await;

    let leecher = start_peer(vec![oversized], FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("downloaded.bin");

    let err = leecher.download("shared.bin", Some(&output)).await.unwrap_err();

    // Never stored, so this is an incomplete download rather than a hash mismatch
    assert!(matches!(err, Error::IncompleteDownload { have: 0, total: 10, .. }));
    assert!(!output.exists());
}

#[tokio::test]
async fn conflicting_local_record_is_rejected() {
    let data = sample_file();
    let seeder = start_peer(vec![], FetchPolicy::SinglePass).await;
    seeder.share("shared.bin".to_string(), &data).await.unwrap();

    let leecher = start_peer(vec![address_of(&seeder)], FetchPolicy::SinglePass).await;
    leecher.share("shared.bin".to_string(), b"something else").await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let err = leecher
        .download("shared.bin", Some(&dir.path().join("downloaded.bin")))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConflictingFileInfo { remote_blocks: 10, .. }));
}

#[tokio::test]
async fn loads_files_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auto_test.txt");
    let contents = "Automated P2P transfer test\n".repeat(50);
    tokio::fs::write(&path, &contents).await.unwrap();

    let peer = start_peer(vec![], FetchPolicy::SinglePass).await;
    let loaded = peer.load(&path).await.unwrap();

    assert_eq!(loaded.filename, "auto_test.txt");
    assert_eq!(loaded.total_blocks, 2);
    assert_eq!(loaded.content_hash, content_hash(contents.as_bytes()));

    let empty = dir.path().join("empty.txt");
    tokio::fs::write(&empty, b"").await.unwrap();
    assert!(matches!(peer.load(&empty).await, Err(Error::EmptyInput)));
    assert!(matches!(
        peer.load(Path::new("/definitely/not/here.bin")).await,
        Err(Error::IoError(_))
    ));
}

#[tokio::test]
async fn stopped_peer_refuses_connections() {
    let data = sample_file();
    let mut seeder = start_peer(vec![], FetchPolicy::SinglePass).await;
    seeder.share("shared.bin".to_string(), &data).await.unwrap();
    let seeder_address = address_of(&seeder);

    seeder.stop().await.unwrap();
    // Stopping twice is fine
    seeder.stop().await.unwrap();

    let leecher = start_peer(vec![seeder_address], FetchPolicy::SinglePass).await;
    let dir = tempfile::tempdir().unwrap();
    let err = leecher
        .download("shared.bin", Some(&dir.path().join("downloaded.bin")))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FileNotFound { .. }));
}
