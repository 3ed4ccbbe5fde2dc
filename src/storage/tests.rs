use super::*;

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[tokio::test]
async fn test_leecher_preallocates_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, false)
        .await
        .unwrap();

    assert_eq!(store.piece_count(), 3);
    assert_eq!(store.count(), 0);
    assert!(!store.is_complete());
    assert!(!store.has(0));

    let meta = std::fs::metadata(dir.path().join("shared.dat")).unwrap();
    assert_eq!(meta.len(), 250);
}

#[tokio::test]
async fn test_last_piece_is_short() {
    let dir = tempfile::tempdir().unwrap();
    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, false)
        .await
        .unwrap();

    assert_eq!(store.piece_len(0), 100);
    assert_eq!(store.piece_len(1), 100);
    assert_eq!(store.piece_len(2), 50);
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, false)
        .await
        .unwrap();

    let pieces = [payload(100, 1), payload(100, 2), payload(50, 3)];
    for (i, data) in pieces.iter().enumerate() {
        let newly = store.write_piece(i as u32, data).await.unwrap();
        assert!(newly);
        assert!(store.has(i as u32));
        assert_eq!(store.count(), i + 1);
    }
    assert!(store.is_complete());

    for (i, data) in pieces.iter().enumerate() {
        let read = store.read_piece(i as u32).await.unwrap();
        assert_eq!(&read[..], &data[..]);
    }
}

#[tokio::test]
async fn test_duplicate_write_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, false)
        .await
        .unwrap();

    assert!(store.write_piece(0, &payload(100, 9)).await.unwrap());
    assert!(!store.write_piece(0, &payload(100, 9)).await.unwrap());
    assert_eq!(store.count(), 1);
}

#[tokio::test]
async fn test_write_rejects_wrong_length() {
    let dir = tempfile::tempdir().unwrap();
    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, false)
        .await
        .unwrap();

    let err = store.write_piece(0, &payload(99, 0)).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidPieceLength { .. }));

    // The short last piece wants exactly 50 bytes.
    let err = store.write_piece(2, &payload(100, 0)).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidPieceLength { .. }));
}

#[tokio::test]
async fn test_invalid_index_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, false)
        .await
        .unwrap();

    assert!(matches!(
        store.write_piece(3, &payload(100, 0)).await.unwrap_err(),
        StorageError::InvalidPieceIndex(3)
    ));
    assert!(matches!(
        store.read_piece(3).await.unwrap_err(),
        StorageError::InvalidPieceIndex(3)
    ));
}

#[tokio::test]
async fn test_read_of_missing_piece_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, false)
        .await
        .unwrap();

    assert!(matches!(
        store.read_piece(1).await.unwrap_err(),
        StorageError::PieceUnavailable(1)
    ));
}

#[tokio::test]
async fn test_seed_opens_existing_file_complete() {
    let dir = tempfile::tempdir().unwrap();
    let mut contents = payload(100, 10);
    contents.extend(payload(100, 20));
    contents.extend(payload(50, 30));
    std::fs::write(dir.path().join("shared.dat"), &contents).unwrap();

    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, true)
        .await
        .unwrap();

    assert!(store.is_complete());
    assert_eq!(store.count(), 3);

    let last = store.read_piece(2).await.unwrap();
    assert_eq!(&last[..], &contents[200..]);
}

#[tokio::test]
async fn test_seed_without_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PieceStore::open(dir.path(), "shared.dat", 250, 100, true)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::FileNotFound(_)));
}

#[tokio::test]
async fn test_bitfield_snapshot_tracks_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = PieceStore::open(dir.path(), "shared.dat", 250, 100, false)
        .await
        .unwrap();

    let before = store.bitfield();
    store.write_piece(1, &payload(100, 0)).await.unwrap();
    let after = store.bitfield();

    // Snapshots are independent of later writes.
    assert!(!before.has(1));
    assert!(after.has(1));
    assert_eq!(after.count(), 1);
}
