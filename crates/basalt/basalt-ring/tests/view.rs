use basalt_ring::{Consumer, PushOutcome, Record, RingChannel, RingConfig, RingError, bytes_for_ring};

fn ring_file(dir: &tempfile::TempDir) -> (std::path::PathBuf, RingChannel) {
    let path = dir.path().join("ring");
    let chan = RingChannel::create(&path, RingConfig::new(1024).unwrap()).unwrap();
    (path, chan)
}

#[test]
fn second_mapping_sees_published_records() {
    let dir = tempfile::tempdir().unwrap();
    let (path, mut chan) = ring_file(&dir);
    assert_eq!(chan.producer().push(b"over the file"), PushOutcome::Written);

    let mut other = Consumer::open(&path).unwrap();
    assert_eq!(other.capacity(), 1024);
    let mut seen = Vec::new();
    other
        .poll(|r| {
            if let Record::Packet { payload, .. } = r {
                seen.push(payload.to_vec());
            }
        })
        .unwrap();
    assert_eq!(seen, vec![b"over the file".to_vec()]);

    // The tail lives in the shared control page.
    assert_eq!(chan.control().stats().tail, chan.control().stats().head);
}

#[test]
fn view_larger_than_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _chan) = ring_file(&dir);
    let len = bytes_for_ring(1024) + 1;
    match Consumer::open_with_len(&path, len) {
        Err(RingError::ViewTooLarge {
            requested,
            available,
        }) => {
            assert_eq!(requested, len as u64);
            assert_eq!(available, bytes_for_ring(1024) as u64);
        }
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("oversized view accepted"),
    }
}

#[test]
fn view_shorter_than_ring_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _chan) = ring_file(&dir);

    for len in [100, bytes_for_ring(1024) - 1] {
        assert!(
            matches!(
                Consumer::open_with_len(&path, len),
                Err(RingError::ViewTooSmall { .. })
            ),
            "len={len}"
        );
    }
    assert!(Consumer::open_with_len(&path, bytes_for_ring(1024)).is_ok());
}

#[test]
fn opening_a_foreign_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-a-ring");
    std::fs::write(&path, vec![0u8; 8192]).unwrap();
    assert!(matches!(Consumer::open(&path), Err(RingError::BadLayout(_))));

    assert!(matches!(
        Consumer::open(dir.path().join("missing")),
        Err(RingError::Io(_))
    ));
}

#[test]
fn crafted_cursors_are_refused_on_attach() {
    let dir = tempfile::tempdir().unwrap();
    let (path, chan) = ring_file(&dir);
    drop(chan);

    // head at offset 0, tail at offset 8 of the control page.
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0..8].copy_from_slice(&13u64.to_le_bytes());
    bytes[8..16].copy_from_slice(&(u64::MAX - 3).to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(Consumer::open(&path), Err(RingError::BadLayout(_))));
}
