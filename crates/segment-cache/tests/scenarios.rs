use segment_cache::Cache;

#[test]
fn scenario_empty_cache_seek() {
    let mut cache = Cache::new(0, 64);
    cache.seek_read(1024).unwrap();
    assert_eq!(cache.read_offset(), 1024);
    assert_eq!(cache.bytes_readable(None), 0);
}

#[test]
fn scenario_single_write() {
    let mut cache = Cache::new(0, 64);
    let bytes: Vec<u8> = (0..=255u8).take(256).collect();
    cache.write(&bytes).unwrap();
    assert_eq!(cache.write_offset(), 256);
    cache.seek_read(0).unwrap();
    assert_eq!(cache.bytes_readable(None), 256);
    assert_eq!(cache.ranges(), vec![segment_cache::ByteRange { start: 0, end: 256 }]);
}

#[test]
fn scenario_sparse_seek_write_then_read() {
    let mut cache = Cache::new(0, 64);
    cache.seek_write(32).unwrap();
    cache.write(&[0, 1, 2, 3, 4, 5, 6]).unwrap();
    cache.write(&[0, 1, 2, 3, 4]).unwrap();
    cache.write(&[0, 1, 2, 3, 4, 5]).unwrap();

    cache.seek_read(4).unwrap();
    let mut buf = vec![0u8; 14];
    let n = cache.read_bytes(&mut buf);
    assert_eq!(n, 0, "offset 4 sits in the hole before the sparse write at 32");

    cache.seek_read(36).unwrap();
    let mut buf = vec![0u8; 14];
    let n = cache.read_bytes(&mut buf);
    assert_eq!(n, 14);
    assert_eq!(&buf, &[4, 5, 6, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 5]);
}

#[test]
fn round_trip_law_seek_then_read_matches_write() {
    let mut cache = Cache::new(0, 64);
    cache.seek_write(10).unwrap();
    let payload = b"round-trip-bytes";
    cache.write(payload).unwrap();

    cache.seek_read(10).unwrap();
    let mut buf = vec![0u8; payload.len()];
    let n = cache.read_bytes(&mut buf);
    assert_eq!(n as usize, payload.len());
    assert_eq!(&buf, payload);
}

#[test]
fn round_trip_law_two_writes_concatenate() {
    let mut cache = Cache::new(0, 64);
    cache.write(b"hello-").unwrap();
    cache.write(b"world!").unwrap();

    cache.seek_read(0).unwrap();
    let mut buf = vec![0u8; 12];
    cache.read_bytes(&mut buf);
    assert_eq!(&buf, b"hello-world!");
}
