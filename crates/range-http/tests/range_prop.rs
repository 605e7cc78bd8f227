use proptest::prelude::*;

use range_http::{format_range_header, parse_content_range};

fn ows() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just(""), Just(" "), Just("\t"), Just("  "), Just(" \t "),]
}

proptest! {
    #[test]
    fn format_then_roundtrip_len(offset in 0u64..1_000_000, length in 1u64..1_000_000) {
        let header = format_range_header(offset, length).unwrap();
        let spec = header.strip_prefix("bytes=").unwrap();
        let (start_str, end_str) = spec.split_once('-').unwrap();
        let start: u64 = start_str.parse().unwrap();
        let end: u64 = end_str.parse().unwrap();
        prop_assert_eq!(start, offset);
        prop_assert_eq!(end - start + 1, length);
    }

    #[test]
    fn parse_content_range_accepts_surrounding_whitespace(
        pre in ows(),
        start in 0u64..1_000_000,
        len in 1u64..1_000,
        post in ows(),
    ) {
        let end = start + len - 1;
        let total = end + 1 + 500;
        let header = format!("{pre}bytes {start}-{end}/{total}{post}");
        let parsed = parse_content_range(&header).unwrap();
        prop_assert_eq!(parsed.range.start, start);
        prop_assert_eq!(parsed.range.end, end);
        prop_assert_eq!(parsed.total, Some(total));
    }

    #[test]
    fn parse_content_range_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        if let Ok(s) = std::str::from_utf8(&bytes) {
            let _ = parse_content_range(s);
        }
    }
}
