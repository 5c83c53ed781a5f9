use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use unwind_dns_domain::{TrustAnchorSet, ROOT_KSK_2017};
use unwind_dns_infrastructure::trust_file::{
    is_dnskey_line, parse_trust_anchors, send_trust_anchors, write_trust_anchors,
};

mod helpers;
use helpers::MockResolver;

const KSK_A: &str = ". 172800 IN DNSKEY 257 3 8 AwEAAaz/dGVzdGtleUE=";
const KSK_B: &str = ". 172800 IN DNSKEY 257 3 8 AwEAAaz/dGVzdGtleUI=";

fn file_with(contents: &str) -> File {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

fn read_back(file: &mut File) -> String {
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    contents
}

#[test]
fn test_dnskey_line_validation() {
    assert!(is_dnskey_line(ROOT_KSK_2017));
    assert!(is_dnskey_line(KSK_A));
    assert!(is_dnskey_line(". DNSKEY 257 3 8 AwEAAaz/dGVzdGtleUE="));
    assert!(is_dnskey_line(". 172800 in dnskey 256 3 13 AwEAAaz/dGVzdGtleUE="));

    assert!(!is_dnskey_line(""));
    assert!(!is_dnskey_line("not a dnskey at all"));
    assert!(!is_dnskey_line(". 172800 IN A 192.0.2.1"));
    // Protocol must be 3.
    assert!(!is_dnskey_line(". 172800 IN DNSKEY 257 2 8 AwEAAaz/dGVzdGtleUE="));
    // Key material must be base64.
    assert!(!is_dnskey_line(". 172800 IN DNSKEY 257 3 8 !!!notbase64!!!"));
    assert!(!is_dnskey_line(". 172800 IN DNSKEY 257 3 8"));
}

#[test]
fn test_parse_skips_garbage_lines() {
    let mut file = file_with(&format!(
        "# comment-ish garbage\n{}\nnoise noise\n{}\n",
        KSK_B, KSK_A
    ));
    let mut set = TrustAnchorSet::new();
    parse_trust_anchors(&mut file, &mut set);

    let anchors: Vec<&str> = set.iter().collect();
    assert_eq!(anchors, vec![KSK_A, KSK_B], "sorted, garbage dropped");
}

#[test]
fn test_parse_drops_duplicates() {
    let mut file = file_with(&format!("{}\n{}\n", KSK_A, KSK_A));
    let mut set = TrustAnchorSet::new();
    parse_trust_anchors(&mut file, &mut set);
    assert_eq!(set.len(), 1);
}

#[test]
fn test_write_produces_exact_lines() {
    let mut set = TrustAnchorSet::new();
    set.insert("B");
    set.insert("A");

    let mut file = tempfile::tempfile().unwrap();
    write_trust_anchors(&set, &mut file);

    assert_eq!(read_back(&mut file), "A\nB\n");
}

#[test]
fn test_write_truncates_longer_previous_content() {
    let mut file = file_with("this line is much longer than the replacement\nmore\n");
    let mut set = TrustAnchorSet::new();
    set.insert("A");

    write_trust_anchors(&set, &mut file);
    assert_eq!(read_back(&mut file), "A\n");
}

#[test]
fn test_write_empty_set_truncates_to_nothing() {
    let mut file = file_with("stale\n");
    let set = TrustAnchorSet::new();
    write_trust_anchors(&set, &mut file);
    assert_eq!(read_back(&mut file), "");
}

#[test]
fn test_roundtrip_through_file() {
    let mut set = TrustAnchorSet::new();
    set.insert(KSK_B);
    set.insert(KSK_A);

    let mut file = tempfile::tempfile().unwrap();
    write_trust_anchors(&set, &mut file);

    file.seek(SeekFrom::Start(0)).unwrap();
    let mut reloaded = TrustAnchorSet::new();
    parse_trust_anchors(&mut file, &mut reloaded);
    assert_eq!(set, reloaded);
}

#[test]
fn test_send_replays_sorted_with_done_marker() {
    let mut set = TrustAnchorSet::new();
    set.insert("B");
    set.insert("A");

    let mut resolver = MockResolver::default();
    send_trust_anchors(&set, &mut resolver).unwrap();

    assert_eq!(resolver.anchors, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(resolver.done_markers, 1);
}
