use unwind_dns_domain::query::{flags, rcode};
use unwind_dns_infrastructure::dns::wire::{
    check_query, parse_edns, parse_question, QueryCheck,
};

mod helpers;
use helpers::{build_query, build_query_with_edns};

const RD: u16 = flags::RD;

#[test]
fn test_short_packet_is_dropped() {
    let mut pkt = vec![0u8; 11];
    assert_eq!(check_query(&mut pkt), QueryCheck::Drop);
}

#[test]
fn test_response_bit_is_dropped() {
    let mut pkt = build_query(1, flags::QR | RD, "example.com.", 1, 1);
    assert_eq!(check_query(&mut pkt), QueryCheck::Drop);
}

#[test]
fn test_truncated_bit_rejected_and_cleared() {
    let mut pkt = build_query(1, flags::TC | RD, "example.com.", 1, 1);
    assert_eq!(check_query(&mut pkt), QueryCheck::Reject(rcode::FORMERR));
    assert_eq!(
        u16::from_be_bytes([pkt[2], pkt[3]]) & flags::TC,
        0,
        "TC must be cleared in place"
    );
}

#[test]
fn test_missing_rd_is_refused() {
    let mut pkt = build_query(1, 0, "example.com.", 1, 1);
    assert_eq!(check_query(&mut pkt), QueryCheck::Reject(rcode::REFUSED));
}

#[test]
fn test_unknown_opcode_is_notimpl() {
    // Opcode 5 (UPDATE).
    let mut pkt = build_query(1, 0x2800 | RD, "example.com.", 1, 1);
    assert_eq!(check_query(&mut pkt), QueryCheck::Reject(rcode::NOTIMPL));
}

#[test]
fn test_bad_counts_need_every_condition() {
    // All four conditions hold: qdcount != 1, ancount != 0, nscount != 0,
    // arcount > 1.
    let mut pkt = build_query(1, RD, "example.com.", 1, 1);
    pkt[5] = 2; // qdcount
    pkt[7] = 1; // ancount
    pkt[9] = 1; // nscount
    pkt[11] = 2; // arcount
    assert_eq!(check_query(&mut pkt), QueryCheck::Reject(rcode::FORMERR));

    // One condition broken (ancount == 0): the conjunction fails and the
    // guard accepts.
    let mut pkt = build_query(1, RD, "example.com.", 1, 1);
    pkt[5] = 2;
    pkt[9] = 1;
    pkt[11] = 2;
    assert_eq!(check_query(&mut pkt), QueryCheck::Accept);
}

#[test]
fn test_well_formed_query_accepted_and_parsed() {
    let mut pkt = build_query(0x1234, RD, "Example.COM.", 1, 1);
    assert_eq!(check_query(&mut pkt), QueryCheck::Accept);

    let parsed = parse_question(&pkt).unwrap();
    assert_eq!(parsed.info.qname, "example.com.");
    assert_eq!(parsed.info.qtype, 1);
    assert_eq!(parsed.info.qclass, 1);
    assert_eq!(parsed.question_end, pkt.len());
}

#[test]
fn test_root_question_parses() {
    let pkt = build_query(1, RD, ".", 2, 1);
    let parsed = parse_question(&pkt).unwrap();
    assert_eq!(parsed.info.qname, ".");
    assert_eq!(parsed.info.qname_wire, vec![0]);
}

#[test]
fn test_garbage_body_fails_parse() {
    // A length prefix promising five bytes of garbage: the header guards
    // already drop it, and the parser cannot make a question of it
    // either.
    let mut pkt = b"hello".to_vec();
    assert_eq!(check_query(&mut pkt), QueryCheck::Drop);
    assert!(parse_question(&pkt).is_err());
}

#[test]
fn test_truncated_question_fails_parse() {
    let pkt = build_query(1, RD, "example.com.", 1, 1);
    assert!(parse_question(&pkt[..pkt.len() - 3]).is_err());
}

#[test]
fn test_edns_absent() {
    let pkt = build_query(1, RD, "example.com.", 1, 1);
    let parsed = parse_question(&pkt).unwrap();
    let edns = parse_edns(&pkt, parsed.question_end).unwrap();
    assert!(!edns.present);
    assert_eq!(edns.max_udp_payload(), 512);
}

#[test]
fn test_edns_parsed() {
    let pkt = build_query_with_edns(1, RD, "example.com.", 1, 1, 4096, true);
    let parsed = parse_question(&pkt).unwrap();
    let edns = parse_edns(&pkt, parsed.question_end).unwrap();
    assert!(edns.present);
    assert_eq!(edns.udp_size, 4096);
    assert!(edns.dnssec_ok);
    assert_eq!(edns.version, 0);
    assert_eq!(edns.max_udp_payload(), 4096);
}

#[test]
fn test_edns_small_size_clamped() {
    let pkt = build_query_with_edns(1, RD, "example.com.", 1, 1, 100, false);
    let parsed = parse_question(&pkt).unwrap();
    let edns = parse_edns(&pkt, parsed.question_end).unwrap();
    assert_eq!(edns.udp_size, 100);
    assert_eq!(edns.max_udp_payload(), 512);
}

#[test]
fn test_edns_bad_version_rejected() {
    let mut pkt = build_query_with_edns(1, RD, "example.com.", 1, 1, 4096, false);
    // The version byte sits five bytes from the end of the OPT record.
    let opt_version = pkt.len() - 5;
    pkt[opt_version] = 1;
    let parsed = parse_question(&pkt).unwrap();
    assert!(parse_edns(&pkt, parsed.question_end).is_err());
}

#[test]
fn test_edns_nonroot_owner_rejected() {
    let mut pkt = build_query(1, RD, "example.com.", 1, 1);
    pkt[11] = 1; // arcount
    let question_end = pkt.len();
    // OPT with a one-label owner name.
    pkt.push(1);
    pkt.push(b'x');
    pkt.push(0);
    pkt.extend_from_slice(&41u16.to_be_bytes());
    pkt.extend_from_slice(&4096u16.to_be_bytes());
    pkt.extend_from_slice(&[0, 0, 0, 0]);
    pkt.extend_from_slice(&0u16.to_be_bytes());
    assert!(parse_edns(&pkt, question_end).is_err());
}

#[test]
fn test_duplicate_opt_rejected() {
    let mut pkt = build_query_with_edns(1, RD, "example.com.", 1, 1, 4096, false);
    pkt[11] = 2; // arcount
    let opt: Vec<u8> = {
        let mut o = vec![0u8];
        o.extend_from_slice(&41u16.to_be_bytes());
        o.extend_from_slice(&4096u16.to_be_bytes());
        o.extend_from_slice(&[0, 0, 0, 0]);
        o.extend_from_slice(&0u16.to_be_bytes());
        o
    };
    pkt.extend_from_slice(&opt);
    let parsed = parse_question(&pkt).unwrap();
    assert!(parse_edns(&pkt, parsed.question_end).is_err());
}
