//! Trust-anchor file handling and resolver synchronization.
//!
//! The anchor file is a newline-delimited list of DNSKEY RR text lines.
//! It is rewritten on every completed trust-anchor update, changed or
//! not: the file's mtime doubles as a liveness indicator for the 5011
//! rollover machinery in the resolver process.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;
use unwind_dns_application::ResolverPort;
use unwind_dns_domain::{FrontendError, TrustAnchorSet};

/// DNSKEY protocol field is fixed by RFC 4034.
const DNSKEY_PROTOCOL: u8 = 3;

/// Validates one line of anchor-file text as a DNSKEY RR.
///
/// Accepted grammar: owner name, optional TTL, optional class `IN`, the
/// literal type `DNSKEY`, flags, protocol (must be 3), algorithm, and
/// base64 key material (possibly split across several tokens).
pub fn is_dnskey_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace().peekable();

    let Some(_owner) = tokens.next() else {
        return false;
    };

    if tokens.peek().is_some_and(|t| t.parse::<u32>().is_ok()) {
        tokens.next();
    }
    if tokens.peek().is_some_and(|t| t.eq_ignore_ascii_case("IN")) {
        tokens.next();
    }

    if !tokens
        .next()
        .is_some_and(|t| t.eq_ignore_ascii_case("DNSKEY"))
    {
        return false;
    }

    if !tokens.next().is_some_and(|t| t.parse::<u16>().is_ok()) {
        return false;
    }
    if !tokens
        .next()
        .is_some_and(|t| t.parse::<u8>() == Ok(DNSKEY_PROTOCOL))
    {
        return false;
    }
    if !tokens.next().is_some_and(|t| t.parse::<u8>().is_ok()) {
        return false;
    }

    let key: String = tokens.collect();
    if key.is_empty() {
        return false;
    }
    STANDARD.decode(&key).map_or(false, |k| !k.is_empty())
}

/// Reads the whole anchor file and inserts every line that validates as
/// a DNSKEY RR. Unparsable lines are skipped.
pub fn parse_trust_anchors(file: &mut File, set: &mut TrustAnchorSet) {
    let mut contents = String::new();
    if let Err(e) = file.read_to_string(&mut contents) {
        warn!(error = %e, "cannot read trust anchor file");
        return;
    }
    for line in contents.lines() {
        if is_dnskey_line(line) {
            set.insert(line);
        }
    }
}

/// Rewrites the anchor file: one `anchor\n` line per entry from offset
/// zero, truncated to the written length and fsynced. Failures are
/// logged; the in-memory set stays authoritative.
pub fn write_trust_anchors(set: &TrustAnchorSet, file: &mut File) {
    let mut len: u64 = 0;

    if let Err(e) = file.seek(SeekFrom::Start(0)) {
        warn!(error = %e, "cannot rewind trust anchor file");
    } else {
        for anchor in set.iter() {
            let line = format!("{}\n", anchor);
            if let Err(e) = file.write_all(line.as_bytes()) {
                warn!(error = %e, "cannot write trust anchor file");
                len = 0;
                break;
            }
            len += line.len() as u64;
        }
    }

    if let Err(e) = file.set_len(len) {
        warn!(error = %e, "cannot truncate trust anchor file");
    }
    if let Err(e) = file.sync_all() {
        warn!(error = %e, "cannot sync trust anchor file");
    }
}

/// Replays the full anchor set to the resolver, in sorted order,
/// terminated by the done marker.
pub fn send_trust_anchors(
    set: &TrustAnchorSet,
    resolver: &mut dyn ResolverPort,
) -> Result<(), FrontendError> {
    for anchor in set.iter() {
        resolver.new_trust_anchor(anchor)?;
    }
    resolver.trust_anchors_done()
}
