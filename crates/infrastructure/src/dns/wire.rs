//! Byte-level guards and parsers for inbound client queries.
//!
//! Everything here works on the raw packet; full-message decoding of
//! resolver replies goes through hickory instead. The rules implement a
//! conservative recursive-server surface: anything that is not a plain
//! recursive question is rejected before it can reach the resolver.

use tracing::warn;
use unwind_dns_domain::query::{flags, rcode, rr_type};
use unwind_dns_domain::{EdnsInfo, FrontendError, QueryHeader, QuestionInfo};

pub const DNS_HEADER_SIZE: usize = 12;

/// Outcome of the pre-parse header guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCheck {
    Accept,
    Reject(u8),
    Drop,
}

pub fn header(pkt: &[u8]) -> QueryHeader {
    QueryHeader {
        id: u16::from_be_bytes([pkt[0], pkt[1]]),
        flags: u16::from_be_bytes([pkt[2], pkt[3]]),
    }
}

fn count(pkt: &[u8], index: usize) -> u16 {
    let off = 4 + index * 2;
    u16::from_be_bytes([pkt[off], pkt[off + 1]])
}

pub fn qdcount(pkt: &[u8]) -> u16 {
    count(pkt, 0)
}

pub fn ancount(pkt: &[u8]) -> u16 {
    count(pkt, 1)
}

pub fn nscount(pkt: &[u8]) -> u16 {
    count(pkt, 2)
}

pub fn arcount(pkt: &[u8]) -> u16 {
    count(pkt, 3)
}

/// Header guards, applied in order before the question is parsed. A set
/// TC bit is cleared in place so the FORMERR answer does not echo it.
pub fn check_query(pkt: &mut [u8]) -> QueryCheck {
    if pkt.len() < DNS_HEADER_SIZE {
        warn!("bad query: too short, dropped");
        return QueryCheck::Drop;
    }

    let hdr = header(pkt);

    if hdr.flags & flags::QR != 0 {
        warn!("bad query: QR set, dropped");
        return QueryCheck::Drop;
    }
    if hdr.flags & flags::TC != 0 {
        let cleared = hdr.flags & !flags::TC;
        pkt[2..4].copy_from_slice(&cleared.to_be_bytes());
        warn!("bad query: TC set");
        return QueryCheck::Reject(rcode::FORMERR);
    }
    if hdr.flags & flags::RD == 0 {
        warn!("bad query: RD not set");
        return QueryCheck::Reject(rcode::REFUSED);
    }
    if flags::opcode(hdr.flags) != flags::OPCODE_QUERY {
        warn!(opcode = flags::opcode(hdr.flags), "bad query: unknown opcode");
        return QueryCheck::Reject(rcode::NOTIMPL);
    }

    if qdcount(pkt) != 1 && ancount(pkt) != 0 && nscount(pkt) != 0 && arcount(pkt) > 1 {
        warn!(
            qdcount = qdcount(pkt),
            ancount = ancount(pkt),
            nscount = nscount(pkt),
            arcount = arcount(pkt),
            "bad query: section counts"
        );
        return QueryCheck::Reject(rcode::FORMERR);
    }

    QueryCheck::Accept
}

/// Successfully parsed question section plus the offset where it ends,
/// needed to echo the question verbatim and to find the OPT record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuestion {
    pub info: QuestionInfo,
    pub question_end: usize,
}

/// Walks the question name and renders it in FQDN presentation form.
///
/// Compression pointers and extended label types are not valid in a
/// question name and fail the parse; labels are lowercased and
/// non-printable bytes rendered as `?`.
pub fn parse_question(pkt: &[u8]) -> Result<ParsedQuestion, FrontendError> {
    let mut pos = DNS_HEADER_SIZE;
    let mut qname = String::new();

    loop {
        let label_len = *pkt
            .get(pos)
            .ok_or_else(|| FrontendError::MalformedQuery("truncated qname".into()))?
            as usize;
        if label_len == 0 {
            pos += 1;
            break;
        }
        if label_len & 0xc0 != 0 {
            // Compression pointers and extended label types have no
            // business in a question name.
            return Err(FrontendError::MalformedQuery(
                "compression pointer in qname".into(),
            ));
        }
        pos += 1;
        let label = pkt
            .get(pos..pos + label_len)
            .ok_or_else(|| FrontendError::MalformedQuery("truncated label".into()))?;
        for &b in label {
            if b.is_ascii_graphic() {
                qname.push(b.to_ascii_lowercase() as char);
            } else {
                qname.push('?');
            }
        }
        qname.push('.');
        pos += label_len;
    }

    if qname.is_empty() {
        qname.push('.');
    }

    // Over-long names parse; the screening rules answer them with
    // FORMERR instead of dropping silently.
    let qname_wire = pkt[DNS_HEADER_SIZE..pos].to_vec();

    let fixed = pkt
        .get(pos..pos + 4)
        .ok_or_else(|| FrontendError::MalformedQuery("truncated question".into()))?;
    let qtype = u16::from_be_bytes([fixed[0], fixed[1]]);
    let qclass = u16::from_be_bytes([fixed[2], fixed[3]]);
    pos += 4;

    Ok(ParsedQuestion {
        info: QuestionInfo {
            qname_wire,
            qname,
            qtype,
            qclass,
        },
        question_end: pos,
    })
}

/// Skips one (possibly compressed) name starting at `pos`, returning the
/// offset just past it.
fn skip_name(pkt: &[u8], mut pos: usize) -> Result<usize, FrontendError> {
    loop {
        let len = *pkt
            .get(pos)
            .ok_or_else(|| FrontendError::MalformedQuery("truncated name".into()))?
            as usize;
        if len == 0 {
            return Ok(pos + 1);
        }
        if len & 0xc0 == 0xc0 {
            // Pointer terminates the name.
            if pkt.get(pos + 1).is_none() {
                return Err(FrontendError::MalformedQuery("truncated pointer".into()));
            }
            return Ok(pos + 2);
        }
        if len & 0xc0 != 0 {
            return Err(FrontendError::MalformedQuery("bad label type".into()));
        }
        pos += 1 + len;
    }
}

/// Skips one resource record, rejecting OPT outside the additional
/// section when `allow_opt` is false.
fn skip_rr(pkt: &[u8], pos: usize, allow_opt: bool) -> Result<usize, FrontendError> {
    let mut pos = skip_name(pkt, pos)?;
    let fixed = pkt
        .get(pos..pos + 10)
        .ok_or_else(|| FrontendError::MalformedQuery("truncated rr".into()))?;
    let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
    if rtype == rr_type::OPT && !allow_opt {
        return Err(FrontendError::MalformedQuery(
            "OPT outside additional section".into(),
        ));
    }
    let rdlen = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
    pos += 10 + rdlen;
    if pos > pkt.len() {
        return Err(FrontendError::MalformedQuery("truncated rdata".into()));
    }
    Ok(pos)
}

/// Extracts EDNS state from the additional section.
///
/// The OPT owner name must be root, only one OPT record may appear, and
/// only version 0 is supported; violations fail the parse and the caller
/// answers FORMERR.
pub fn parse_edns(pkt: &[u8], question_end: usize) -> Result<EdnsInfo, FrontendError> {
    let mut edns = EdnsInfo::default();
    let mut pos = question_end;

    let skip = ancount(pkt) as usize + nscount(pkt) as usize;
    for _ in 0..skip {
        pos = skip_rr(pkt, pos, false)?;
    }

    for _ in 0..arcount(pkt) as usize {
        let name_byte = *pkt
            .get(pos)
            .ok_or_else(|| FrontendError::MalformedQuery("truncated additional".into()))?;
        let name_end = skip_name(pkt, pos)?;
        let fixed = pkt
            .get(name_end..name_end + 10)
            .ok_or_else(|| FrontendError::MalformedQuery("truncated additional".into()))?;
        let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);

        if rtype == rr_type::OPT {
            if edns.present {
                return Err(FrontendError::MalformedQuery("duplicate OPT record".into()));
            }
            if name_byte != 0 {
                return Err(FrontendError::MalformedQuery(
                    "OPT owner name not root".into(),
                ));
            }
            edns.present = true;
            edns.udp_size = u16::from_be_bytes([fixed[2], fixed[3]]);
            edns.ext_rcode = fixed[4];
            edns.version = fixed[5];
            edns.dnssec_ok = fixed[6] & 0x80 != 0;
            if edns.version != 0 {
                return Err(FrontendError::MalformedQuery("unsupported EDNS version".into()));
            }
        }

        let rdlen = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
        pos = name_end + 10 + rdlen;
        if pos > pkt.len() {
            return Err(FrontendError::MalformedQuery("truncated rdata".into()));
        }
    }

    Ok(edns)
}
