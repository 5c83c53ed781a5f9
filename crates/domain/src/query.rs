//! Parsed views of a client DNS query: header, question and EDNS state.
//!
//! Only the pieces the frontend screens on are modeled here. Full-message
//! parsing of resolver replies is the wire library's job.

/// Header flag bits, second 16-bit word of the DNS header.
pub mod flags {
    pub const QR: u16 = 0x8000;
    pub const OPCODE_MASK: u16 = 0x7800;
    pub const AA: u16 = 0x0400;
    pub const TC: u16 = 0x0200;
    pub const RD: u16 = 0x0100;
    pub const RA: u16 = 0x0080;
    pub const AD: u16 = 0x0020;
    pub const CD: u16 = 0x0010;
    pub const RCODE_MASK: u16 = 0x000f;

    pub const OPCODE_QUERY: u16 = 0;

    pub fn opcode(flags: u16) -> u16 {
        (flags & OPCODE_MASK) >> 11
    }
}

/// Response codes the frontend emits itself.
pub mod rcode {
    pub const NOERROR: u8 = 0;
    pub const FORMERR: u8 = 1;
    pub const SERVFAIL: u8 = 2;
    pub const NXDOMAIN: u8 = 3;
    pub const NOTIMPL: u8 = 4;
    pub const REFUSED: u8 = 5;
}

/// RR type codes the screening rules reference.
pub mod rr_type {
    pub const A: u16 = 1;
    pub const TXT: u16 = 16;
    pub const OPT: u16 = 41;
    pub const TKEY: u16 = 249;
    pub const TSIG: u16 = 250;
    pub const IXFR: u16 = 251;
    pub const AXFR: u16 = 252;
    pub const MAILB: u16 = 253;
    pub const MAILA: u16 = 254;

    /// Unassigned / reserved meta range refused outright.
    pub const META_RANGE: std::ops::RangeInclusive<u16> = 128..=248;
}

/// RR class codes.
pub mod rr_class {
    pub const IN: u16 = 1;
    pub const CH: u16 = 3;
}

/// Longest presentation-form domain name the resolver channel accepts.
pub const MAX_QNAME_LEN: usize = 255;

/// The id and flags word of the client's query header, kept so the answer
/// can be re-stamped with the client's own id and echo its RD/CD bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryHeader {
    pub id: u16,
    pub flags: u16,
}

impl QueryHeader {
    pub fn recursion_desired(&self) -> bool {
        self.flags & flags::RD != 0
    }

    pub fn checking_disabled(&self) -> bool {
        self.flags & flags::CD != 0
    }
}

/// The question section of a client query.
///
/// `qname_wire` is the uncompressed wire encoding of the name;
/// `qname` is the rendered FQDN (lowercased, trailing dot) used for
/// blocklist lookups, CHAOS-class matching and the resolver channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionInfo {
    pub qname_wire: Vec<u8>,
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// EDNS state extracted from the query's OPT record, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdnsInfo {
    pub present: bool,
    pub udp_size: u16,
    pub dnssec_ok: bool,
    pub version: u8,
    pub ext_rcode: u8,
}

impl EdnsInfo {
    /// Answer budget for a UDP client. RFC 6891 forbids advertising less
    /// than 512, and absent EDNS the classic 512-byte limit applies.
    pub fn max_udp_payload(&self) -> usize {
        if self.present {
            self.udp_size.max(512) as usize
        } else {
            512
        }
    }
}
