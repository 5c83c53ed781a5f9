//! Typed message registry and payload codecs for both process channels.
//!
//! Every message is a 12-byte little-endian header (type, payload length,
//! sender pid) followed by the payload, with at most one file descriptor
//! attached as ancillary data. Payload layouts are fixed-offset
//! little-endian; strings ride as raw UTF-8 tails.

use std::os::fd::OwnedFd;

use unwind_dns_application::QueryRequest;
use unwind_dns_domain::{DnsProposal, FrontendConfig, FrontendError, ProposalFamily, MAX_QNAME_LEN};

pub const IMSG_HEADER_SIZE: usize = 12;

/// Upper bound on a single payload; answer chunks and config blobs are
/// all far below this.
pub const MAX_IMSG_PAYLOAD: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    // Parent -> frontend: one-time fd and config delivery.
    SocketIpcResolver = 1,
    Udp4Sock = 2,
    Udp6Sock = 3,
    Tcp4Sock = 4,
    Tcp6Sock = 5,
    RouteSock = 6,
    ControlFd = 7,
    TaFd = 8,
    BlFd = 9,
    ReconfConf = 10,
    ReconfBlocklistFile = 11,
    ReconfEnd = 12,
    Startup = 13,
    // Frontend -> parent.
    StartupDone = 14,
    // Frontend <-> resolver.
    Query = 20,
    Answer = 21,
    NewTa = 22,
    NewTasDone = 23,
    NewTasAbort = 24,
    ReplaceDns = 25,
    NetworkChanged = 26,
    // Resolver -> frontend, relayed to control clients.
    CtlResolverInfo = 40,
    CtlAutoconfResolverInfo = 41,
    CtlMemInfo = 42,
    CtlEnd = 43,
}

impl MsgType {
    pub fn from_u32(v: u32) -> Option<MsgType> {
        use MsgType::*;
        Some(match v {
            1 => SocketIpcResolver,
            2 => Udp4Sock,
            3 => Udp6Sock,
            4 => Tcp4Sock,
            5 => Tcp6Sock,
            6 => RouteSock,
            7 => ControlFd,
            8 => TaFd,
            9 => BlFd,
            10 => ReconfConf,
            11 => ReconfBlocklistFile,
            12 => ReconfEnd,
            13 => Startup,
            14 => StartupDone,
            20 => Query,
            21 => Answer,
            22 => NewTa,
            23 => NewTasDone,
            24 => NewTasAbort,
            25 => ReplaceDns,
            26 => NetworkChanged,
            40 => CtlResolverInfo,
            41 => CtlAutoconfResolverInfo,
            42 => CtlMemInfo,
            43 => CtlEnd,
            _ => return None,
        })
    }

    /// Message kinds that deliver a descriptor. The channel pairs a
    /// received fd with the next message of one of these kinds.
    pub fn carries_fd(&self) -> bool {
        matches!(
            self,
            MsgType::SocketIpcResolver
                | MsgType::Udp4Sock
                | MsgType::Udp6Sock
                | MsgType::Tcp4Sock
                | MsgType::Tcp6Sock
                | MsgType::RouteSock
                | MsgType::ControlFd
                | MsgType::TaFd
                | MsgType::BlFd
        )
    }

    pub fn is_control_relay(v: u32) -> bool {
        matches!(
            MsgType::from_u32(v),
            Some(
                MsgType::CtlResolverInfo
                    | MsgType::CtlAutoconfResolverInfo
                    | MsgType::CtlMemInfo
                    | MsgType::CtlEnd
            )
        )
    }
}

/// One received message. `kind` stays raw so unknown types can be logged
/// and skipped instead of tearing the channel down.
#[derive(Debug)]
pub struct Imsg {
    pub kind: u32,
    pub pid: u32,
    pub payload: Vec<u8>,
    pub fd: Option<OwnedFd>,
}

impl Imsg {
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u32(self.kind)
    }

    /// Takes the attached fd, failing the way a missing descriptor from
    /// the parent must: as a protocol violation.
    pub fn require_fd(&mut self, what: &str) -> Result<OwnedFd, FrontendError> {
        self.fd
            .take()
            .ok_or_else(|| FrontendError::Protocol(format!("expected {} fd, got none", what)))
    }
}

/// Fixed header of an `ANSWER` message; chunk bytes follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerHeader {
    pub id: u64,
    pub answer_len: u32,
    pub bogus: bool,
    pub srvfail: bool,
}

impl AnswerHeader {
    pub const SIZE: usize = 14;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.id.to_le_bytes());
        out[8..12].copy_from_slice(&self.answer_len.to_le_bytes());
        out[12] = self.bogus as u8;
        out[13] = self.srvfail as u8;
        out
    }

    pub fn decode(payload: &[u8]) -> Result<(AnswerHeader, &[u8]), FrontendError> {
        if payload.len() < Self::SIZE {
            return Err(FrontendError::Protocol(format!(
                "ANSWER wrong length: {}",
                payload.len()
            )));
        }
        let hdr = AnswerHeader {
            id: u64::from_le_bytes(payload[0..8].try_into().unwrap()),
            answer_len: u32::from_le_bytes(payload[8..12].try_into().unwrap()),
            bogus: payload[12] != 0,
            srvfail: payload[13] != 0,
        };
        Ok((hdr, &payload[Self::SIZE..]))
    }
}

pub fn encode_query(query: &QueryRequest) -> Result<Vec<u8>, FrontendError> {
    if query.qname.len() > MAX_QNAME_LEN {
        return Err(FrontendError::QnameTooLong(query.qname.len()));
    }
    let mut out = Vec::with_capacity(12 + query.qname.len());
    out.extend_from_slice(&query.id.to_le_bytes());
    out.extend_from_slice(&query.qtype.to_le_bytes());
    out.extend_from_slice(&query.qclass.to_le_bytes());
    out.extend_from_slice(query.qname.as_bytes());
    Ok(out)
}

pub fn decode_query(payload: &[u8]) -> Result<QueryRequest, FrontendError> {
    if payload.len() < 12 {
        return Err(FrontendError::Protocol("QUERY too short".into()));
    }
    let qname = std::str::from_utf8(&payload[12..])
        .map_err(|_| FrontendError::Protocol("QUERY qname not UTF-8".into()))?;
    if qname.len() > MAX_QNAME_LEN {
        return Err(FrontendError::QnameTooLong(qname.len()));
    }
    Ok(QueryRequest {
        id: u64::from_le_bytes(payload[0..8].try_into().unwrap()),
        qtype: u16::from_le_bytes(payload[8..10].try_into().unwrap()),
        qclass: u16::from_le_bytes(payload[10..12].try_into().unwrap()),
        qname: qname.to_string(),
    })
}

pub fn encode_proposal(proposal: &DnsProposal) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + proposal.addresses.len());
    out.extend_from_slice(&proposal.if_index.to_le_bytes());
    out.push(proposal.source);
    out.push(match proposal.family {
        ProposalFamily::V4 => 4,
        ProposalFamily::V6 => 6,
    });
    out.extend_from_slice(&proposal.addresses);
    out
}

pub fn decode_proposal(payload: &[u8]) -> Result<DnsProposal, FrontendError> {
    if payload.len() < 6 {
        return Err(FrontendError::Protocol("REPLACE_DNS too short".into()));
    }
    let family = match payload[5] {
        4 => ProposalFamily::V4,
        6 => ProposalFamily::V6,
        other => {
            return Err(FrontendError::Protocol(format!(
                "REPLACE_DNS bad family {}",
                other
            )))
        }
    };
    let proposal = DnsProposal {
        if_index: u32::from_le_bytes(payload[0..4].try_into().unwrap()),
        source: payload[4],
        family,
        addresses: payload[6..].to_vec(),
    };
    if !proposal.is_aligned() {
        return Err(FrontendError::Protocol("REPLACE_DNS misaligned".into()));
    }
    Ok(proposal)
}

pub fn encode_config(config: &FrontendConfig) -> Vec<u8> {
    let mut out = vec![config.blocklist_log as u8, config.blocklist_file.is_some() as u8];
    if let Some(path) = &config.blocklist_file {
        out.extend_from_slice(path.as_bytes());
    }
    out
}

pub fn decode_config(payload: &[u8]) -> Result<FrontendConfig, FrontendError> {
    if payload.len() < 2 {
        return Err(FrontendError::Protocol("RECONF_CONF too short".into()));
    }
    let blocklist_file = if payload[1] != 0 {
        let path = std::str::from_utf8(&payload[2..])
            .map_err(|_| FrontendError::Protocol("RECONF_CONF path not UTF-8".into()))?;
        Some(path.to_string())
    } else {
        None
    };
    Ok(FrontendConfig {
        blocklist_file,
        blocklist_log: payload[0] != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_header_roundtrip() {
        let hdr = AnswerHeader {
            id: 0xdead_beef_0102_0304,
            answer_len: 96,
            bogus: false,
            srvfail: true,
        };
        let mut bytes = hdr.encode().to_vec();
        bytes.extend_from_slice(b"chunk");
        let (decoded, rest) = AnswerHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, hdr);
        assert_eq!(rest, b"chunk");
    }

    #[test]
    fn query_roundtrip() {
        let q = QueryRequest {
            id: 7,
            qname: "example.com.".into(),
            qtype: 1,
            qclass: 1,
        };
        let decoded = decode_query(&encode_query(&q).unwrap()).unwrap();
        assert_eq!(decoded, q);
    }

    #[test]
    fn query_rejects_long_qname() {
        let q = QueryRequest {
            id: 7,
            qname: "a".repeat(300),
            qtype: 1,
            qclass: 1,
        };
        assert!(encode_query(&q).is_err());
    }

    #[test]
    fn proposal_roundtrip() {
        let p = DnsProposal {
            if_index: 3,
            source: 8,
            family: ProposalFamily::V4,
            addresses: vec![192, 0, 2, 1, 192, 0, 2, 2],
        };
        assert_eq!(decode_proposal(&encode_proposal(&p)).unwrap(), p);
    }

    #[test]
    fn proposal_rejects_misaligned() {
        let p = DnsProposal {
            if_index: 3,
            source: 8,
            family: ProposalFamily::V6,
            addresses: vec![0; 17],
        };
        assert!(decode_proposal(&encode_proposal(&p)).is_err());
    }

    #[test]
    fn config_roundtrip() {
        let conf = FrontendConfig {
            blocklist_file: Some("/etc/blocklist".into()),
            blocklist_log: true,
        };
        assert_eq!(decode_config(&encode_config(&conf)).unwrap(), conf);

        let empty = FrontendConfig::default();
        assert_eq!(decode_config(&encode_config(&empty)).unwrap(), empty);
    }
}
