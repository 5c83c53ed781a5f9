#![allow(dead_code)]

use unwind_dns_application::{QueryRequest, ResolverPort};
use unwind_dns_domain::{DnsProposal, FrontendError};

/// Builds a DNS query packet in wire format.
pub fn build_query(id: u16, header_flags: u16, qname: &str, qtype: u16, qclass: u16) -> Vec<u8> {
    let mut pkt = Vec::new();
    pkt.extend_from_slice(&id.to_be_bytes());
    pkt.extend_from_slice(&header_flags.to_be_bytes());
    pkt.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    pkt.extend_from_slice(&0u16.to_be_bytes());
    pkt.extend_from_slice(&0u16.to_be_bytes());
    pkt.extend_from_slice(&0u16.to_be_bytes());
    push_name(&mut pkt, qname);
    pkt.extend_from_slice(&qtype.to_be_bytes());
    pkt.extend_from_slice(&qclass.to_be_bytes());
    pkt
}

/// Same, with an EDNS OPT record in the additional section.
pub fn build_query_with_edns(
    id: u16,
    header_flags: u16,
    qname: &str,
    qtype: u16,
    qclass: u16,
    udp_size: u16,
    dnssec_ok: bool,
) -> Vec<u8> {
    let mut pkt = build_query(id, header_flags, qname, qtype, qclass);
    pkt[11] = 1; // arcount
    pkt.push(0); // root owner
    pkt.extend_from_slice(&41u16.to_be_bytes());
    pkt.extend_from_slice(&udp_size.to_be_bytes());
    pkt.push(0); // extended rcode
    pkt.push(0); // version
    pkt.push(if dnssec_ok { 0x80 } else { 0 });
    pkt.push(0);
    pkt.extend_from_slice(&0u16.to_be_bytes()); // rdlen
    pkt
}

fn push_name(pkt: &mut Vec<u8>, name: &str) {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        pkt.push(label.len() as u8);
        pkt.extend_from_slice(label.as_bytes());
    }
    pkt.push(0);
}

/// Records every resolver-bound call for assertions.
#[derive(Debug, Default)]
pub struct MockResolver {
    pub queries: Vec<QueryRequest>,
    pub proposals: Vec<DnsProposal>,
    pub network_changes: usize,
    pub anchors: Vec<String>,
    pub done_markers: usize,
}

impl ResolverPort for MockResolver {
    fn forward_query(&mut self, query: &QueryRequest) -> Result<(), FrontendError> {
        self.queries.push(query.clone());
        Ok(())
    }

    fn replace_dns(&mut self, proposal: &DnsProposal) -> Result<(), FrontendError> {
        self.proposals.push(proposal.clone());
        Ok(())
    }

    fn network_changed(&mut self) -> Result<(), FrontendError> {
        self.network_changes += 1;
        Ok(())
    }

    fn new_trust_anchor(&mut self, anchor: &str) -> Result<(), FrontendError> {
        self.anchors.push(anchor.to_string());
        Ok(())
    }

    fn trust_anchors_done(&mut self) -> Result<(), FrontendError> {
        self.done_markers += 1;
        Ok(())
    }
}
