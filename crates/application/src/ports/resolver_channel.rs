use unwind_dns_domain::{DnsProposal, FrontendError};

/// A recursion request handed to the resolver process, correlated back to
/// the client by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub id: u64,
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// Outbound surface of the resolver channel.
///
/// Sends are buffered composes; the event loop drains the channel when
/// the peer is writable, so none of these calls block.
pub trait ResolverPort {
    fn forward_query(&mut self, query: &QueryRequest) -> Result<(), FrontendError>;

    fn replace_dns(&mut self, proposal: &DnsProposal) -> Result<(), FrontendError>;

    fn network_changed(&mut self) -> Result<(), FrontendError>;

    fn new_trust_anchor(&mut self, anchor: &str) -> Result<(), FrontendError>;

    fn trust_anchors_done(&mut self) -> Result<(), FrontendError>;
}
