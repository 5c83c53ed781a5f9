/// Address family of a DNS-server proposal learned from the routing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalFamily {
    V4,
    V6,
}

impl ProposalFamily {
    /// Wire size of one address of this family.
    pub fn addr_len(&self) -> usize {
        match self {
            ProposalFamily::V4 => 4,
            ProposalFamily::V6 => 16,
        }
    }
}

/// DNS-server addresses proposed for an interface, forwarded to the
/// resolver as `REPLACE_DNS`. An empty address list withdraws whatever
/// the resolver learned for that interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsProposal {
    pub if_index: u32,
    pub source: u8,
    pub family: ProposalFamily,
    pub addresses: Vec<u8>,
}

impl DnsProposal {
    /// Withdrawal proposal for a departed interface.
    pub fn withdraw(if_index: u32) -> Self {
        Self {
            if_index,
            source: 0,
            family: ProposalFamily::V4,
            addresses: Vec::new(),
        }
    }

    /// The address payload must be a whole number of addresses.
    pub fn is_aligned(&self) -> bool {
        self.addresses.len() % self.family.addr_len() == 0
    }

    pub fn addr_count(&self) -> usize {
        self.addresses.len() / self.family.addr_len()
    }
}
