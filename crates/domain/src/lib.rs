pub mod blocklist;
pub mod config;
pub mod errors;
pub mod proposal;
pub mod query;
pub mod transport;
pub mod trust_anchor;

pub use blocklist::Blocklist;
pub use config::FrontendConfig;
pub use errors::FrontendError;
pub use proposal::{DnsProposal, ProposalFamily};
pub use query::{EdnsInfo, QueryHeader, QuestionInfo, MAX_QNAME_LEN};
pub use transport::Transport;
pub use trust_anchor::{TrustAnchorSet, ROOT_KSK_2017};
