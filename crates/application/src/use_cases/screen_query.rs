use tracing::{info, warn};
use unwind_dns_domain::query::{rr_class, rr_type};
use unwind_dns_domain::{Blocklist, FrontendConfig, QuestionInfo, MAX_QNAME_LEN};

/// Verdict of the post-parse screening rules for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screening {
    /// Hand the question to the resolver process.
    Forward,
    /// Policy refusal: zone transfers, CHAOS class, blocklisted names.
    Refuse,
    /// Meta query types and over-long names a client should never send.
    FormErr,
    /// CHAOS-class version query answered locally.
    Chaos,
}

/// Screens parsed questions against local policy before any resolver
/// traffic happens. Owns the blocklist and the pieces of configuration
/// the rules depend on; both are replaced at runtime via the mutators.
#[derive(Debug, Default)]
pub struct ScreenQueryUseCase {
    config: FrontendConfig,
    blocklist: Blocklist,
}

impl ScreenQueryUseCase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screen(&self, question: &QuestionInfo) -> Screening {
        if question.qname.len() > MAX_QNAME_LEN {
            warn!(qname_len = question.qname.len(), "qname too long");
            return Screening::FormErr;
        }

        if self.blocklist.contains(&question.qname) {
            if self.config.blocklist_log {
                info!(domain = %question.qname, "blocking");
            }
            return Screening::Refuse;
        }

        if question.qtype == rr_type::AXFR || question.qtype == rr_type::IXFR {
            return Screening::Refuse;
        }

        if question.qtype == rr_type::OPT
            || question.qtype == rr_type::TSIG
            || question.qtype == rr_type::TKEY
            || question.qtype == rr_type::MAILA
            || question.qtype == rr_type::MAILB
            || rr_type::META_RANGE.contains(&question.qtype)
        {
            return Screening::FormErr;
        }

        if question.qclass == rr_class::CH {
            if question.qname.eq_ignore_ascii_case("version.server.")
                || question.qname.eq_ignore_ascii_case("version.bind.")
            {
                return Screening::Chaos;
            }
            return Screening::Refuse;
        }

        Screening::Forward
    }

    /// Replaces the blocklist wholesale.
    pub fn replace_blocklist(&mut self, blocklist: Blocklist) {
        self.blocklist = blocklist;
    }

    /// Commits a reloaded configuration. A configuration without a
    /// blocklist file clears the blocklist.
    pub fn apply_config(&mut self, config: FrontendConfig) {
        self.config.merge(config);
        if self.config.blocklist_file.is_none() {
            self.blocklist.clear();
        }
    }

    pub fn config(&self) -> &FrontendConfig {
        &self.config
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }
}
