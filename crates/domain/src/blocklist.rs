use std::collections::BTreeMap;

/// Set of domains answered with REFUSED without consulting the resolver.
///
/// Keys compare case-insensitively and are stored in FQDN form (trailing
/// dot). The set is replaced wholesale on reload; lookups run against the
/// rendered qname of every incoming query.
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    domains: BTreeMap<String, ()>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes to FQDN form: trailing newline stripped, a trailing dot
    /// appended when missing, lowercased for comparison.
    fn normalize(domain: &str) -> String {
        let trimmed = domain.trim_end_matches(['\n', '\r']);
        let mut key = trimmed.to_ascii_lowercase();
        if !key.ends_with('.') {
            key.push('.');
        }
        key
    }

    /// Inserts a domain. Returns false when the entry already existed, so
    /// callers can log the duplicate.
    pub fn insert(&mut self, domain: &str) -> bool {
        let key = Self::normalize(domain);
        if key == "." {
            return false;
        }
        self.domains.insert(key, ()).is_none()
    }

    /// Membership test against an already-rendered FQDN.
    pub fn contains(&self, fqdn: &str) -> bool {
        self.domains.contains_key(&fqdn.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn clear(&mut self) {
        self.domains.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }
}
