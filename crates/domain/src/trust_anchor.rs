/// Root key-signing key (KSK-2017, key tag 20326) compiled in so DNSSEC
/// validation can bootstrap before the persisted anchor file is read.
pub const ROOT_KSK_2017: &str = concat!(
    ". 172800 IN DNSKEY 257 3 8 ",
    "AwEAAaz/tAm8yTn4Mfeh5eyI96WSVexTBAvkMgJzkKTOiW1vkIbzxeF3",
    "+/4RgWOq7HrxRixHlFlExOLAJr5emLvN7SWXgnLh4+B5xQlNVz8Og8kv",
    "ArMtNROxVQuCaSnIDdD5LKyWbRd2n9WGe2R8PzgCmr3EgVLrjyBxWezF",
    "0jLHwVN8efS3rCj/EWgvIWgb9tarpVUDK/b58Da+sqqls3eNbuv7pr+e",
    "oZG+SrDK6nWeL3c6H5Apxz7LjVc1uTIdsIXxuOLYA4/ilBmSVIzuDWfd",
    "RUfhHdY6+cn8HFRm+2hM8AnXGXws9555KrUB5qihylGa8subX2Nn6UwN",
    "R1AkUTV74bU="
);

/// Ordered set of DNSKEY RR text lines trusted as DNSSEC roots.
///
/// The sequence stays lexicographically sorted so that a reordering of
/// anchors in DNS does not read as a change. Two sets exist during an
/// update: the live one and a staging one filled from `NEW_TA` messages;
/// `merge_from` commits the staging set only when it actually differs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustAnchorSet {
    anchors: Vec<String>,
}

impl TrustAnchorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set seeded with the compiled-in root KSK.
    pub fn with_root_ksk() -> Self {
        let mut set = Self::new();
        set.insert(ROOT_KSK_2017);
        set
    }

    /// Sorted insert. Duplicates are dropped; returns whether the anchor
    /// was new.
    pub fn insert(&mut self, anchor: &str) -> bool {
        match self.anchors.binary_search_by(|a| a.as_str().cmp(anchor)) {
            Ok(_) => false,
            Err(pos) => {
                self.anchors.insert(pos, anchor.to_string());
                true
            }
        }
    }

    /// Replaces `self` with `staging` when the two ordered sequences
    /// differ element-wise; otherwise discards the staging set. Returns
    /// whether the live set changed. The staging set is emptied either
    /// way.
    pub fn merge_from(&mut self, staging: &mut TrustAnchorSet) -> bool {
        let changed = self.anchors != staging.anchors;
        if changed {
            self.anchors = std::mem::take(&mut staging.anchors);
        } else {
            staging.clear();
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.anchors.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn clear(&mut self) {
        self.anchors.clear();
    }
}
