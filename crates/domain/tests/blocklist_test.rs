use unwind_dns_domain::Blocklist;

#[test]
fn test_insert_appends_trailing_dot() {
    let mut bl = Blocklist::new();
    assert!(bl.insert("ads.example"));
    assert!(bl.contains("ads.example."));
}

#[test]
fn test_insert_keeps_existing_dot() {
    let mut bl = Blocklist::new();
    assert!(bl.insert("ads.example."));
    assert_eq!(bl.len(), 1);
    assert!(bl.contains("ads.example."));
}

#[test]
fn test_insert_strips_newline() {
    let mut bl = Blocklist::new();
    assert!(bl.insert("ads.example\n"));
    assert!(bl.contains("ads.example."));
}

#[test]
fn test_insert_is_idempotent() {
    let mut bl = Blocklist::new();
    assert!(bl.insert("ads.example."));
    assert!(!bl.insert("ads.example."));
    assert!(!bl.insert("ads.example"));
    assert!(!bl.insert("ads.example\n"));
    assert_eq!(bl.len(), 1);
}

#[test]
fn test_lookup_is_case_insensitive() {
    let mut bl = Blocklist::new();
    bl.insert("Ads.Example.");
    assert!(bl.contains("ads.example."));
    assert!(bl.contains("ADS.EXAMPLE."));
    assert!(!bl.insert("aDS.eXAMPLE."));
}

#[test]
fn test_unrelated_domain_not_blocked() {
    let mut bl = Blocklist::new();
    bl.insert("ads.example.");
    assert!(!bl.contains("example.com."));
    assert!(!bl.contains("sub.ads.example."));
}

#[test]
fn test_empty_line_rejected() {
    let mut bl = Blocklist::new();
    assert!(!bl.insert(""));
    assert!(!bl.insert("\n"));
    assert!(bl.is_empty());
}

#[test]
fn test_clear_empties_set() {
    let mut bl = Blocklist::new();
    bl.insert("one.example.");
    bl.insert("two.example.");
    assert_eq!(bl.len(), 2);
    bl.clear();
    assert!(bl.is_empty());
    assert!(!bl.contains("one.example."));
}

#[test]
fn test_iteration_is_sorted() {
    let mut bl = Blocklist::new();
    bl.insert("zzz.example.");
    bl.insert("aaa.example.");
    bl.insert("mmm.example.");
    let entries: Vec<&str> = bl.iter().collect();
    assert_eq!(
        entries,
        vec!["aaa.example.", "mmm.example.", "zzz.example."]
    );
}
