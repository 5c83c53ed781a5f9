//! Blocklist file parsing. The file arrives as an already-open fd from
//! the parent; the set it produces replaces the live blocklist wholesale.

use std::fs::File;
use std::io::{BufRead, BufReader};

use tracing::warn;
use unwind_dns_domain::Blocklist;

pub fn parse_blocklist(file: File) -> Blocklist {
    let mut blocklist = Blocklist::new();
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "cannot read block list");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if !blocklist.insert(&line) {
            warn!(domain = %line, "duplicate blocked domain");
        }
    }

    blocklist
}
