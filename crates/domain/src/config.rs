use serde::{Deserialize, Serialize};

use crate::errors::FrontendError;

/// Frontend view of the daemon configuration.
///
/// The authoritative copy lives with the supervisor, which streams it to
/// this process over the main channel (`RECONF_*`); the TOML loader
/// exists for standalone debug runs against the same file format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Path of the blocklist file the supervisor opens on our behalf.
    #[serde(default)]
    pub blocklist_file: Option<String>,

    /// Log blocked queries at info level.
    #[serde(default)]
    pub blocklist_log: bool,
}

impl FrontendConfig {
    pub fn from_file(path: &str) -> Result<Self, FrontendError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FrontendError::Config(format!("cannot read {}: {}", path, e)))?;
        toml::from_str(&contents).map_err(|e| FrontendError::Config(e.to_string()))
    }

    /// Commits a staged reload, replacing this configuration wholesale.
    pub fn merge(&mut self, new: FrontendConfig) {
        *self = new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_replaces_wholesale() {
        let mut conf = FrontendConfig {
            blocklist_file: Some("/etc/blocklist".into()),
            blocklist_log: true,
        };
        conf.merge(FrontendConfig::default());
        assert_eq!(conf, FrontendConfig::default());
    }

    #[test]
    fn parses_toml() {
        let conf: FrontendConfig =
            toml::from_str("blocklist_file = \"/etc/blocklist\"\nblocklist_log = true\n").unwrap();
        assert_eq!(conf.blocklist_file.as_deref(), Some("/etc/blocklist"));
        assert!(conf.blocklist_log);
    }

    #[test]
    fn defaults_are_empty() {
        let conf: FrontendConfig = toml::from_str("").unwrap();
        assert!(conf.blocklist_file.is_none());
        assert!(!conf.blocklist_log);
    }
}
