//! Session configuration.
//!
//! One [`SessionConfig`] is supplied per sign-on. How it is persisted is
//! the embedding application's business; the struct serializes cleanly
//! for whatever store the caller uses.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PORT, KEEPALIVE_INTERVAL};

/// Connection and account policy for one session.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionConfig {
    /// Credential server host.
    pub host: String,
    /// Credential server port, also the default for redirect targets that
    /// omit one.
    pub port: u16,
    /// Client identification string presented at sign-on and mixed into
    /// the credential digest.
    pub client_id: String,
    /// Encoding substituted when an inbound message declares the "custom"
    /// placeholder.
    pub legacy_encoding: String,
    /// Request an encrypted transport where the server offers one.
    pub require_encryption: bool,
    /// Let other users see this account's idle time.
    pub show_idle: bool,
    /// Seconds between keepalive frames on the primary connection. Zero
    /// disables them.
    pub keepalive_secs: u64,
    /// Contacts the embedding application was showing when it last shut
    /// down. Reconciliation trims the ones the server no longer has.
    #[serde(default)]
    pub stored_contacts: Vec<StoredContact>,
}

/// One remembered contact from an earlier session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredContact {
    pub name: String,
    pub group: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "login.example.net".to_string(),
            port: DEFAULT_PORT,
            client_id: "flapjack".to_string(),
            legacy_encoding: "iso-8859-1".to_string(),
            require_encryption: false,
            show_idle: true,
            keepalive_secs: KEEPALIVE_INTERVAL.as_secs(),
            stored_contacts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_json() {
        let config = SessionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, config.port);
        assert_eq!(back.legacy_encoding, config.legacy_encoding);
        assert_eq!(back.keepalive_secs, config.keepalive_secs);
    }

    #[test]
    fn test_stored_contacts_absent_in_older_configs() {
        let json = r#"{
            "host": "h", "port": 5190, "client_id": "c",
            "legacy_encoding": "iso-8859-1", "require_encryption": false,
            "show_idle": true, "keepalive_secs": 60
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert!(config.stored_contacts.is_empty());
    }
}
