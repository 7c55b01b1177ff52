//! Relay identities and the node feed.
//!
//! The measurement core only needs a narrow view of a relay: its
//! fingerprint, a nickname for logs, an address, and a handful of role
//! flags. Anything that can produce that view implements [`NodeFeed`].

mod feed;
mod policy;

pub use feed::{FeedError, FileNodeFeed, StaticNodeFeed, DEFAULT_REFRESH_INTERVAL};
pub use policy::{ExitPolicy, PolicyParseError};

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

fn fingerprint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9A-F]{40}$").expect("static regex"))
}

/// Returns true if `fp` is 40 upper-case hex characters.
pub fn is_valid_fingerprint(fp: &str) -> bool {
    fingerprint_pattern().is_match(fp)
}

/// Role flags published for a relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayFlags {
    pub authority: bool,
    pub exit: bool,
    pub guard: bool,
    pub fast: bool,
    pub running: bool,
}

/// A relay as seen by the measurement core.
///
/// Immutable for the duration of a scheduling cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub fingerprint: String,
    pub nickname: String,
    pub address: String,
    #[serde(default)]
    pub flags: RelayFlags,
    /// Consensus weight; only compared between relays.
    #[serde(default)]
    pub consensus_bandwidth: u64,
    /// Exit port summary. Relays without one are never used as exits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_policy: Option<ExitPolicy>,
}

impl Relay {
    /// Create a running relay with no other flags set.
    pub fn new(
        fingerprint: impl Into<String>,
        nickname: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into().to_ascii_uppercase(),
            nickname: nickname.into(),
            address: address.into(),
            flags: RelayFlags {
                running: true,
                ..RelayFlags::default()
            },
            consensus_bandwidth: 0,
            exit_policy: None,
        }
    }

    pub fn with_bandwidth(mut self, bandwidth: u64) -> Self {
        self.consensus_bandwidth = bandwidth;
        self
    }

    /// Mark this relay as an exit with the given port summary.
    pub fn with_exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.flags.exit = true;
        self.exit_policy = Some(policy);
        self
    }

    /// Mark this relay as a directory authority.
    pub fn with_authority(mut self, authority: bool) -> Self {
        self.flags.authority = authority;
        self
    }

    pub fn is_authority(&self) -> bool {
        self.flags.authority
    }

    /// True if this relay is an exit whose policy allows `port`.
    pub fn can_exit_to(&self, port: u16) -> bool {
        self.flags.exit
            && self
                .exit_policy
                .as_ref()
                .is_some_and(|policy| policy.allows(port))
    }

    /// Short fingerprint prefix used in log lines.
    pub fn short_fp(&self) -> &str {
        self.fingerprint.get(..8).unwrap_or(&self.fingerprint)
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.nickname, self.short_fp())
    }
}

/// Source of relay snapshots.
///
/// Called once per scheduling cycle; the returned list is treated as an
/// immutable snapshot until the next cycle.
pub trait NodeFeed: Send + Sync {
    fn relays(&self) -> Vec<Relay>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

    #[test]
    fn test_fingerprint_validation() {
        assert!(is_valid_fingerprint(FP));
        assert!(!is_valid_fingerprint("0123"));
        assert!(!is_valid_fingerprint(&FP.to_lowercase()));
        assert!(!is_valid_fingerprint(&FP.replace('0', "Z")));
    }

    #[test]
    fn test_relay_new_normalizes_fingerprint() {
        let relay = Relay::new(FP.to_lowercase(), "relay1", "10.0.0.1");
        assert_eq!(relay.fingerprint, FP);
        assert!(relay.flags.running);
        assert!(!relay.is_authority());
        assert_eq!(relay.short_fp(), "01234567");
        assert_eq!(relay.to_string(), "relay1 01234567");
    }

    #[test]
    fn test_relay_deserializes_with_missing_flags() {
        let json = format!(
            r#"{{"fingerprint":"{}","nickname":"n","address":"1.2.3.4"}}"#,
            FP
        );
        let relay: Relay = serde_json::from_str(&json).unwrap();
        assert_eq!(relay.flags, RelayFlags::default());
        assert_eq!(relay.consensus_bandwidth, 0);
        assert_eq!(relay.exit_policy, None);
    }

    #[test]
    fn test_can_exit_to_needs_flag_and_policy() {
        let policy: ExitPolicy = "accept 443".parse().unwrap();
        let exit = Relay::new(FP, "exit", "10.0.0.9").with_exit_policy(policy.clone());
        assert!(exit.can_exit_to(443));
        assert!(!exit.can_exit_to(80));

        let mut unflagged = exit.clone();
        unflagged.flags.exit = false;
        assert!(!unflagged.can_exit_to(443));

        let mut no_policy = exit;
        no_policy.exit_policy = None;
        assert!(!no_policy.can_exit_to(443));
    }

    #[test]
    fn test_relay_deserializes_exit_policy() {
        let json = format!(
            r#"{{"fingerprint":"{}","nickname":"n","address":"1.2.3.4","flags":{{"exit":true}},"exit_policy":"reject 25"}}"#,
            FP
        );
        let relay: Relay = serde_json::from_str(&json).unwrap();
        assert!(relay.can_exit_to(443));
        assert!(!relay.can_exit_to(25));
    }
}
