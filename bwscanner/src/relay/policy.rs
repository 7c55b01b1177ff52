//! Exit port summaries.
//!
//! Relays publish a short summary of their exit policy: either the ports
//! they accept or the ports they reject, for example `accept 80,443` or
//! `reject 1-1023,8000-8999`. That is all the scanner needs to pick an exit
//! that can reach a destination port.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed port summary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid exit policy '{input}': {reason}")]
pub struct PolicyParseError {
    input: String,
    reason: String,
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortRange {
    low: u16,
    high: u16,
}

impl PortRange {
    fn contains(&self, port: u16) -> bool {
        (self.low..=self.high).contains(&port)
    }
}

/// Accept or reject summary over a set of port ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExitPolicy {
    accept: bool,
    ranges: Vec<PortRange>,
}

impl ExitPolicy {
    /// True if traffic to `port` may leave through this relay.
    pub fn allows(&self, port: u16) -> bool {
        let listed = self.ranges.iter().any(|r| r.contains(port));
        listed == self.accept
    }
}

impl std::str::FromStr for ExitPolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| PolicyParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let (keyword, ports) = s
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| err("expected '<accept|reject> <ports>'"))?;
        let accept = match keyword {
            "accept" => true,
            "reject" => false,
            _ => return Err(err("keyword must be accept or reject")),
        };

        let mut ranges = Vec::new();
        for item in ports.trim().split(',') {
            let (low, high) = item.split_once('-').unwrap_or((item, item));
            let low: u16 = low.parse().map_err(|_| err("bad port"))?;
            let high: u16 = high.parse().map_err(|_| err("bad port"))?;
            if low == 0 || low > high {
                return Err(err("bad port range"));
            }
            ranges.push(PortRange { low, high });
        }
        Ok(Self { accept, ranges })
    }
}

impl TryFrom<String> for ExitPolicy {
    type Error = PolicyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExitPolicy> for String {
    fn from(policy: ExitPolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for ExitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.accept { "accept " } else { "reject " })?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if range.low == range.high {
                write!(f, "{}", range.low)?;
            } else {
                write!(f, "{}-{}", range.low, range.high)?;
            }
        }
        Ok(())
    }
}
