//! Rule specifications for the metadata redirect.
//!
//! A rule has no identity beyond its fields: two [`RuleSpec`]s rendering to the
//! same argument string are the same netfilter rule.

use std::fmt;

use super::{CHAIN, METADATA_PORT, PROTOCOL};

/// Where a matched packet continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Continue evaluation in the named chain.
    Jump(String),
    /// Rewrite the destination to `address:port`.
    Dnat(String),
}

/// Match criteria shared by the jump and DNAT rules plus their target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub metadata_address: String,
    pub host_interface: String,
    pub target: Target,
}

impl RuleSpec {
    /// Jump rule installed in `nat/PREROUTING`.
    pub fn jump(metadata_address: &str, host_interface: &str) -> Self {
        Self {
            metadata_address: metadata_address.to_string(),
            host_interface: host_interface.to_string(),
            target: Target::Jump(CHAIN.to_string()),
        }
    }

    /// DNAT rule installed in the dedicated chain.
    pub fn dnat(metadata_address: &str, host_interface: &str, destination: &str) -> Self {
        Self {
            metadata_address: metadata_address.to_string(),
            host_interface: host_interface.to_string(),
            target: Target::Dnat(destination.to_string()),
        }
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-p {PROTOCOL} -d {} --dport {METADATA_PORT}",
            self.metadata_address
        )?;
        match &self.target {
            Target::Jump(chain) => write!(f, " -j {chain}")?,
            Target::Dnat(destination) => write!(f, " -j DNAT --to-destination {destination}")?,
        }
        write!(f, " -i {}", self.host_interface)
    }
}
