//! NAT redirect of cloud metadata traffic to a local proxy.
//!
//! Two rules make up the redirect:
//! 1. a jump rule in `nat/PREROUTING` sending metadata traffic arriving on the
//!    host interface into the dedicated [`CHAIN`]
//! 2. a DNAT rule in [`CHAIN`] rewriting the destination to the proxy address
//!
//! State lives entirely in the kernel netfilter tables. Concurrent callers are
//! not coordinated here: a host process must serialize calls to [`Manager`]
//! (e.g. by owning the rules from a single process).

use thiserror::Error;

use std::fmt::Display;
use std::net::Ipv4Addr;

use crate::config::Redirect;

pub mod interface;
pub mod iptables_ops;
pub mod rule;

pub(crate) mod mocks;

pub use interface::{LinkOps, RealLinkOps};
pub use iptables_ops::{IptablesOps, RealIptablesOps};
pub use rule::{RuleSpec, Target};

/// Dedicated chain holding the DNAT rule.
pub const CHAIN: &str = "PREROUTING_KUBE2IAM";
/// iptables table for NAT rules.
pub const NAT_TABLE: &str = "nat";
/// Built-in chain evaluated before the routing decision.
pub const PREROUTING: &str = "PREROUTING";
/// Port of the metadata endpoint.
pub const METADATA_PORT: u16 = 80;
pub const PROTOCOL: &str = "tcp";

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("interface lookup failed: {0}")]
    InterfaceLookup(nix::Error),
    #[error("iptables error: {0}")]
    Backend(String),
}

impl Error {
    pub(crate) fn backend(e: impl Display) -> Self {
        Error::Backend(e.to_string())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::InterfaceNotFound(_))
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Backend(_))
    }
}

/// What part of a redirect is currently installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Absent,
    /// Some pieces are present, e.g. after a crash between inserting the jump rule
    /// and the DNAT rule. Re-running [`Manager::add_rules`] completes it.
    Partial { chain: bool, jump: bool, dnat: bool },
    Installed,
}

/// Manages the redirect rules through injected backends.
pub struct Manager<I, L> {
    iptables: I,
    links: L,
}

impl Manager<RealIptablesOps, RealLinkOps> {
    /// Manager operating on the host's IPv4 tables and interfaces.
    pub fn real() -> Result<Self, Error> {
        Ok(Self::new(RealIptablesOps::new()?, RealLinkOps))
    }
}

impl<I: IptablesOps, L: LinkOps> Manager<I, L> {
    pub fn new(iptables: I, links: L) -> Self {
        Self { iptables, links }
    }

    /// Installs the jump rule and the DNAT rule redirecting metadata traffic on
    /// `host_interface` to `bind_ip:app_port`.
    ///
    /// Every step is idempotent, so a failed call is retried by calling again.
    /// Nothing is rolled back on failure: the jump rule may already be in place
    /// when appending the DNAT rule fails.
    pub fn add_rules(
        &self,
        app_port: u16,
        metadata_address: &str,
        host_interface: &str,
        bind_ip: &str,
    ) -> Result<(), Error> {
        interface::check_interface_exists(&self.links, host_interface)?;
        let destination = dnat_target(parse_bind_ip(bind_ip)?, app_port);

        if !self.iptables.chain_exists(NAT_TABLE, CHAIN)? {
            tracing::debug!(chain = CHAIN, "Creating kube2iam iptables chain");
            self.iptables.new_chain(NAT_TABLE, CHAIN)?;
        }

        tracing::debug!(chain = CHAIN, "Adding kube2iam iptables jump rule");
        let jump = RuleSpec::jump(metadata_address, host_interface);
        self.append_unique(PREROUTING, &jump)?;

        tracing::debug!(chain = CHAIN, %destination, "Adding kube2iam iptables chain rule");
        let dnat = RuleSpec::dnat(metadata_address, host_interface, &destination);
        self.append_unique(CHAIN, &dnat)
    }

    /// Appends `rule` to `chain` in the nat table unless it is already present.
    fn append_unique(&self, chain: &str, rule: &RuleSpec) -> Result<(), Error> {
        let rule = rule.to_string();
        if self.iptables.exists(NAT_TABLE, chain, &rule)? {
            tracing::debug!(%chain, %rule, "rule already present");
            return Ok(());
        }
        self.iptables.append(NAT_TABLE, chain, &rule)
    }

    /// Removes the jump rule and empties the dedicated chain.
    ///
    /// A missing jump rule is expected on a first start and only logged.
    /// Failing to clear the chain, e.g. because it does not exist, is returned.
    pub fn clear_rules(&self, metadata_address: &str, host_interface: &str) -> Result<(), Error> {
        let jump = RuleSpec::jump(metadata_address, host_interface);
        if let Err(e) = self.iptables.delete(NAT_TABLE, PREROUTING, &jump.to_string()) {
            // this always fails on a clean host
            tracing::debug!(chain = PREROUTING, error = %e, "failed to remove kube2iam jump rule");
        }

        tracing::info!(chain = CHAIN, "Clearing kube2iam iptables chain");
        self.iptables.clear_chain(NAT_TABLE, CHAIN)
    }

    /// Runs [`Manager::clear_rules`] and then removes the dedicated chain.
    pub fn clear_chain(&self, metadata_address: &str, host_interface: &str) -> Result<(), Error> {
        self.clear_rules(metadata_address, host_interface)?;

        tracing::debug!(chain = CHAIN, "Removing kube2iam iptables chain");
        self.iptables.delete_chain(NAT_TABLE, CHAIN)
    }

    /// Installs the redirect described by a configuration.
    pub fn apply(&self, redirect: &Redirect) -> Result<(), Error> {
        self.add_rules(
            redirect.app_port,
            &redirect.metadata_address,
            &redirect.host_interface,
            &redirect.bind_ip,
        )
    }

    /// Removes the redirect described by a configuration, chain included.
    pub fn revert(&self, redirect: &Redirect) -> Result<(), Error> {
        self.clear_chain(&redirect.metadata_address, &redirect.host_interface)
    }

    /// Inspects the tables without modifying them.
    pub fn status(&self, redirect: &Redirect) -> Result<RuleStatus, Error> {
        let destination = dnat_target(parse_bind_ip(&redirect.bind_ip)?, redirect.app_port);
        let chain = self.iptables.chain_exists(NAT_TABLE, CHAIN)?;

        let jump = RuleSpec::jump(&redirect.metadata_address, &redirect.host_interface);
        let jump = self
            .iptables
            .exists(NAT_TABLE, PREROUTING, &jump.to_string())?;

        let dnat = if chain {
            let dnat = RuleSpec::dnat(
                &redirect.metadata_address,
                &redirect.host_interface,
                &destination,
            );
            self.iptables.exists(NAT_TABLE, CHAIN, &dnat.to_string())?
        } else {
            false
        };

        Ok(match (chain, jump, dnat) {
            (true, true, true) => RuleStatus::Installed,
            (false, false, false) => RuleStatus::Absent,
            (chain, jump, dnat) => RuleStatus::Partial { chain, jump, dnat },
        })
    }
}

/// DNAT needs a concrete IPv4 target, the nat table managed here is IPv4 only.
fn parse_bind_ip(bind_ip: &str) -> Result<Ipv4Addr, Error> {
    let ip: Ipv4Addr = bind_ip
        .parse()
        .map_err(|_| {
            Error::Configuration(format!("invalid IPv4 bind address: {bind_ip}"))
        })?;
    if ip.is_unspecified() {
        return Err(Error::Configuration(format!("iptables can't redirect to {ip}")));
    }
    Ok(ip)
}

fn dnat_target(bind_ip: Ipv4Addr, app_port: u16) -> String {
    format!("{bind_ip}:{app_port}")
}

/// Installs the redirect on this host. See [`Manager::add_rules`].
pub fn add_rules(
    app_port: u16,
    metadata_address: &str,
    host_interface: &str,
    bind_ip: &str,
) -> Result<(), Error> {
    // validation must not depend on the iptables binary being available
    interface::check_interface_exists(&RealLinkOps, host_interface)?;
    parse_bind_ip(bind_ip)?;
    Manager::real()?.add_rules(app_port, metadata_address, host_interface, bind_ip)
}

/// Clears the redirect rules on this host. See [`Manager::clear_rules`].
pub fn clear_rules(metadata_address: &str, host_interface: &str) -> Result<(), Error> {
    Manager::real()?.clear_rules(metadata_address, host_interface)
}

/// Clears the redirect rules and removes the chain on this host. See [`Manager::clear_chain`].
pub fn clear_chain(metadata_address: &str, host_interface: &str) -> Result<(), Error> {
    Manager::real()?.clear_chain(metadata_address, host_interface)
}

/// Checks a host interface on this host. See [`interface::check_interface_exists`].
pub fn check_interface_exists(host_interface: &str) -> Result<(), Error> {
    interface::check_interface_exists(&RealLinkOps, host_interface)
}
