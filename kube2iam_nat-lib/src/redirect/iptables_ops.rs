//! Abstraction over iptables operations for testability.
//!
//! Defines [`IptablesOps`] trait that mirrors the parts of the `iptables` crate API
//! the redirect needs. Production code uses [`RealIptablesOps`].
//! Tests use stateful mocks (see `mocks` module).

use super::Error;

/// Abstraction over iptables chain and rule operations.
///
/// All methods are synchronous, matching the underlying `iptables` crate.
/// Every failure of the underlying command surfaces as [`Error::Backend`].
pub trait IptablesOps: Send + Sync {
    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool, Error>;
    fn new_chain(&self, table: &str, chain: &str) -> Result<(), Error>;
    /// Remove all rules from `chain`. Fails if the chain does not exist.
    fn clear_chain(&self, table: &str, chain: &str) -> Result<(), Error>;
    /// Remove `chain`. Fails if it does not exist, is not empty or is still referenced.
    fn delete_chain(&self, table: &str, chain: &str) -> Result<(), Error>;
    /// Append `rule` at the end of `chain`, even if an identical rule is present.
    fn append(&self, table: &str, chain: &str, rule: &str) -> Result<(), Error>;
    /// Delete `rule`. Fails if the rule is not present.
    fn delete(&self, table: &str, chain: &str, rule: &str) -> Result<(), Error>;
    fn exists(&self, table: &str, chain: &str, rule: &str) -> Result<bool, Error>;
}

/// Production [`IptablesOps`] backed by the `iptables` crate.
pub struct RealIptablesOps {
    inner: iptables::IPTables,
}

impl RealIptablesOps {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            inner: iptables::new(false).map_err(Error::backend)?,
        })
    }
}

impl IptablesOps for RealIptablesOps {
    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool, Error> {
        self.inner.chain_exists(table, chain).map_err(Error::backend)
    }

    fn new_chain(&self, table: &str, chain: &str) -> Result<(), Error> {
        self.inner.new_chain(table, chain).map_err(Error::backend)
    }

    fn clear_chain(&self, table: &str, chain: &str) -> Result<(), Error> {
        // `iptables -F` on a missing chain exits non-zero, which is the failure we want to surface
        self.inner.flush_chain(table, chain).map_err(Error::backend)
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<(), Error> {
        self.inner.delete_chain(table, chain).map_err(Error::backend)
    }

    fn append(&self, table: &str, chain: &str, rule: &str) -> Result<(), Error> {
        self.inner.append(table, chain, rule).map_err(Error::backend)
    }

    fn delete(&self, table: &str, chain: &str, rule: &str) -> Result<(), Error> {
        self.inner.delete(table, chain, rule).map_err(Error::backend)
    }

    fn exists(&self, table: &str, chain: &str, rule: &str) -> Result<bool, Error> {
        self.inner.exists(table, chain, rule).map_err(Error::backend)
    }
}
