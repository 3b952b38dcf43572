//! Stateful mocks for the redirect backends.
//!
//! These mocks track actual netfilter state (chains and their rules) rather than
//! just verifying call sequences. This lets tests assert on the table _state_
//! after an operation. The call log is kept for the ordering guarantees.

#![cfg(test)]

use nix::errno::Errno;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::Error;
use super::interface::LinkOps;
use super::iptables_ops::IptablesOps;

/// Targets that are not user defined chains.
const BUILTIN_TARGETS: &[&str] = &[
    "ACCEPT",
    "DROP",
    "RETURN",
    "DNAT",
    "SNAT",
    "MASQUERADE",
    "REDIRECT",
];

// ============================================================================
// MockIptablesOps
// ============================================================================

#[derive(Debug, Default)]
pub struct IptablesState {
    /// (table, chain) -> rules in insertion order
    pub chains: BTreeMap<(String, String), Vec<String>>,
    /// Every call as `op table chain [rule]`.
    pub calls: Vec<String>,
    /// Map of operation name -> error message. If set, the operation will fail.
    pub fail_on: HashMap<String, String>,
}

impl IptablesState {
    /// State of a host with only the built-in `nat/PREROUTING` chain.
    pub fn nat_prerouting() -> Self {
        let mut state = Self::default();
        state.add_chain("nat", "PREROUTING");
        state
    }

    pub fn add_chain(&mut self, table: &str, chain: &str) {
        self.chains.insert(key(table, chain), Vec::new());
    }

    pub fn rules(&self, table: &str, chain: &str) -> Option<&Vec<String>> {
        self.chains.get(&key(table, chain))
    }

    pub fn rule_count(&self) -> usize {
        self.chains.values().map(Vec::len).sum()
    }

    fn record(
        &mut self,
        op: &str,
        table: &str,
        chain: &str,
        rule: Option<&str>,
    ) -> Result<(), Error> {
        match rule {
            Some(rule) => self.calls.push(format!("{op} {table} {chain} {rule}")),
            None => self.calls.push(format!("{op} {table} {chain}")),
        }
        if let Some(msg) = self.fail_on.get(op) {
            Err(Error::Backend(msg.clone()))
        } else {
            Ok(())
        }
    }

    fn chain_mut(&mut self, table: &str, chain: &str) -> Result<&mut Vec<String>, Error> {
        self.chains.get_mut(&key(table, chain)).ok_or_else(|| {
            Error::Backend(format!("No chain/target/match by that name: {table}/{chain}"))
        })
    }

    fn references(&self, table: &str, chain: &str) -> usize {
        self.chains
            .iter()
            .filter(|((t, _), _)| t == table)
            .flat_map(|(_, rules)| rules.iter())
            .filter(|rule| jump_target(rule) == Some(chain))
            .count()
    }
}

fn key(table: &str, chain: &str) -> (String, String) {
    (table.to_string(), chain.to_string())
}

fn jump_target(rule: &str) -> Option<&str> {
    let mut tokens = rule.split_whitespace();
    tokens.by_ref().find(|t| *t == "-j")?;
    tokens.next()
}

#[derive(Clone)]
pub struct MockIptablesOps {
    pub state: Arc<Mutex<IptablesState>>,
}

impl MockIptablesOps {
    pub fn new() -> Self {
        Self::with_state(IptablesState::nat_prerouting())
    }

    pub fn with_state(state: IptablesState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl IptablesOps for MockIptablesOps {
    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool, Error> {
        let mut s = self.state.lock().unwrap();
        s.record("chain_exists", table, chain, None)?;
        Ok(s.rules(table, chain).is_some())
    }

    fn new_chain(&self, table: &str, chain: &str) -> Result<(), Error> {
        let mut s = self.state.lock().unwrap();
        s.record("new_chain", table, chain, None)?;
        if s.rules(table, chain).is_some() {
            return Err(Error::Backend(format!("Chain already exists: {table}/{chain}")));
        }
        s.add_chain(table, chain);
        Ok(())
    }

    fn clear_chain(&self, table: &str, chain: &str) -> Result<(), Error> {
        let mut s = self.state.lock().unwrap();
        s.record("clear_chain", table, chain, None)?;
        s.chain_mut(table, chain)?.clear();
        Ok(())
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<(), Error> {
        let mut s = self.state.lock().unwrap();
        s.record("delete_chain", table, chain, None)?;
        if !s.chain_mut(table, chain)?.is_empty() {
            return Err(Error::Backend(format!("Directory not empty: {table}/{chain}")));
        }
        if s.references(table, chain) > 0 {
            return Err(Error::Backend(format!("Too many links: {table}/{chain}")));
        }
        s.chains.remove(&key(table, chain));
        Ok(())
    }

    fn append(&self, table: &str, chain: &str, rule: &str) -> Result<(), Error> {
        let mut s = self.state.lock().unwrap();
        s.record("append", table, chain, Some(rule))?;
        if let Some(target) = jump_target(rule) {
            if !BUILTIN_TARGETS.contains(&target) && s.rules(table, target).is_none() {
                return Err(Error::Backend(format!("Couldn't load target `{target}'")));
            }
        }
        // like `iptables -A`, duplicates are appended again
        s.chain_mut(table, chain)?.push(rule.to_string());
        Ok(())
    }

    fn delete(&self, table: &str, chain: &str, rule: &str) -> Result<(), Error> {
        let mut s = self.state.lock().unwrap();
        s.record("delete", table, chain, Some(rule))?;
        // like `iptables -D`, only the first matching rule is removed
        let rules = s.chain_mut(table, chain)?;
        match rules.iter().position(|r| r == rule) {
            Some(index) => {
                rules.remove(index);
                Ok(())
            }
            None => Err(Error::Backend(
                "Bad rule (does a matching rule exist in that chain?)".into(),
            )),
        }
    }

    fn exists(&self, table: &str, chain: &str, rule: &str) -> Result<bool, Error> {
        let mut s = self.state.lock().unwrap();
        s.record("exists", table, chain, Some(rule))?;
        Ok(s.rules(table, chain).is_some_and(|rules| rules.iter().any(|r| r == rule)))
    }
}

// ============================================================================
// MockLinkOps
// ============================================================================

#[derive(Debug, Default)]
pub struct LinkState {
    pub names: Vec<String>,
    pub lookups: usize,
    /// If set, every lookup fails with this errno.
    pub fail_with: Option<Errno>,
}

#[derive(Clone)]
pub struct MockLinkOps {
    pub state: Arc<Mutex<LinkState>>,
}

impl MockLinkOps {
    pub fn new(names: &[&str]) -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                names: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            })),
        }
    }

    pub fn failing(errno: Errno) -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                fail_with: Some(errno),
                ..Default::default()
            })),
        }
    }

    pub fn lookups(&self) -> usize {
        self.state.lock().unwrap().lookups
    }
}

impl LinkOps for MockLinkOps {
    fn index_by_name(&self, name: &str) -> Result<Option<u32>, Error> {
        let mut s = self.state.lock().unwrap();
        s.lookups += 1;
        if let Some(errno) = s.fail_with {
            return Err(Error::InterfaceLookup(errno));
        }
        Ok(s
            .names
            .iter()
            .position(|n| n == name)
            .map(|index| index as u32 + 1))
    }
}
