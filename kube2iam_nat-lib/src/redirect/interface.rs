//! Host network interface validation.
//!
//! Lookups go through [`LinkOps`] so the manager can be exercised without
//! depending on the interfaces of the machine running the tests.

use nix::errno::Errno;

use super::Error;

/// Marker turning an interface name into a prefix pattern (e.g. `eth+`).
pub const WILDCARD: char = '+';

/// Abstraction over host link lookups.
pub trait LinkOps: Send + Sync {
    /// Resolve an interface name to its index, `None` if no such interface exists.
    fn index_by_name(&self, name: &str) -> Result<Option<u32>, Error>;
}

/// Production [`LinkOps`] backed by `if_nametoindex(3)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealLinkOps;

impl LinkOps for RealLinkOps {
    fn index_by_name(&self, name: &str) -> Result<Option<u32>, Error> {
        match nix::net::if_::if_nametoindex(name) {
            Ok(index) => Ok(Some(index)),
            Err(Errno::ENODEV) => Ok(None),
            Err(e) => Err(Error::InterfaceLookup(e)),
        }
    }
}

pub fn is_wildcard(host_interface: &str) -> bool {
    host_interface.contains(WILDCARD)
}

/// Validates that `host_interface` exists on this host.
///
/// Wildcard patterns are accepted without a lookup: they legitimately match
/// interfaces that do not exist yet, such as veth pairs created per pod.
pub fn check_interface_exists(links: &impl LinkOps, host_interface: &str) -> Result<(), Error> {
    if is_wildcard(host_interface) {
        return Ok(());
    }

    match links.index_by_name(host_interface)? {
        Some(_) => Ok(()),
        None => Err(Error::InterfaceNotFound(host_interface.to_string())),
    }
}
