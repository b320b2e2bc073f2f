// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The hypervisor transport for topology queries.

use vnuma_defs::TopologyCounts;
use vnuma_defs::TopologyRequest;
use vnuma_defs::TopologyStatus;

/// The virtualization mode the guest is running in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GuestMode {
    /// Fully paravirtualized guest. The only mode topology discovery
    /// supports.
    Paravirt,
    /// Hardware-assisted guest.
    Hvm,
    /// Not running under a hypervisor.
    Native,
}

/// Synchronous access to the hypervisor's topology query.
///
/// The query is issued twice during discovery with the same request shape:
/// first with every table slot unbound to probe the counts, then with all
/// three tables bound to guest memory. Both invocations echo the counts.
pub trait TopologyHypercall {
    /// The mode the calling guest is running in.
    fn guest_mode(&self) -> GuestMode;

    /// Issues the topology query.
    ///
    /// The hypervisor fills whichever table slots `request` binds and
    /// returns the node and CPU counts. On a failure status the contents
    /// of the bound tables are undefined.
    fn query(&mut self, request: &TopologyRequest) -> Result<TopologyCounts, TopologyStatus>;
}
