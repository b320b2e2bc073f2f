// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire definitions for the paravirtual NUMA topology query.
//!
//! A guest that wants to learn its virtual NUMA layout issues the same
//! query twice: once with no table slots bound, to learn how many nodes
//! and virtual CPUs the hypervisor will describe, and once with
//! guest-allocated tables bound, to fetch the per-node memory ranges, the
//! node distance matrix, and the CPU-to-node map.

#![no_std]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use core::fmt;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Guest page size. All table buffers bound to a query are aligned to this.
pub const PAGE_SIZE: u64 = 4096;

/// Domain identifier addressing the calling guest itself.
pub const DOMAIN_ID_SELF: u16 = 0x7ff0;

/// Placeholder for a table slot that is not bound to guest memory.
///
/// The hypervisor skips filling unbound slots, so a query carrying only
/// unbound slots degenerates to a count probe.
pub const GPA_UNBOUND: u64 = 0;

/// A contiguous physical range owned by one virtual node.
///
/// Ranges are in page-frame numbers, exclusive of `end_pfn`, and are
/// constructed by the hypervisor from the guest's RAM map, so consecutive
/// nodes' ranges do not overlap.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct NodeMemRange {
    /// First page frame of the range.
    pub start_pfn: u64,
    /// One past the last page frame of the range.
    pub end_pfn: u64,
}

const_assert_eq!(size_of::<NodeMemRange>(), 16);

impl NodeMemRange {
    /// The number of page frames in the range.
    pub fn page_count(&self) -> u64 {
        self.end_pfn.saturating_sub(self.start_pfn)
    }

    /// Whether the range covers no pages.
    pub fn is_empty(&self) -> bool {
        self.end_pfn <= self.start_pfn
    }
}

impl fmt::Display for NodeMemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start_pfn, self.end_pfn)
    }
}

/// The topology query request.
///
/// The same record shape is sent for both phases of discovery; only the
/// table slot binding differs. Unbound slots carry [`GPA_UNBOUND`].
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct TopologyRequest {
    /// The domain the query describes. Guests pass [`DOMAIN_ID_SELF`].
    pub domain: u16,
    /// Must be zero.
    pub reserved: [u16; 3],
    /// Guest physical address of the memory-range table, one
    /// [`NodeMemRange`] per node.
    pub mem_ranges_gpa: u64,
    /// Guest physical address of the distance table, a flattened
    /// node-count by node-count matrix of `u32` entries. See
    /// [`distance_index`] for the element order.
    pub distances_gpa: u64,
    /// Guest physical address of the CPU-to-node table, one `u32` node id
    /// per virtual CPU.
    pub cpu_to_node_gpa: u64,
}

const_assert_eq!(size_of::<TopologyRequest>(), 32);

/// Node and virtual CPU counts echoed by every topology query.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct TopologyCounts {
    /// The number of virtual NUMA nodes.
    pub nr_nodes: u32,
    /// The number of virtual CPUs.
    pub nr_cpus: u32,
}

const_assert_eq!(size_of::<TopologyCounts>(), 8);

/// Flattened index of the distance from node `row` to node `column`.
///
/// The hypervisor lays the table out column major: all distances *to* a
/// given node are contiguous.
pub const fn distance_index(row: u32, column: u32, nr_nodes: u32) -> usize {
    column as usize * nr_nodes as usize + row as usize
}

/// Status returned by the topology query.
///
/// Values outside the set below remain representable; anything negative is
/// a failure and the bound tables must not be trusted.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct TopologyStatus(pub i32);

impl TopologyStatus {
    /// The query succeeded.
    pub const SUCCESS: Self = Self(0);
    /// The hypervisor has no topology for the addressed domain.
    pub const NOT_FOUND: Self = Self(-2);
    /// A bound table was too small for the data to be copied.
    pub const NO_MEMORY: Self = Self(-12);
    /// The request record was malformed.
    pub const INVALID_PARAMETER: Self = Self(-22);
    /// The hypervisor does not implement the topology query.
    pub const UNSUPPORTED: Self = Self(-95);

    /// Whether this status reports a failure.
    pub fn is_failure(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Debug for TopologyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SUCCESS => "SUCCESS",
            Self::NOT_FOUND => "NOT_FOUND",
            Self::NO_MEMORY => "NO_MEMORY",
            Self::INVALID_PARAMETER => "INVALID_PARAMETER",
            Self::UNSUPPORTED => "UNSUPPORTED",
            Self(value) => return write!(f, "TopologyStatus({value})"),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use alloc::format;

    #[test]
    fn distance_table_is_column_major() {
        // For a 3-node table, the distances to node 1 occupy entries 3..6.
        assert_eq!(distance_index(0, 1, 3), 3);
        assert_eq!(distance_index(2, 1, 3), 5);
        assert_eq!(distance_index(2, 0, 3), 2);
        assert_eq!(distance_index(0, 2, 3), 6);
    }

    #[test]
    fn status_names() {
        assert_eq!(format!("{:?}", TopologyStatus::INVALID_PARAMETER), "INVALID_PARAMETER");
        assert_eq!(format!("{:?}", TopologyStatus(-99)), "TopologyStatus(-99)");
        assert!(TopologyStatus(-99).is_failure());
        assert!(!TopologyStatus::SUCCESS.is_failure());
    }
}
