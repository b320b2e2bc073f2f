// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The kernel's generic NUMA registry.
//!
//! Discovery is the only writer during boot; everything it learns (or the
//! fallback it installs instead) lands here. The registry is injected so
//! ingestion and fallback can be exercised against a recording fake.

use thiserror::Error;

/// Error returned by [`NumaRegistry::add_memory_block`].
#[derive(Debug, Error)]
pub enum MemoryBlockError {
    /// The range collides with a block already registered to another node.
    #[error("range {start_pfn:#x}-{end_pfn:#x} overlaps an existing block")]
    Overlap {
        /// First page frame of the rejected range.
        start_pfn: u64,
        /// One past the last page frame of the rejected range.
        end_pfn: u64,
    },
    /// The range is empty or inverted.
    #[error("range {start_pfn:#x}-{end_pfn:#x} is empty or inverted")]
    InvalidRange {
        /// First page frame of the rejected range.
        start_pfn: u64,
        /// One past the last page frame of the rejected range.
        end_pfn: u64,
    },
    /// The registry's block table is full.
    #[error("no room for another memory block")]
    Full,
}

/// Mutation interface of the generic NUMA registry.
pub trait NumaRegistry {
    /// Registers `start_pfn..end_pfn` as memory belonging to `node`.
    fn add_memory_block(
        &mut self,
        node: u32,
        start_pfn: u64,
        end_pfn: u64,
    ) -> Result<(), MemoryBlockError>;

    /// Records `node` in the parsed-nodes set.
    fn mark_parsed(&mut self, node: u32);

    /// Shrinks or grows the node-id space to fit the parsed set.
    fn resize_node_id_space(&mut self);

    /// Assigns `cpu` to `node`.
    fn set_cpu_node(&mut self, cpu: u32, node: u32);

    /// Maps an APIC id to a node, or to no node at all.
    fn set_apicid_to_node(&mut self, apic_id: u32, node: Option<u32>);

    /// Adds `cpu` to `node`'s CPU mask.
    fn add_cpu_to_node_mask(&mut self, node: u32, cpu: u32);

    /// Records the relative memory access cost from node `from` to node
    /// `to`.
    fn set_distance(&mut self, from: u32, to: u32, distance: u32);

    /// Clears the parsed, possible, and online node sets.
    fn clear_node_sets(&mut self);
}
