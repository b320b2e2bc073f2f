// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ingestion of a fetched topology into the NUMA registry.

use crate::cpus::BootCpus;
use crate::discover::DiscoverError;
use crate::earlymem::EarlyMemory;
use crate::earlymem::Scratch;
use crate::registry::NumaRegistry;
use vnuma_defs::NodeMemRange;
use vnuma_defs::TopologyCounts;
use vnuma_defs::distance_index;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

/// Transcribes the fetched tables into the registry.
///
/// Runs only after the consistency gate has passed, so the table sizes are
/// known to match `counts`. A registration rejection aborts immediately;
/// nodes registered before the rejection stay in the registry and are
/// superseded by the fallback topology the caller then installs.
pub(crate) fn ingest(
    mem: &dyn EarlyMemory,
    registry: &mut dyn NumaRegistry,
    cpus: &BootCpus,
    counts: TopologyCounts,
    mem_ranges: Scratch,
    distances: Scratch,
    cpu_to_node: Scratch,
) -> Result<(), DiscoverError> {
    let nr_nodes = counts.nr_nodes;

    // Per-node memory ranges, constructed by the hypervisor from the
    // guest's RAM map.
    let ranges: Vec<NodeMemRange> = read_table(mem, mem_ranges, nr_nodes as usize);
    for (node, range) in ranges.iter().enumerate() {
        let node = node as u32;
        registry
            .add_memory_block(node, range.start_pfn, range.end_pfn)
            .map_err(|source| DiscoverError::AddMemoryBlock { node, source })?;
        registry.mark_parsed(node);
        tracing::debug!(node, %range, "registered vnuma memory block");
    }
    registry.resize_node_id_space();

    // Every possible CPU gets an assignment, not just the ones online at
    // boot.
    let cpu_map: Vec<u32> = read_table(mem, cpu_to_node, counts.nr_cpus as usize);
    for cpu in cpus.possible() {
        let node = cpu_map
            .get(cpu as usize)
            .copied()
            .ok_or(DiscoverError::CpuUnmapped { cpu })?;
        registry.set_apicid_to_node(cpu, Some(node));
        registry.set_cpu_node(cpu, node);
        registry.add_cpu_to_node_mask(node, cpu);
    }

    let table: Vec<u32> = read_table(mem, distances, nr_nodes as usize * nr_nodes as usize);
    for i in 0..nr_nodes {
        for j in 0..nr_nodes {
            registry.set_distance(i, j, table[distance_index(i, j, nr_nodes)]);
        }
    }

    Ok(())
}

/// Reads `count` elements back out of a fetched table buffer.
fn read_table<T: FromBytes + IntoBytes + Immutable + Clone>(
    mem: &dyn EarlyMemory,
    buf: Scratch,
    count: usize,
) -> Vec<T> {
    let mut table = vec![T::new_zeroed(); count];
    mem.read(buf.addr, table.as_mut_bytes());
    table
}
