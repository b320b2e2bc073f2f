// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two-phase discovery pipeline.

use crate::cpus::BootCpus;
use crate::earlymem::EarlyMemory;
use crate::earlymem::Scratch;
use crate::fallback;
use crate::hypercall::GuestMode;
use crate::hypercall::TopologyHypercall;
use crate::ingest;
use crate::registry::MemoryBlockError;
use crate::registry::NumaRegistry;
use std::mem::size_of;
use thiserror::Error;
use vnuma_defs::DOMAIN_ID_SELF;
use vnuma_defs::GPA_UNBOUND;
use vnuma_defs::NodeMemRange;
use vnuma_defs::TopologyCounts;
use vnuma_defs::TopologyRequest;
use vnuma_defs::TopologyStatus;

/// Why discovery was abandoned in favor of the fallback topology.
#[derive(Debug, Error)]
pub enum DiscoverError {
    /// The guest is not running in the supported paravirtualized mode.
    #[error("guest mode {0:?} does not support vnuma discovery")]
    UnsupportedGuestMode(GuestMode),
    /// The hypervisor rejected a topology query.
    #[error("topology query failed with status {0:?}")]
    Hypercall(TopologyStatus),
    /// The probed counts are inconsistent with local limits and cannot be
    /// trusted to size allocations.
    #[error(
        "implausible probed counts: {nr_nodes} nodes, {nr_cpus} cpus \
         ({possible_cpus} possible, {max_cpus} bootable)"
    )]
    ImplausibleCounts {
        /// Probed node count.
        nr_nodes: u32,
        /// Probed CPU count.
        nr_cpus: u32,
        /// Locally-known possible-CPU count.
        possible_cpus: u32,
        /// Configured limit on bootable CPUs.
        max_cpus: u32,
    },
    /// The early allocator could not provide a table buffer.
    #[error("early allocator could not provide {size} bytes for the {table} table")]
    OutOfEarlyMemory {
        /// Which table the allocation was for.
        table: &'static str,
        /// The requested size in bytes.
        size: u64,
    },
    /// The counts echoed by the full fetch disagree with the capacity
    /// probe, so the fetched tables may be truncated or stale.
    #[error(
        "counts changed between queries: {probed_nodes} -> {fetched_nodes} nodes, \
         {fetched_cpus} cpus fetched with {possible_cpus} possible"
    )]
    CountsChanged {
        /// Node count from the capacity probe.
        probed_nodes: u32,
        /// Node count echoed by the full fetch.
        fetched_nodes: u32,
        /// CPU count echoed by the full fetch.
        fetched_cpus: u32,
        /// Locally-known possible-CPU count.
        possible_cpus: u32,
    },
    /// The registry rejected a node's memory range.
    #[error("registering memory block for node {node} failed")]
    AddMemoryBlock {
        /// The node whose range was rejected.
        node: u32,
        /// The registry's rejection.
        #[source]
        source: MemoryBlockError,
    },
    /// A possible CPU has no entry in the fetched CPU-to-node map.
    #[error("cpu {cpu} has no entry in the fetched cpu-to-node map")]
    CpuUnmapped {
        /// The unmapped CPU id.
        cpu: u32,
    },
}

/// The discovery outcome.
///
/// Neither variant is an error: when the hypervisor's answer cannot be
/// trusted the fallback topology has already been installed and boot
/// proceeds on it.
#[derive(Debug)]
pub enum Discovery {
    /// The hypervisor-provided topology was ingested.
    Vnuma {
        /// The number of nodes registered.
        nr_nodes: u32,
        /// The number of virtual CPUs described.
        nr_cpus: u32,
    },
    /// The single-node fallback topology was installed.
    Fallback(DiscoverError),
}

/// Collaborators for a discovery run.
pub struct Init<'a> {
    /// The hypercall transport.
    pub hypercall: &'a mut dyn TopologyHypercall,
    /// The early bump allocator.
    pub early_mem: &'a mut dyn EarlyMemory,
    /// The generic NUMA registry.
    pub registry: &'a mut dyn NumaRegistry,
    /// The boot-time CPU topology snapshot.
    pub cpus: &'a BootCpus,
    /// The highest page frame found by the platform's memory scan. The
    /// fallback topology spans page frames `0..max_pfn`.
    pub max_pfn: u64,
}

/// Discovers the guest's virtual NUMA topology and feeds it into the
/// registry.
///
/// Runs once, synchronously, during early boot. Always leaves the registry
/// with a usable topology: the hypervisor's if every validation step
/// passes, the single-node fallback otherwise. The outcome reports which
/// of the two happened, but no variant is a failure the caller should act
/// on.
pub fn init(params: Init<'_>) -> Discovery {
    let Init {
        hypercall,
        early_mem,
        registry,
        cpus,
        max_pfn,
    } = params;

    match discover(hypercall, early_mem, registry, cpus) {
        Ok(counts) => {
            tracing::info!(
                nr_nodes = counts.nr_nodes,
                nr_cpus = counts.nr_cpus,
                "vnuma topology discovered"
            );
            Discovery::Vnuma {
                nr_nodes: counts.nr_nodes,
                nr_cpus: counts.nr_cpus,
            }
        }
        Err(err) => {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "vnuma discovery failed, installing single-node fallback"
            );
            fallback::install(registry, cpus, max_pfn);
            Discovery::Fallback(err)
        }
    }
}

fn discover(
    hypercall: &mut dyn TopologyHypercall,
    early_mem: &mut dyn EarlyMemory,
    registry: &mut dyn NumaRegistry,
    cpus: &BootCpus,
) -> Result<TopologyCounts, DiscoverError> {
    let mode = hypercall.guest_mode();
    if mode != GuestMode::Paravirt {
        return Err(DiscoverError::UnsupportedGuestMode(mode));
    }

    let probed = probe(hypercall)?;
    tracing::debug!(
        nr_nodes = probed.nr_nodes,
        nr_cpus = probed.nr_cpus,
        "probed vnuma capacity"
    );
    check_counts(probed, cpus)?;

    // Whatever happens past this point, every buffer acquired below is
    // released on the way out.
    let mut buffers = Buffers::default();
    let result = fetch(hypercall, early_mem, registry, cpus, probed, &mut buffers);
    buffers.release(early_mem);
    result
}

/// Capacity probe: issue the query with no table slots bound, retrieving
/// only the node and CPU counts to size the table allocations.
fn probe(hypercall: &mut dyn TopologyHypercall) -> Result<TopologyCounts, DiscoverError> {
    let request = TopologyRequest {
        domain: DOMAIN_ID_SELF,
        reserved: [0; 3],
        mem_ranges_gpa: GPA_UNBOUND,
        distances_gpa: GPA_UNBOUND,
        cpu_to_node_gpa: GPA_UNBOUND,
    };
    hypercall.query(&request).map_err(DiscoverError::Hypercall)
}

/// Rejects probed counts that would produce wasted or undersized
/// allocations.
///
/// A node needs at least one CPU backing it, so the node count is bounded
/// by both CPU limits, and the CPU map about to be allocated must cover
/// every CPU this kernel considers possible.
fn check_counts(probed: TopologyCounts, cpus: &BootCpus) -> Result<(), DiscoverError> {
    let possible_cpus = cpus.possible_count();
    let max_cpus = cpus.max_cpus();
    if probed.nr_nodes == 0
        || probed.nr_nodes > max_cpus
        || probed.nr_nodes > possible_cpus
        || possible_cpus > probed.nr_cpus
        || probed.nr_cpus == 0
    {
        return Err(DiscoverError::ImplausibleCounts {
            nr_nodes: probed.nr_nodes,
            nr_cpus: probed.nr_cpus,
            possible_cpus,
            max_cpus,
        });
    }
    Ok(())
}

/// Full fetch: bind the three tables, re-issue the query, and ingest the
/// result if the echoed counts still match the probe.
fn fetch(
    hypercall: &mut dyn TopologyHypercall,
    early_mem: &mut dyn EarlyMemory,
    registry: &mut dyn NumaRegistry,
    cpus: &BootCpus,
    probed: TopologyCounts,
    buffers: &mut Buffers,
) -> Result<TopologyCounts, DiscoverError> {
    let (mem_ranges, distances, cpu_to_node) = buffers.allocate(early_mem, probed)?;

    let request = TopologyRequest {
        domain: DOMAIN_ID_SELF,
        reserved: [0; 3],
        mem_ranges_gpa: mem_ranges.addr,
        distances_gpa: distances.addr,
        cpu_to_node_gpa: cpu_to_node.addr,
    };
    let fetched = hypercall.query(&request).map_err(DiscoverError::Hypercall)?;

    // The hypervisor may have changed state between the two queries; if
    // the counts moved, the tables were sized for the wrong topology and
    // nothing in them can be trusted.
    if fetched.nr_nodes != probed.nr_nodes || cpus.possible_count() != fetched.nr_cpus {
        return Err(DiscoverError::CountsChanged {
            probed_nodes: probed.nr_nodes,
            fetched_nodes: fetched.nr_nodes,
            fetched_cpus: fetched.nr_cpus,
            possible_cpus: cpus.possible_count(),
        });
    }

    ingest::ingest(
        early_mem,
        registry,
        cpus,
        fetched,
        mem_ranges,
        distances,
        cpu_to_node,
    )?;
    Ok(fetched)
}

/// The three table buffers, each optionally acquired.
///
/// The acquisitions are independent: any prefix may succeed before one
/// fails, and `release` frees exactly the acquired prefix.
#[derive(Default)]
struct Buffers {
    mem_ranges: Option<Scratch>,
    distances: Option<Scratch>,
    cpu_to_node: Option<Scratch>,
}

impl Buffers {
    fn allocate(
        &mut self,
        mem: &mut dyn EarlyMemory,
        counts: TopologyCounts,
    ) -> Result<(Scratch, Scratch, Scratch), DiscoverError> {
        let nodes = u64::from(counts.nr_nodes);
        let mem_ranges_size = nodes * size_of::<NodeMemRange>() as u64;
        let distances_size = nodes * nodes * size_of::<u32>() as u64;
        let cpu_to_node_size = u64::from(counts.nr_cpus) * size_of::<u32>() as u64;

        let mem_ranges = acquire(mem, "memory range", mem_ranges_size, &mut self.mem_ranges)?;
        let distances = acquire(mem, "distance", distances_size, &mut self.distances)?;
        let cpu_to_node = acquire(mem, "cpu-to-node", cpu_to_node_size, &mut self.cpu_to_node)?;
        Ok((mem_ranges, distances, cpu_to_node))
    }

    fn release(&mut self, mem: &mut dyn EarlyMemory) {
        Scratch::release(self.mem_ranges.take(), mem);
        Scratch::release(self.distances.take(), mem);
        Scratch::release(self.cpu_to_node.take(), mem);
    }
}

fn acquire(
    mem: &mut dyn EarlyMemory,
    table: &'static str,
    size: u64,
    slot: &mut Option<Scratch>,
) -> Result<Scratch, DiscoverError> {
    let buf =
        Scratch::allocate(mem, size).ok_or(DiscoverError::OutOfEarlyMemory { table, size })?;
    *slot = Some(buf);
    Ok(buf)
}
