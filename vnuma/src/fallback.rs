// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The single-node fallback topology.

use crate::cpus::BootCpus;
use crate::registry::NumaRegistry;

/// Installs the degenerate topology used when discovery cannot be trusted:
/// node 0 owns every detected page frame and every possible CPU.
///
/// Any state a partially completed discovery left in the registry is
/// superseded: all APIC slots are reset before the single-node assignment,
/// and the node sets are cleared before node 0 is marked parsed.
pub(crate) fn install(registry: &mut dyn NumaRegistry, cpus: &BootCpus, max_pfn: u64) {
    for apic_id in 0..cpus.apic_id_limit() {
        registry.set_apicid_to_node(apic_id, None);
    }
    registry.clear_node_sets();
    registry.mark_parsed(0);

    if let Err(err) = registry.add_memory_block(0, 0, max_pfn) {
        // There is nothing further to fall back to; boot continues with
        // whatever block state the registry kept.
        tracing::error!(
            max_pfn,
            error = &err as &dyn std::error::Error,
            "failed to register fallback memory block"
        );
    }

    for cpu in cpus.possible() {
        registry.set_apicid_to_node(cpu, Some(0));
        registry.set_cpu_node(cpu, 0);
        registry.add_cpu_to_node_mask(0, cpu);
    }

    registry.resize_node_id_space();
}
