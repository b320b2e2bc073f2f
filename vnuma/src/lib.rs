// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Virtual NUMA topology discovery for a paravirtualized guest.
//!
//! The guest must make NUMA-aware placement decisions before its general
//! memory allocator exists, but the topology (node count, per-node memory
//! ranges, CPU affinities, inter-node distances) is only learned by
//! querying the hypervisor, and the size of that data is only learned by a
//! first query. Discovery therefore runs a two-phase protocol against the
//! early bump allocator: probe the counts, validate them against local
//! limits, allocate tables sized from them, fetch the full topology, and
//! re-validate that the counts did not move between the two queries.
//!
//! On any inconsistency the partial result is discarded and a single-node
//! topology covering all detected memory is installed instead. The caller
//! is never told discovery failed: a guest must not fail to boot because
//! its NUMA layout could not be trusted, it only degrades to "everything
//! is one node".
//!
//! All process-wide state this touches (the NUMA registry, the early
//! allocator, the hypercall transport) is reached through traits on
//! [`Init`], so the whole pipeline runs against fakes in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cpus;
mod discover;
mod earlymem;
mod fallback;
mod hypercall;
mod ingest;
mod registry;

pub use cpus::BootCpus;
pub use discover::DiscoverError;
pub use discover::Discovery;
pub use discover::Init;
pub use discover::init;
pub use earlymem::EarlyMemory;
pub use hypercall::GuestMode;
pub use hypercall::TopologyHypercall;
pub use registry::MemoryBlockError;
pub use registry::NumaRegistry;
