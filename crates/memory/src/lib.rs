//! Physical address-space core for the emulated PC.
//!
//! The pieces, leaf first:
//! - [`GuestMemory`] stores (dense/sparse RAM, ROM images) that regions point into,
//! - the region registry with last-enabled-wins priority ([`RegionDesc`], [`RegionId`]),
//! - the per-granule [`PolicyTable`] of read/write access policies,
//! - [`AddressSpace`], which owns all of the above and decodes physical accesses,
//! - the [`InvalidationBus`], signalled after every remapping so CPU-side caches are flushed.

mod bus;
mod invalidation;
mod mmio;
mod phys;
mod policy;
mod region;
mod space;

#[cfg(test)]
mod tests;

pub use bus::MemoryBus;
pub use invalidation::{InvalidationBus, InvalidationSink};
pub use mmio::MmioHandler;
pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult, SparseMemory};
pub use policy::{AccessPolicy, GranulePolicy, Initiator, PolicyLayer, PolicyTable};
pub use region::{Backing, MapError, RegionClass, RegionDesc, RegionId, RegionInfo};
pub use space::{AddressSpace, AddressSpaceConfig, Route, StoreId, OPEN_BUS_BYTE};
