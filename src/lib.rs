//! Physical address-space management for an emulated IBM PC.
//!
//! The work is split across the workspace crates and re-exported here:
//! - [`memory`]: backing stores, the region registry, access policies, decoding and the
//!   invalidation bus,
//! - [`platform`]: the A20 gate, the PC memory bus and the chipset-facing controllers,
//! - [`pc_constants`]: where the legacy holes and ROM windows sit.

pub use memory;
pub use pcmem_pc_constants as pc_constants;
pub use pcmem_platform as platform;

pub use pcmem_platform::{Platform, PlatformConfig, PlatformError};
