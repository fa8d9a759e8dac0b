
use pcmem_pc_constants::HIGH_MEMORY_BASE;

use crate::{AddressSpace, AddressSpaceConfig, DenseMemory, StoreId};

/// 1 MiB space with 16 KiB granules and one RAM store covering all of it.
pub(crate) fn real_mode_space() -> (AddressSpace, StoreId) {
    let mut space = AddressSpace::new(AddressSpaceConfig {
        phys_limit: HIGH_MEMORY_BASE,
        granule_shift: 14,
    })
    .unwrap();
    let ram = space.add_ram(Box::new(DenseMemory::new(HIGH_MEMORY_BASE).unwrap()));
    (space, ram)
}
