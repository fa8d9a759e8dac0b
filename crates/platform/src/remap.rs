use memory::{AddressSpace, RegionDesc, RegionId, StoreId};
use pcmem_pc_constants::{CONVENTIONAL_RAM_END, HIGH_MEMORY_BASE};

use crate::error::Result;

/// Relocation of the RAM hidden behind the legacy hole to the top of memory.
///
/// Chipsets that can't shadow the whole `A0000..100000` hole expose (part of) the RAM behind it
/// right above the end of installed memory instead. The window reads RAM linearly from 640 KiB
/// on, so it may run past the hole into RAM that is also visible above 1 MiB.
#[derive(Debug)]
pub struct TopRemap {
    region: Option<RegionId>,
    base: u64,
    max_size: u64,
    size: u64,
}

impl TopRemap {
    /// Registers the (disabled) remap region. RAM of 640 KiB or less, or RAM that already fills
    /// the bus, leaves nothing to remap.
    pub fn new(space: &mut AddressSpace, ram: StoreId) -> Result<Self> {
        let ram_size = space
            .store(ram)
            .map(|m| m.size())
            .ok_or(memory::MapError::UnknownStore(ram))?;
        let base = ram_size.max(HIGH_MEMORY_BASE);
        let hidden = ram_size.saturating_sub(CONVENTIONAL_RAM_END);
        let max_size = hidden.min(space.limit().saturating_sub(base)) & !0xFFF;

        let region = if max_size > 0 {
            Some(space.register_region(RegionDesc::direct(
                base,
                max_size,
                ram,
                CONVENTIONAL_RAM_END,
            ))?)
        } else {
            None
        };
        Ok(Self {
            region,
            base,
            max_size,
            size: 0,
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Bytes currently remapped.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn region(&self) -> Option<RegionId> {
        self.region
    }

    /// Exposes up to `kb` KiB of the hidden RAM; `0` turns the remap off. Invalidates once.
    pub fn set(&mut self, space: &mut AddressSpace, kb: u64) -> Result<()> {
        let Some(region) = self.region else {
            return Ok(());
        };
        let size = kb.saturating_mul(1024).min(self.max_size) & !0xFFF;
        if size == 0 {
            space.disable(region);
        } else {
            space.set_range(region, self.base, size)?;
            space.enable(region);
        }
        if size != self.size {
            tracing::debug!("top-of-memory remap at {:#x}: {size:#x} bytes", self.base);
        }
        self.size = size;
        space.invalidate();
        Ok(())
    }
}
