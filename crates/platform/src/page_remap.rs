use std::ops::Range;

use memory::{
    AccessPolicy, AddressSpace, Backing, GranulePolicy, PolicyLayer, RegionDesc, RegionId, StoreId,
};

use crate::error::{PlatformError, Result};

/// Geometry of an EMS-style page-remap bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRemapLayout {
    pub name: &'static str,
    /// CPU-visible base of each slot.
    pub slot_bases: Vec<u64>,
    pub page_size: u64,
    /// Width of the page number the chipset latches; higher bits are ignored.
    pub page_bits: u32,
    /// Whether the bank's EMS mode is on before software touches it.
    pub active_at_reset: bool,
}

/// Snapshot of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRemapSlot {
    pub base: u64,
    pub enabled: bool,
    pub page: u32,
    /// The slot currently answers for its window.
    pub mapped: bool,
}

#[derive(Debug)]
struct Slot {
    region: RegionId,
    enabled: bool,
    page: u32,
    mapped: bool,
    displaced: Vec<RegionId>,
}

/// Fixed set of windows that can each be pointed at any page of a backing store.
///
/// A slot answers for its window while the bank is active, the slot is enabled and its page fits
/// the store. Mapping a slot disables the regions lying inside its window (shadow RAM, option
/// ROMs) and puts an internal-only overlay on the window; unmapping undoes both.
#[derive(Debug)]
pub struct PageRemapBank {
    layout: PageRemapLayout,
    store: StoreId,
    page_base: u64,
    store_size: u64,
    active: bool,
    slots: Vec<Slot>,
}

impl PageRemapBank {
    /// Registers one region per slot over `store`, with page 0 at `page_base`.
    pub fn new(
        space: &mut AddressSpace,
        layout: PageRemapLayout,
        store: StoreId,
        page_base: u64,
    ) -> Result<Self> {
        if layout.page_size == 0 || layout.page_size % space.granule_size() != 0 {
            return Err(PlatformError::InvalidLayout {
                what: layout.name,
                reason: "page size must be a whole number of policy granules",
            });
        }
        if layout.page_bits == 0 || layout.page_bits > 16 {
            return Err(PlatformError::InvalidLayout {
                what: layout.name,
                reason: "page numbers must be 1 to 16 bits wide",
            });
        }
        let store_size = space
            .store(store)
            .map(|m| m.size())
            .ok_or(memory::MapError::UnknownStore(store))?;

        let mut slots = Vec::with_capacity(layout.slot_bases.len());
        for &base in &layout.slot_bases {
            if base % space.granule_size() != 0 {
                return Err(PlatformError::InvalidWindow {
                    base,
                    size: layout.page_size,
                    reason: "slot is not granule aligned",
                });
            }
            let region = space.register_region(RegionDesc::direct(
                base,
                layout.page_size,
                store,
                page_base,
            ))?;
            slots.push(Slot {
                region,
                enabled: false,
                page: 0,
                mapped: false,
                displaced: Vec::new(),
            });
        }

        tracing::debug!(
            bank = layout.name,
            slots = slots.len(),
            "page-remap bank attached"
        );
        Ok(Self {
            active: layout.active_at_reset,
            layout,
            store,
            page_base,
            store_size,
            slots,
        })
    }

    pub fn layout(&self) -> &PageRemapLayout {
        &self.layout
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Result<PageRemapSlot> {
        let slot = self
            .slots
            .get(index)
            .ok_or(PlatformError::UnknownSlot { index })?;
        Ok(PageRemapSlot {
            base: self.layout.slot_bases[index],
            enabled: slot.enabled,
            page: slot.page,
            mapped: slot.mapped,
        })
    }

    pub fn slot_region(&self, index: usize) -> Result<RegionId> {
        self.slots
            .get(index)
            .map(|s| s.region)
            .ok_or(PlatformError::UnknownSlot { index })
    }

    /// Store offset of `page`, or `None` when the page does not fit the store.
    pub fn page_offset(&self, page: u32) -> Option<u64> {
        let offset = self
            .page_base
            .checked_add(u64::from(page).checked_mul(self.layout.page_size)?)?;
        (offset.checked_add(self.layout.page_size)? <= self.store_size).then_some(offset)
    }

    /// Latches a slot's enable and page registers, then invalidates once.
    pub fn set_slot(
        &mut self,
        space: &mut AddressSpace,
        index: usize,
        enabled: bool,
        page: u32,
    ) -> Result<()> {
        let page = page & ((1u32 << self.layout.page_bits) - 1);
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PlatformError::UnknownSlot { index })?;
        slot.enabled = enabled;
        slot.page = page;
        self.apply(space, index)?;
        space.invalidate();
        Ok(())
    }

    /// Turns the bank's EMS mode on or off, then invalidates once.
    pub fn set_mode(&mut self, space: &mut AddressSpace, active: bool) -> Result<()> {
        if self.active != active {
            tracing::debug!(bank = self.layout.name, active, "page-remap mode changed");
        }
        self.active = active;
        for index in 0..self.slots.len() {
            self.apply(space, index)?;
        }
        space.invalidate();
        Ok(())
    }

    fn window(&self, index: usize) -> Range<u64> {
        let base = self.layout.slot_bases[index];
        base..base + self.layout.page_size
    }

    fn apply(&mut self, space: &mut AddressSpace, index: usize) -> Result<()> {
        let window = self.window(index);
        let slot = &self.slots[index];
        let offset = if self.active && slot.enabled {
            let offset = self.page_offset(slot.page);
            if offset.is_none() {
                tracing::debug!(
                    bank = self.layout.name,
                    slot = index,
                    page = slot.page,
                    "page beyond backing store, slot unmapped"
                );
            }
            offset
        } else {
            None
        };

        match offset {
            Some(offset) => self.map(space, index, window, offset),
            None => {
                self.unmap(space, index, window);
                Ok(())
            }
        }
    }

    fn map(
        &mut self,
        space: &mut AddressSpace,
        index: usize,
        window: Range<u64>,
        offset: u64,
    ) -> Result<()> {
        let own: Vec<RegionId> = self.slots.iter().map(|s| s.region).collect();
        let slot = &mut self.slots[index];
        space.set_backing(
            slot.region,
            Backing::Direct {
                store: self.store,
                offset,
            },
        )?;

        if !slot.mapped {
            // Losing side first, then the slot, so it ranks above anything left underneath.
            for id in space.regions_within(window.clone()) {
                if !own.contains(&id) {
                    space.disable(id);
                    slot.displaced.push(id);
                }
            }
            space.enable(slot.region);
            space.set_layer_policy(
                PolicyLayer::PageRemap,
                window.clone(),
                GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::Internal),
            );
            slot.mapped = true;
        }

        tracing::debug!(
            bank = self.layout.name,
            slot = index,
            page = slot.page,
            "slot at {:#x} mapped to store offset {offset:#x}",
            window.start
        );
        Ok(())
    }

    fn unmap(&mut self, space: &mut AddressSpace, index: usize, window: Range<u64>) {
        let slot = &mut self.slots[index];
        if !slot.mapped {
            return;
        }
        space.disable(slot.region);
        space.clear_layer_policy(PolicyLayer::PageRemap, window.clone());
        for id in slot.displaced.drain(..) {
            if space.region(id).is_some() {
                space.enable(id);
            }
        }
        slot.mapped = false;
        tracing::debug!(
            bank = self.layout.name,
            slot = index,
            "slot at {:#x} unmapped",
            window.start
        );
    }
}
