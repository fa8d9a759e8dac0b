use std::ops::Range;

use memory::{
    AccessPolicy, AddressSpace, Backing, DenseMemory, GranulePolicy, PolicyLayer, RegionDesc,
    RegionId, StoreId,
};
use pcmem_pc_constants::{SMRAM_DEFAULT_BASE, SMRAM_DEFAULT_SIZE};

use crate::cpu::{CpuMode, CpuModeSource};
use crate::error::{PlatformError, Result};

/// Where SMRAM contents live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmramStorage {
    /// Windows alias main RAM; `host_base` is a RAM offset.
    MainRam(StoreId),
    /// A dedicated store of `size` bytes; `host_base` indexes into it.
    Separate { size: u64 },
}

/// One SMRAM window as the chipset registers describe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmramWindow {
    pub host_base: u64,
    pub visible_base: u64,
    pub size: u64,
    /// Window readable while the CPU is not in SMM.
    pub read_outside_smm: bool,
    /// Window writable while the CPU is not in SMM.
    pub write_outside_smm: bool,
}

impl SmramWindow {
    /// A window hidden outside SMM.
    pub const fn smm_only(host_base: u64, visible_base: u64, size: u64) -> Self {
        Self {
            host_base,
            visible_base,
            size,
            read_outside_smm: false,
            write_outside_smm: false,
        }
    }

    /// A window that also works as ordinary RAM outside SMM.
    pub const fn open(host_base: u64, visible_base: u64, size: u64) -> Self {
        Self {
            host_base,
            visible_base,
            size,
            read_outside_smm: true,
            write_outside_smm: true,
        }
    }

    fn range(&self) -> Range<u64> {
        self.visible_base..self.visible_base + self.size
    }

    fn policy(&self, in_smm: bool) -> GranulePolicy {
        let side = |open: bool| {
            if in_smm || open {
                AccessPolicy::Internal
            } else {
                AccessPolicy::ExternalAny
            }
        };
        GranulePolicy::new(side(self.read_outside_smm), side(self.write_outside_smm))
    }
}

/// Manages a fixed set of relocatable SMRAM windows.
///
/// Windows are reconfigured as a group: [`Self::disable_all`], then [`Self::enable`] for each
/// window of the new set. Where active windows overlap, the one enabled last answers. Whether the
/// CPU is in SMM is pushed in from outside with [`Self::set_smm`].
#[derive(Debug)]
pub struct SmramController {
    store: StoreId,
    store_size: u64,
    regions: Vec<RegionId>,
    windows: Vec<Option<SmramWindow>>,
    /// Active window indices, oldest enable first.
    order: Vec<usize>,
    in_smm: bool,
}

impl SmramController {
    pub fn new(space: &mut AddressSpace, count: usize, storage: SmramStorage) -> Result<Self> {
        let store = match storage {
            SmramStorage::MainRam(store) => store,
            SmramStorage::Separate { size } => {
                if size == 0 || size % 0x1000 != 0 {
                    return Err(PlatformError::InvalidLayout {
                        what: "smram",
                        reason: "separate SMRAM must be a non-zero multiple of 4 KiB",
                    });
                }
                space.add_ram(Box::new(DenseMemory::new(size)?))
            }
        };
        let store_size = space
            .store(store)
            .map(|m| m.size())
            .ok_or(memory::MapError::UnknownStore(store))?;

        let mut regions = Vec::with_capacity(count);
        for _ in 0..count {
            regions.push(space.register_region(RegionDesc::direct(
                SMRAM_DEFAULT_BASE,
                SMRAM_DEFAULT_SIZE,
                store,
                0,
            ))?);
        }
        tracing::debug!(
            count,
            separate = matches!(storage, SmramStorage::Separate { .. }),
            "SMRAM controller attached"
        );

        Ok(Self {
            store,
            store_size,
            regions,
            windows: vec![None; count],
            order: Vec::new(),
            in_smm: false,
        })
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    pub fn window_count(&self) -> usize {
        self.regions.len()
    }

    pub fn window(&self, index: usize) -> Result<Option<SmramWindow>> {
        self.windows
            .get(index)
            .copied()
            .ok_or(PlatformError::UnknownWindow { index })
    }

    pub fn window_region(&self, index: usize) -> Result<RegionId> {
        self.regions
            .get(index)
            .copied()
            .ok_or(PlatformError::UnknownWindow { index })
    }

    pub fn in_smm(&self) -> bool {
        self.in_smm
    }

    /// Disables every window and drops the SMRAM policy overlay, then invalidates once.
    pub fn disable_all(&mut self, space: &mut AddressSpace) {
        for index in std::mem::take(&mut self.order) {
            if let Some(window) = self.windows[index].take() {
                space.clear_layer_policy(PolicyLayer::Smram, window.range());
            }
        }
        for &region in &self.regions {
            space.disable(region);
        }
        self.windows.iter_mut().for_each(|w| *w = None);
        tracing::debug!("SMRAM windows disabled");
        space.invalidate();
    }

    /// Positions window `index` and makes it the newest active window, then invalidates once.
    pub fn enable(
        &mut self,
        space: &mut AddressSpace,
        index: usize,
        window: SmramWindow,
    ) -> Result<()> {
        let region = self.window_region(index)?;
        let in_store = window
            .host_base
            .checked_add(window.size)
            .is_some_and(|end| end <= self.store_size);
        if window.size == 0 || !in_store {
            return Err(PlatformError::InvalidWindow {
                base: window.host_base,
                size: window.size,
                reason: "outside the SMRAM store",
            });
        }
        if (window.host_base | window.visible_base | window.size) & 0xFFF != 0 {
            return Err(PlatformError::InvalidWindow {
                base: window.visible_base,
                size: window.size,
                reason: "not 4 KiB aligned",
            });
        }
        let visible = window
            .visible_base
            .checked_add(window.size)
            .is_some_and(|end| end <= space.limit());
        if !visible {
            return Err(PlatformError::InvalidWindow {
                base: window.visible_base,
                size: window.size,
                reason: "beyond the physical address limit",
            });
        }

        // Nothing below can fail for a window that passed the checks above.
        // Disabling first makes the following enable rank this window above everything else.
        space.disable(region);
        if let Some(old) = self.windows[index].take() {
            space.clear_layer_policy(PolicyLayer::Smram, old.range());
        }
        self.order.retain(|&i| i != index);

        space.set_range(region, window.visible_base, window.size)?;
        space.set_backing(
            region,
            Backing::Direct {
                store: self.store,
                offset: window.host_base,
            },
        )?;
        space.enable(region);

        self.windows[index] = Some(window);
        self.order.push(index);
        self.apply_overlays(space);

        tracing::debug!(
            window = index,
            in_smm = self.in_smm,
            "SMRAM window {:#x}+{:#x} -> host {:#x}",
            window.visible_base,
            window.size,
            window.host_base
        );
        space.invalidate();
        Ok(())
    }

    /// Disables a single window, then invalidates once.
    pub fn disable(&mut self, space: &mut AddressSpace, index: usize) -> Result<()> {
        let region = self.window_region(index)?;
        space.disable(region);
        if let Some(old) = self.windows[index].take() {
            space.clear_layer_policy(PolicyLayer::Smram, old.range());
        }
        self.order.retain(|&i| i != index);
        // Overlapping windows may have lost part of their overlay.
        self.apply_overlays(space);
        space.invalidate();
        Ok(())
    }

    /// Tells the controller whether the CPU is in SMM. Invalidates only when that changes.
    pub fn set_smm(&mut self, space: &mut AddressSpace, in_smm: bool) {
        if self.in_smm == in_smm {
            return;
        }
        self.in_smm = in_smm;
        self.apply_overlays(space);
        tracing::debug!(in_smm, "SMRAM visibility recomputed");
        space.invalidate();
    }

    /// Pulls the CPU mode from `cpu` and applies it as [`Self::set_smm`] would.
    pub fn sync_with(&mut self, space: &mut AddressSpace, cpu: &dyn CpuModeSource) {
        self.set_smm(space, cpu.effective_mode() == CpuMode::Smm);
    }

    fn apply_overlays(&self, space: &mut AddressSpace) {
        for &index in &self.order {
            if let Some(window) = self.windows[index] {
                space.set_layer_policy(
                    PolicyLayer::Smram,
                    window.range(),
                    window.policy(self.in_smm),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_window_only_opens_in_smm() {
        let w = SmramWindow::smm_only(0x3_0000, 0xA_0000, 0x2_0000);
        assert_eq!(
            w.policy(false),
            GranulePolicy::new(AccessPolicy::ExternalAny, AccessPolicy::ExternalAny)
        );
        assert_eq!(
            w.policy(true),
            GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::Internal)
        );

        let half = SmramWindow {
            write_outside_smm: false,
            ..SmramWindow::open(0, 0xA_0000, 0x1_0000)
        };
        assert_eq!(
            half.policy(false),
            GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::ExternalAny)
        );
    }
}
