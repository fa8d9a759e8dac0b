use std::ops::Range;

use memory::{
    AccessPolicy, AddressSpace, GranulePolicy, PolicyLayer, RegionDesc, RegionId, StoreId,
};

use crate::error::{PlatformError, Result};

/// One bit (or group of bits) in a chipset register file.
///
/// Registers past the end of the file read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRef {
    pub reg: usize,
    pub mask: u8,
    /// Holds when the masked bits are all clear instead of any set.
    pub active_low: bool,
}

impl BitRef {
    pub const fn set(reg: usize, mask: u8) -> Self {
        Self {
            reg,
            mask,
            active_low: false,
        }
    }

    pub const fn clear(reg: usize, mask: u8) -> Self {
        Self {
            reg,
            mask,
            active_low: true,
        }
    }

    #[inline]
    pub fn test(self, regs: &[u8]) -> bool {
        let value = regs.get(self.reg).copied().unwrap_or(0);
        (value & self.mask != 0) != self.active_low
    }
}

/// A shadowable window and the register bits that enable RAM reads and writes in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowWindowDesc {
    pub base: u64,
    pub size: u64,
    pub read: BitRef,
    pub write: BitRef,
}

impl ShadowWindowDesc {
    pub const fn new(base: u64, size: u64, read: BitRef, write: BitRef) -> Self {
        Self {
            base,
            size,
            read,
            write,
        }
    }

    pub fn range(&self) -> Range<u64> {
        self.base..self.base + self.size
    }
}

/// How a chipset turns (read enable, write enable) into access policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRule {
    pub off: GranulePolicy,
    pub read_only: GranulePolicy,
    pub write_only: GranulePolicy,
    pub read_write: GranulePolicy,
}

impl PolicyRule {
    /// RAM replaces the outer bus for whichever directions are enabled.
    pub const STANDARD: Self = Self {
        off: GranulePolicy::new(AccessPolicy::ExternalAny, AccessPolicy::ExternalAny),
        read_only: GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::ExternalAny),
        write_only: GranulePolicy::new(AccessPolicy::ExternalAny, AccessPolicy::Internal),
        read_write: GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::Internal),
    };

    /// Like [`Self::STANDARD`], but a read-only shadow discards writes instead of passing them
    /// on to the ROM side.
    pub const WRITE_PROTECT: Self = Self {
        read_only: GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::Disabled),
        ..Self::STANDARD
    };

    pub fn resolve(&self, read: bool, write: bool) -> GranulePolicy {
        match (read, write) {
            (false, false) => self.off,
            (true, false) => self.read_only,
            (false, true) => self.write_only,
            (true, true) => self.read_write,
        }
    }
}

/// A chipset-wide mode that decides some windows outright.
///
/// Overrides are tried in order before any per-window bits; the first whose conditions all hold
/// for a window wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalOverride {
    pub when: Vec<BitRef>,
    /// Bit `i` selects window `i`.
    pub windows: u64,
    pub policy: GranulePolicy,
}

impl GlobalOverride {
    fn applies(&self, index: usize, regs: &[u8]) -> bool {
        index < 64 && self.windows & (1 << index) != 0 && self.when.iter().all(|b| b.test(regs))
    }
}

/// Declarative description of one chipset family's shadow RAM control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowLayout {
    pub name: &'static str,
    pub windows: Vec<ShadowWindowDesc>,
    pub rule: PolicyRule,
    pub overrides: Vec<GlobalOverride>,
}

impl ShadowLayout {
    /// Policy of window `index` under register state `regs`.
    pub fn policy_for(&self, index: usize, regs: &[u8]) -> Option<GranulePolicy> {
        let window = self.windows.get(index)?;
        if let Some(o) = self.overrides.iter().find(|o| o.applies(index, regs)) {
            return Some(o.policy);
        }
        Some(
            self.rule
                .resolve(window.read.test(regs), window.write.test(regs)),
        )
    }

    /// Bitmask covering every window of this layout.
    pub fn all_windows(&self) -> u64 {
        match self.windows.len() {
            n if n >= 64 => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }

    fn validate(&self, granule: u64) -> Result<()> {
        if self.windows.len() > 64 {
            return Err(PlatformError::InvalidLayout {
                what: self.name,
                reason: "more than 64 windows",
            });
        }
        for w in &self.windows {
            if w.size == 0 || w.base % granule != 0 || w.size % granule != 0 {
                return Err(PlatformError::InvalidWindow {
                    base: w.base,
                    size: w.size,
                    reason: "not a whole number of policy granules",
                });
            }
        }
        Ok(())
    }
}

/// Shared shadow RAM engine driven by a [`ShadowLayout`].
///
/// Each window gets a RAM region over the same addresses of the RAM store, always enabled; what
/// a window shows is decided entirely by the chipset-layer policy that [`Self::recalc`] writes.
/// Power-on state is every window off (ROM side).
#[derive(Debug)]
pub struct ShadowController {
    layout: ShadowLayout,
    regions: Vec<RegionId>,
    current: Vec<GranulePolicy>,
}

impl ShadowController {
    pub fn new(space: &mut AddressSpace, ram: StoreId, layout: ShadowLayout) -> Result<Self> {
        layout.validate(space.granule_size())?;
        let ram_size = space.store(ram).map_or(0, |m| m.size());

        let mut regions = Vec::with_capacity(layout.windows.len());
        for w in &layout.windows {
            if w.base + w.size > ram_size {
                return Err(PlatformError::InvalidWindow {
                    base: w.base,
                    size: w.size,
                    reason: "no RAM behind the window",
                });
            }
            regions.push(space.register_region(
                RegionDesc::direct(w.base, w.size, ram, w.base).enabled(),
            )?);
        }

        for w in &layout.windows {
            space.set_layer_policy(PolicyLayer::Chipset, w.range(), layout.rule.off);
        }
        space.invalidate();

        tracing::debug!(
            chipset = layout.name,
            windows = layout.windows.len(),
            "shadow controller attached"
        );
        let current = vec![layout.rule.off; layout.windows.len()];
        Ok(Self {
            layout,
            regions,
            current,
        })
    }

    pub fn layout(&self) -> &ShadowLayout {
        &self.layout
    }

    pub fn window_count(&self) -> usize {
        self.layout.windows.len()
    }

    pub fn window_region(&self, index: usize) -> Result<RegionId> {
        self.regions
            .get(index)
            .copied()
            .ok_or(PlatformError::UnknownWindow { index })
    }

    /// Policy most recently applied to window `index`.
    pub fn window_policy(&self, index: usize) -> Result<GranulePolicy> {
        self.current
            .get(index)
            .copied()
            .ok_or(PlatformError::UnknownWindow { index })
    }

    /// Recomputes every window from the full register file and applies the result, then
    /// invalidates once.
    pub fn recalc(&mut self, space: &mut AddressSpace, regs: &[u8]) {
        for (index, window) in self.layout.windows.iter().enumerate() {
            let policy = self
                .layout
                .policy_for(index, regs)
                .unwrap_or(self.layout.rule.off);
            space.set_layer_policy(PolicyLayer::Chipset, window.range(), policy);
            if self.current[index] != policy {
                tracing::debug!(
                    chipset = self.layout.name,
                    window = index,
                    read = ?policy.read,
                    write = ?policy.write,
                    "shadow window {:#x}+{:#x} changed",
                    window.base,
                    window.size
                );
            }
            self.current[index] = policy;
        }
        space.invalidate();
    }
}
