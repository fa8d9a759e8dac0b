use std::collections::BTreeMap;
use std::ops::Range;

use crate::region::{MapError, RegionClass};

/// Who is driving a physical access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Initiator {
    Cpu,
    /// DMA controllers and PCI bus masters.
    BusMaster,
}

/// Access policy of one granule, tracked separately for reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AccessPolicy {
    /// Power-on state: whichever enabled region was enabled last answers.
    #[default]
    Any,
    /// Served by chipset-local storage (RAM, shadow RAM, SMRAM).
    Internal,
    /// Served by the next outer bus (ROM, expansion cards), as seen by the CPU only.
    External,
    /// Served by the next outer bus for every initiator.
    ExternalAny,
    /// Reads float to all-ones, writes are dropped.
    Disabled,
}

impl AccessPolicy {
    /// Whether a region of `class` may claim an access made by `initiator` under this policy.
    #[inline]
    pub fn admits(self, class: RegionClass, initiator: Initiator) -> bool {
        match self {
            AccessPolicy::Any => true,
            AccessPolicy::Internal => {
                matches!(class, RegionClass::Internal | RegionClass::Neutral)
            }
            AccessPolicy::External => {
                initiator == Initiator::Cpu
                    && matches!(class, RegionClass::External | RegionClass::Neutral)
            }
            AccessPolicy::ExternalAny => {
                matches!(class, RegionClass::External | RegionClass::Neutral)
            }
            AccessPolicy::Disabled => false,
        }
    }
}

/// Read and write policy of one granule. Always written as a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GranulePolicy {
    pub read: AccessPolicy,
    pub write: AccessPolicy,
}

impl GranulePolicy {
    pub const ANY: Self = Self::new(AccessPolicy::Any, AccessPolicy::Any);

    pub const fn new(read: AccessPolicy, write: AccessPolicy) -> Self {
        Self { read, write }
    }

    #[inline]
    pub fn for_access(self, is_write: bool) -> AccessPolicy {
        if is_write {
            self.write
        } else {
            self.read
        }
    }
}

/// Owners of policy entries, in increasing precedence.
///
/// `Chipset` is the base state written by shadow recalculation. The overlay layers are set and
/// cleared by the page-remap and SMRAM controllers; clearing an overlay exposes whatever the
/// layers underneath currently say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyLayer {
    Chipset,
    PageRemap,
    Smram,
}

const OVERLAYS: [PolicyLayer; 2] = [PolicyLayer::Smram, PolicyLayer::PageRemap];

fn overlay_slot(layer: PolicyLayer) -> Option<usize> {
    match layer {
        PolicyLayer::Chipset => None,
        PolicyLayer::PageRemap => Some(0),
        PolicyLayer::Smram => Some(1),
    }
}

/// Per-granule access-policy table.
///
/// The effective policy of each granule is kept materialised in a dense array so the decoder
/// pays one index per access. It is recomputed from all layers for exactly the granules a
/// mutation touches.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    granule_shift: u32,
    chipset: Vec<GranulePolicy>,
    overlays: [BTreeMap<usize, GranulePolicy>; 2],
    effective: Vec<GranulePolicy>,
}

impl PolicyTable {
    pub const MIN_GRANULE_SHIFT: u32 = 12;
    pub const MAX_GRANULE_SHIFT: u32 = 14;

    pub fn new(limit: u64, granule_shift: u32) -> Result<Self, MapError> {
        if !(Self::MIN_GRANULE_SHIFT..=Self::MAX_GRANULE_SHIFT).contains(&granule_shift) {
            return Err(MapError::InvalidGranule {
                shift: granule_shift,
            });
        }
        let granule = 1u64 << granule_shift;
        if limit == 0 || limit % granule != 0 {
            return Err(MapError::InvalidLimit { limit });
        }
        let count = usize::try_from(limit >> granule_shift)
            .map_err(|_| MapError::InvalidLimit { limit })?;
        Ok(Self {
            granule_shift,
            chipset: vec![GranulePolicy::ANY; count],
            overlays: [BTreeMap::new(), BTreeMap::new()],
            effective: vec![GranulePolicy::ANY; count],
        })
    }

    #[inline]
    pub fn granule_size(&self) -> u64 {
        1 << self.granule_shift
    }

    pub fn granule_shift(&self) -> u32 {
        self.granule_shift
    }

    pub fn granule_count(&self) -> usize {
        self.effective.len()
    }

    /// Effective policy at `addr`. Addresses past the table read as [`GranulePolicy::ANY`].
    #[inline]
    pub fn effective(&self, addr: u64) -> GranulePolicy {
        usize::try_from(addr >> self.granule_shift)
            .ok()
            .and_then(|idx| self.effective.get(idx).copied())
            .unwrap_or(GranulePolicy::ANY)
    }

    /// The entry `layer` holds for `addr`, if any. The chipset layer always has one.
    pub fn layer(&self, layer: PolicyLayer, addr: u64) -> Option<GranulePolicy> {
        let idx = usize::try_from(addr >> self.granule_shift).ok()?;
        match overlay_slot(layer) {
            None => self.chipset.get(idx).copied(),
            Some(slot) => self.overlays[slot].get(&idx).copied(),
        }
    }

    /// Overwrites the `layer` entry of every granule touched by `range`.
    ///
    /// The range is widened outwards to whole granules and clamped to the table.
    pub fn set(&mut self, layer: PolicyLayer, range: Range<u64>, policy: GranulePolicy) {
        let granules = self.granule_span(&range);
        for idx in granules.clone() {
            match overlay_slot(layer) {
                None => self.chipset[idx] = policy,
                Some(slot) => {
                    self.overlays[slot].insert(idx, policy);
                }
            }
        }
        self.refresh(granules);
    }

    /// Removes the `layer` entries of `range`. For the chipset layer this resets to `Any`.
    pub fn clear(&mut self, layer: PolicyLayer, range: Range<u64>) {
        let granules = self.granule_span(&range);
        match overlay_slot(layer) {
            None => self.chipset[granules.clone()].fill(GranulePolicy::ANY),
            Some(slot) => {
                for idx in granules.clone() {
                    self.overlays[slot].remove(&idx);
                }
            }
        }
        self.refresh(granules);
    }

    fn granule_span(&self, range: &Range<u64>) -> Range<usize> {
        let count = self.effective.len();
        if range.start >= range.end {
            return 0..0;
        }
        let granule = self.granule_size();
        let first = (range.start >> self.granule_shift).min(count as u64) as usize;
        let last = range
            .end
            .checked_add(granule - 1)
            .map_or(u64::MAX >> self.granule_shift, |end| end >> self.granule_shift)
            .min(count as u64) as usize;
        first..last
    }

    fn refresh(&mut self, granules: Range<usize>) {
        for idx in granules {
            let overlay = OVERLAYS
                .iter()
                .filter_map(|&layer| overlay_slot(layer))
                .find_map(|slot| self.overlays[slot].get(&idx).copied());
            self.effective[idx] = overlay.unwrap_or(self.chipset[idx]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADOWED: GranulePolicy =
        GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::Disabled);
    const ROM: GranulePolicy = GranulePolicy::new(AccessPolicy::External, AccessPolicy::External);
    const INTERNAL: GranulePolicy =
        GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::Internal);

    #[test]
    fn external_is_cpu_only_but_external_any_is_not() {
        for class in [RegionClass::External, RegionClass::Neutral] {
            assert!(AccessPolicy::External.admits(class, Initiator::Cpu));
            assert!(!AccessPolicy::External.admits(class, Initiator::BusMaster));
            assert!(AccessPolicy::ExternalAny.admits(class, Initiator::BusMaster));
        }
        assert!(!AccessPolicy::ExternalAny.admits(RegionClass::Internal, Initiator::Cpu));
        assert!(!AccessPolicy::Internal.admits(RegionClass::External, Initiator::Cpu));
        assert!(!AccessPolicy::Disabled.admits(RegionClass::Neutral, Initiator::Cpu));
        assert!(AccessPolicy::Any.admits(RegionClass::External, Initiator::BusMaster));
    }

    #[test]
    fn set_widens_to_granules_and_clamps_to_limit() {
        let mut table = PolicyTable::new(0x10_0000, 14).unwrap();
        table.set(PolicyLayer::Chipset, 0xF_2000..0xF_4001, SHADOWED);

        assert_eq!(table.effective(0xEFFFF), GranulePolicy::ANY);
        assert_eq!(table.effective(0xF_0000), SHADOWED);
        assert_eq!(table.effective(0xF_7FFF), SHADOWED);
        assert_eq!(table.effective(0xF_8000), GranulePolicy::ANY);

        table.set(PolicyLayer::Chipset, 0xF_C000..u64::MAX, ROM);
        assert_eq!(table.effective(0xF_FFFF), ROM);
        assert_eq!(table.effective(0x20_0000), GranulePolicy::ANY);
    }

    #[test]
    fn overlays_take_precedence_and_clearing_restores_chipset_state() {
        let mut table = PolicyTable::new(0x10_0000, 14).unwrap();
        table.set(PolicyLayer::Chipset, 0xC_0000..0xD_0000, ROM);
        table.set(PolicyLayer::PageRemap, 0xC_0000..0xC_4000, INTERNAL);
        table.set(PolicyLayer::Smram, 0xC_0000..0xC_8000, SHADOWED);

        assert_eq!(table.effective(0xC_0000), SHADOWED);
        assert_eq!(table.effective(0xC_4000), SHADOWED);
        assert_eq!(table.effective(0xC_8000), ROM);

        table.clear(PolicyLayer::Smram, 0xC_0000..0xC_8000);
        assert_eq!(table.effective(0xC_0000), INTERNAL);
        assert_eq!(table.effective(0xC_4000), ROM);

        // Chipset writes underneath an overlay stay hidden until the overlay goes away.
        table.set(PolicyLayer::Chipset, 0xC_0000..0xC_4000, SHADOWED);
        assert_eq!(table.effective(0xC_0000), INTERNAL);
        assert_eq!(table.layer(PolicyLayer::Chipset, 0xC_0000), Some(SHADOWED));
        table.clear(PolicyLayer::PageRemap, 0xC_0000..0xC_4000);
        assert_eq!(table.effective(0xC_0000), SHADOWED);
        assert_eq!(table.layer(PolicyLayer::PageRemap, 0xC_0000), None);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert_eq!(
            PolicyTable::new(0x10_0000, 15).unwrap_err(),
            MapError::InvalidGranule { shift: 15 }
        );
        assert_eq!(
            PolicyTable::new(0x10_1000, 14).unwrap_err(),
            MapError::InvalidLimit { limit: 0x10_1000 }
        );
    }
}
