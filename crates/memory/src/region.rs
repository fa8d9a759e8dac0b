use std::fmt;
use std::ops::Range;

use thiserror::Error;

use crate::mmio::MmioHandler;
use crate::space::StoreId;

/// Alignment required of direct-backed regions (base, size and store offset).
pub(crate) const DIRECT_ALIGN: u64 = 0x1000;

/// Regions are indexed in 1 MiB buckets; a lookup only scans the bucket of the address.
const BUCKET_SHIFT: u32 = 20;

/// Errors raised while registering or re-targeting regions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("region size must be non-zero")]
    ZeroSize,
    #[error("region 0x{base:x}+0x{size:x} overflows the address space")]
    AddressOverflow { base: u64, size: u64 },
    #[error("region end 0x{end:x} lies beyond the physical limit 0x{limit:x}")]
    BeyondLimit { end: u64, limit: u64 },
    #[error("direct region 0x{base:x}+0x{size:x} (store offset 0x{offset:x}) is not {align}-byte aligned")]
    Misaligned {
        base: u64,
        size: u64,
        offset: u64,
        align: u64,
    },
    #[error("unknown backing store {0:?}")]
    UnknownStore(StoreId),
    #[error("unknown region {0:?}")]
    UnknownRegion(RegionId),
    #[error("policy granule shift {shift} is outside 12..=14")]
    InvalidGranule { shift: u32 },
    #[error("physical limit 0x{limit:x} is not a non-zero multiple of the granule up to 4 GiB")]
    InvalidLimit { limit: u64 },
}

/// Handle to a registered region. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u32);

impl RegionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Which side of the chipset a region lives on; matched against the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionClass {
    /// Chipset-local storage: main RAM, shadow RAM, SMRAM, remapped pages.
    Internal,
    /// Storage on the outer bus: BIOS/option ROMs, memory on expansion cards.
    External,
    /// Devices that answer whichever side the policy selects (e.g. VGA MMIO).
    Neutral,
}

/// What answers an access once a region claims it.
pub enum Backing {
    /// Linear window into a store: physical `base + n` maps to store offset `offset + n`.
    Direct { store: StoreId, offset: u64 },
    Hooks(Box<dyn MmioHandler>),
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Direct { store, offset } => f
                .debug_struct("Direct")
                .field("store", store)
                .field("offset", &format_args!("{offset:#x}"))
                .finish(),
            Backing::Hooks(_) => f.write_str("Hooks(..)"),
        }
    }
}

/// Registration request for [`crate::AddressSpace::register_region`].
#[derive(Debug)]
pub struct RegionDesc {
    pub base: u64,
    pub size: u64,
    pub class: RegionClass,
    pub backing: Backing,
    pub enabled: bool,
}

impl RegionDesc {
    /// Internal, initially disabled window onto `store` starting at `offset`.
    pub fn direct(base: u64, size: u64, store: StoreId, offset: u64) -> Self {
        Self {
            base,
            size,
            class: RegionClass::Internal,
            backing: Backing::Direct { store, offset },
            enabled: false,
        }
    }

    /// Neutral, initially disabled hook region.
    pub fn hooks(base: u64, size: u64, handler: Box<dyn MmioHandler>) -> Self {
        Self {
            base,
            size,
            class: RegionClass::Neutral,
            backing: Backing::Hooks(handler),
            enabled: false,
        }
    }

    #[must_use]
    pub fn class(mut self, class: RegionClass) -> Self {
        self.class = class;
        self
    }

    #[must_use]
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }
}

/// Snapshot of a region's state, for controllers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub base: u64,
    pub size: u64,
    pub class: RegionClass,
    pub enabled: bool,
    /// Enable order; the highest generation among eligible regions wins.
    pub generation: u64,
    /// `(store, offset)` for direct regions, `None` for hooks.
    pub direct: Option<(StoreId, u64)>,
}

impl RegionInfo {
    pub fn end(&self) -> u64 {
        self.base + self.size
    }
}

pub(crate) struct Region {
    pub(crate) base: u64,
    pub(crate) size: u64,
    pub(crate) class: RegionClass,
    pub(crate) backing: Backing,
    pub(crate) enabled: bool,
    pub(crate) generation: u64,
}

impl Region {
    #[inline]
    pub(crate) fn end(&self) -> u64 {
        self.base + self.size
    }

    #[inline]
    pub(crate) fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }

    fn info(&self) -> RegionInfo {
        RegionInfo {
            base: self.base,
            size: self.size,
            class: self.class,
            enabled: self.enabled,
            generation: self.generation,
            direct: match self.backing {
                Backing::Direct { store, offset } => Some((store, offset)),
                Backing::Hooks(_) => None,
            },
        }
    }
}

/// Checks the geometry of a region against the physical limit.
pub(crate) fn validate_range(base: u64, size: u64, limit: u64) -> Result<(), MapError> {
    if size == 0 {
        return Err(MapError::ZeroSize);
    }
    let end = base
        .checked_add(size)
        .ok_or(MapError::AddressOverflow { base, size })?;
    if end > limit {
        return Err(MapError::BeyondLimit { end, limit });
    }
    Ok(())
}

/// Checks the alignment rule for direct backings, and that the store offsets stay addressable.
pub(crate) fn validate_direct(base: u64, size: u64, offset: u64) -> Result<(), MapError> {
    if offset.checked_add(size).is_none() {
        return Err(MapError::AddressOverflow { base: offset, size });
    }
    if (base | size | offset) & (DIRECT_ALIGN - 1) != 0 {
        return Err(MapError::Misaligned {
            base,
            size,
            offset,
            align: DIRECT_ALIGN,
        });
    }
    Ok(())
}

/// Region storage plus the bucket index the decoder scans.
///
/// Enabling a disabled region stamps it with the next generation. Already-enabled regions keep
/// theirs, so `enable` stays idempotent; callers re-prioritise a region by disabling it first.
pub(crate) struct RegionRegistry {
    slots: Vec<Option<Region>>,
    buckets: Vec<Vec<RegionId>>,
    next_generation: u64,
}

impl RegionRegistry {
    pub(crate) fn new(limit: u64) -> Self {
        let bucket_count = (limit.saturating_sub(1) >> BUCKET_SHIFT) as usize + 1;
        Self {
            slots: Vec::new(),
            buckets: vec![Vec::new(); bucket_count],
            next_generation: 1,
        }
    }

    pub(crate) fn insert(&mut self, desc: RegionDesc) -> RegionId {
        let id = RegionId(self.slots.len() as u32);
        let mut region = Region {
            base: desc.base,
            size: desc.size,
            class: desc.class,
            backing: desc.backing,
            enabled: false,
            generation: 0,
        };
        if desc.enabled {
            region.enabled = true;
            region.generation = self.bump();
        }
        self.index(id, region.base, region.end());
        self.slots.push(Some(region));
        id
    }

    pub(crate) fn remove(&mut self, id: RegionId) -> Option<Region> {
        let region = self.slots.get_mut(id.index())?.take()?;
        self.unindex(id, region.base, region.end());
        Some(region)
    }

    #[inline]
    pub(crate) fn get(&self, id: RegionId) -> Option<&Region> {
        self.slots.get(id.index())?.as_ref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub(crate) fn info(&self, id: RegionId) -> Option<RegionInfo> {
        self.get(id).map(Region::info)
    }

    /// Returns whether the flag changed.
    pub(crate) fn set_enabled(&mut self, id: RegionId, enabled: bool) -> Option<bool> {
        let generation = self.next_generation;
        let region = self.get_mut(id)?;
        if region.enabled == enabled {
            return Some(false);
        }
        region.enabled = enabled;
        if enabled {
            region.generation = generation;
            self.next_generation += 1;
        }
        Some(true)
    }

    pub(crate) fn move_range(&mut self, id: RegionId, base: u64, size: u64) -> Option<()> {
        let region = self.get(id)?;
        let (old_base, old_end) = (region.base, region.end());
        self.unindex(id, old_base, old_end);
        let region = self.get_mut(id)?;
        region.base = base;
        region.size = size;
        self.index(id, base, base + size);
        Some(())
    }

    /// Candidate regions for `addr`: everything registered in its bucket.
    #[inline]
    pub(crate) fn bucket(&self, addr: u64) -> impl Iterator<Item = (RegionId, &Region)> + '_ {
        let ids = self
            .buckets
            .get((addr >> BUCKET_SHIFT) as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        ids.iter()
            .filter_map(move |&id| self.get(id).map(|region| (id, region)))
    }

    /// End of the bucket containing `addr`.
    #[inline]
    pub(crate) fn bucket_end(addr: u64) -> u64 {
        ((addr >> BUCKET_SHIFT) + 1) << BUCKET_SHIFT
    }

    /// Enabled regions lying entirely inside `range`.
    pub(crate) fn enabled_within(&self, range: Range<u64>) -> Vec<RegionId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let region = slot.as_ref()?;
                (region.enabled && region.base >= range.start && region.end() <= range.end)
                    .then_some(RegionId(idx as u32))
            })
            .collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (RegionId, &Region)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|region| (RegionId(idx as u32), region)))
    }

    fn bump(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn bucket_range(&self, base: u64, end: u64) -> Range<usize> {
        let first = (base >> BUCKET_SHIFT) as usize;
        let last = ((end - 1) >> BUCKET_SHIFT) as usize + 1;
        first.min(self.buckets.len())..last.min(self.buckets.len())
    }

    fn index(&mut self, id: RegionId, base: u64, end: u64) {
        for bucket in self.bucket_range(base, end) {
            self.buckets[bucket].push(id);
        }
    }

    fn unindex(&mut self, id: RegionId, base: u64, end: u64) {
        for bucket in self.bucket_range(base, end) {
            self.buckets[bucket].retain(|&other| other != id);
        }
    }
}
