use std::ops::Range;

use crate::bus::MemoryBus;
use crate::invalidation::InvalidationBus;
use crate::mmio::MmioHandler;
use crate::phys::{DenseMemory, GuestMemory};
use crate::policy::{AccessPolicy, GranulePolicy, Initiator, PolicyLayer, PolicyTable};
use crate::region::{
    validate_direct, validate_range, Backing, MapError, Region, RegionDesc, RegionId, RegionInfo,
    RegionRegistry,
};

/// Value of every byte read from an unclaimed, disabled or out-of-range address.
pub const OPEN_BUS_BYTE: u8 = 0xFF;

/// Handle to a backing store owned by an [`AddressSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u32);

impl StoreId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct Store {
    mem: Box<dyn GuestMemory>,
    writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpaceConfig {
    /// Size of the decoded physical address space. Accesses at or above it are unclaimed.
    pub phys_limit: u64,
    /// log2 of the access-policy granule (12..=14).
    pub granule_shift: u32,
}

impl AddressSpaceConfig {
    pub const MAX_PHYS_LIMIT: u64 = 1 << 32;
}

impl Default for AddressSpaceConfig {
    fn default() -> Self {
        Self {
            phys_limit: Self::MAX_PHYS_LIMIT,
            granule_shift: 14,
        }
    }
}

/// Where a decoded access goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Index `store` linearly from `offset`.
    Direct {
        region: RegionId,
        store: StoreId,
        offset: u64,
    },
    /// Call the region's hooks with a region-relative `offset`.
    Hooks { region: RegionId, offset: u64 },
    /// Claimed, but the access would run past the end of the backing store.
    Dropped { region: RegionId },
    /// No eligible region: open bus.
    Unclaimed,
}

impl Route {
    pub fn region(&self) -> Option<RegionId> {
        match *self {
            Route::Direct { region, .. } | Route::Hooks { region, .. } => Some(region),
            Route::Dropped { region } => Some(region),
            Route::Unclaimed => None,
        }
    }
}

enum Chunk {
    Store { store: StoreId, offset: u64 },
    Hooks { region: RegionId, offset: u64 },
    OpenBus,
}

/// One emulated machine's physical address space.
///
/// Owns the backing stores, the region registry and the access-policy table, and routes every
/// physical access. For an address, the decoder considers the enabled regions covering it whose
/// class the granule's policy admits for the initiator (and, for writes, whose backing is
/// writable) and picks the one enabled most recently.
///
/// Sized accesses (`read_u16` etc.) resolve once from their first byte and index linearly into
/// the claimant's backing; an access that would run past the store is dropped whole. Bulk
/// accesses (`read_physical`) re-resolve at every region, granule and store boundary.
pub struct AddressSpace {
    limit: u64,
    stores: Vec<Store>,
    regions: RegionRegistry,
    policy: PolicyTable,
    invalidation: InvalidationBus,
}

impl AddressSpace {
    pub fn new(config: AddressSpaceConfig) -> Result<Self, MapError> {
        Self::with_invalidation(config, InvalidationBus::new())
    }

    /// Builds a space that signals an existing invalidation bus (e.g. one shared with the A20
    /// gate).
    pub fn with_invalidation(
        config: AddressSpaceConfig,
        invalidation: InvalidationBus,
    ) -> Result<Self, MapError> {
        if config.phys_limit > AddressSpaceConfig::MAX_PHYS_LIMIT {
            return Err(MapError::InvalidLimit {
                limit: config.phys_limit,
            });
        }
        let policy = PolicyTable::new(config.phys_limit, config.granule_shift)?;
        Ok(Self {
            limit: config.phys_limit,
            stores: Vec::new(),
            regions: RegionRegistry::new(config.phys_limit),
            policy,
            invalidation,
        })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn granule_size(&self) -> u64 {
        self.policy.granule_size()
    }

    // ---------------------------------------------------------------------------------------------
    // Stores
    // ---------------------------------------------------------------------------------------------

    pub fn add_ram(&mut self, mem: Box<dyn GuestMemory>) -> StoreId {
        self.push_store(mem, true)
    }

    /// Adds a read-only store holding a copy of `image`. Regions over it never claim writes.
    pub fn add_rom(&mut self, image: &[u8]) -> StoreId {
        self.push_store(Box::new(DenseMemory::from_bytes(image)), false)
    }

    fn push_store(&mut self, mem: Box<dyn GuestMemory>, writable: bool) -> StoreId {
        let id = StoreId(self.stores.len() as u32);
        let size = mem.size();
        tracing::debug!(store = id.0, writable, "added backing store of {size:#x} bytes");
        self.stores.push(Store { mem, writable });
        id
    }

    pub fn store(&self, id: StoreId) -> Option<&dyn GuestMemory> {
        self.stores.get(id.index()).map(|s| &*s.mem)
    }

    /// Raw store access for loaders and snapshotting; bypasses decode and write protection.
    pub fn store_mut(&mut self, id: StoreId) -> Option<&mut dyn GuestMemory> {
        match self.stores.get_mut(id.index()) {
            Some(store) => Some(&mut *store.mem),
            None => None,
        }
    }

    pub fn store_is_writable(&self, id: StoreId) -> bool {
        self.stores.get(id.index()).is_some_and(|s| s.writable)
    }

    // ---------------------------------------------------------------------------------------------
    // Regions
    // ---------------------------------------------------------------------------------------------

    pub fn register_region(&mut self, desc: RegionDesc) -> Result<RegionId, MapError> {
        validate_range(desc.base, desc.size, self.limit)?;
        self.validate_backing(desc.base, desc.size, &desc.backing)?;
        let (base, size, class, enabled) = (desc.base, desc.size, desc.class, desc.enabled);
        let id = self.regions.insert(desc);
        tracing::debug!(
            region = id.index(),
            enabled,
            "registered {class:?} region {base:#x}+{size:#x}"
        );
        Ok(id)
    }

    /// Removes a region for good. Does not invalidate.
    pub fn unregister(&mut self, id: RegionId) -> Option<Backing> {
        match self.regions.remove(id) {
            Some(region) => Some(region.backing),
            None => {
                tracing::warn!(region = id.index(), "unregister of unknown region");
                None
            }
        }
    }

    /// Marks `id` eligible for decoding. Idempotent; does not invalidate.
    #[inline]
    pub fn enable(&mut self, id: RegionId) {
        self.set_enabled(id, true);
    }

    /// Marks `id` ineligible for decoding. Idempotent; does not invalidate.
    #[inline]
    pub fn disable(&mut self, id: RegionId) {
        self.set_enabled(id, false);
    }

    pub fn set_enabled(&mut self, id: RegionId, enabled: bool) {
        match self.regions.set_enabled(id, enabled) {
            Some(true) => tracing::debug!(region = id.index(), enabled, "region toggled"),
            Some(false) => {}
            None => tracing::warn!(region = id.index(), enabled, "toggle of unknown region"),
        }
    }

    pub fn is_enabled(&self, id: RegionId) -> bool {
        self.regions.get(id).is_some_and(|r| r.enabled)
    }

    pub fn set_base(&mut self, id: RegionId, base: u64) -> Result<(), MapError> {
        let size = self.regions.get(id).ok_or(MapError::UnknownRegion(id))?.size;
        self.set_range(id, base, size)
    }

    pub fn set_range(&mut self, id: RegionId, base: u64, size: u64) -> Result<(), MapError> {
        let region = self.regions.get(id).ok_or(MapError::UnknownRegion(id))?;
        validate_range(base, size, self.limit)?;
        if let Backing::Direct { offset, .. } = region.backing {
            validate_direct(base, size, offset)?;
        }
        if region.base != base || region.size != size {
            self.regions.move_range(id, base, size);
        }
        Ok(())
    }

    /// Re-targets `id`, returning the previous backing.
    pub fn set_backing(&mut self, id: RegionId, backing: Backing) -> Result<Backing, MapError> {
        let region = self.regions.get(id).ok_or(MapError::UnknownRegion(id))?;
        self.validate_backing(region.base, region.size, &backing)?;
        let region = self
            .regions
            .get_mut(id)
            .ok_or(MapError::UnknownRegion(id))?;
        Ok(std::mem::replace(&mut region.backing, backing))
    }

    pub fn region(&self, id: RegionId) -> Option<RegionInfo> {
        self.regions.info(id)
    }

    pub fn regions(&self) -> impl Iterator<Item = (RegionId, RegionInfo)> + '_ {
        self.regions
            .iter()
            .filter_map(|(id, _)| self.regions.info(id).map(|info| (id, info)))
    }

    /// Enabled regions lying entirely inside `range`.
    pub fn regions_within(&self, range: Range<u64>) -> Vec<RegionId> {
        self.regions.enabled_within(range)
    }

    fn validate_backing(&self, base: u64, size: u64, backing: &Backing) -> Result<(), MapError> {
        if let Backing::Direct { store, offset } = *backing {
            validate_direct(base, size, offset)?;
            if self.stores.get(store.index()).is_none() {
                return Err(MapError::UnknownStore(store));
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Policy
    // ---------------------------------------------------------------------------------------------

    /// Overwrites the chipset-layer policy of every granule touched by `range`.
    pub fn set_policy(&mut self, range: Range<u64>, read: AccessPolicy, write: AccessPolicy) {
        self.policy
            .set(PolicyLayer::Chipset, range, GranulePolicy::new(read, write));
    }

    pub fn set_layer_policy(&mut self, layer: PolicyLayer, range: Range<u64>, policy: GranulePolicy) {
        self.policy.set(layer, range, policy);
    }

    pub fn clear_layer_policy(&mut self, layer: PolicyLayer, range: Range<u64>) {
        self.policy.clear(layer, range);
    }

    /// Effective policy of the granule holding `addr`.
    pub fn policy(&self, addr: u64) -> GranulePolicy {
        self.policy.effective(addr)
    }

    pub fn layer_policy(&self, layer: PolicyLayer, addr: u64) -> Option<GranulePolicy> {
        self.policy.layer(layer, addr)
    }

    // ---------------------------------------------------------------------------------------------
    // Invalidation
    // ---------------------------------------------------------------------------------------------

    pub fn invalidation(&self) -> &InvalidationBus {
        &self.invalidation
    }

    /// Signals the invalidation bus. Call once after a batch of map changes.
    pub fn invalidate(&self) {
        self.invalidation.invalidate();
    }

    // ---------------------------------------------------------------------------------------------
    // Decode
    // ---------------------------------------------------------------------------------------------

    /// CPU-initiated decode of a `width`-byte access starting at `addr`.
    #[inline]
    pub fn decode(&self, addr: u64, width: usize, is_write: bool) -> Route {
        self.decode_for(Initiator::Cpu, addr, width, is_write)
    }

    pub fn decode_for(
        &self,
        initiator: Initiator,
        addr: u64,
        width: usize,
        is_write: bool,
    ) -> Route {
        let Some((id, region)) = self.claimant(initiator, addr, is_write) else {
            return Route::Unclaimed;
        };
        match region.backing {
            Backing::Direct { store, offset } => {
                let size = self.stores.get(store.index()).map_or(0, |s| s.mem.size());
                let offset = offset.checked_add(addr - region.base);
                let fits = offset
                    .and_then(|o| o.checked_add(width as u64))
                    .is_some_and(|end| end <= size);
                if let (true, Some(offset)) = (fits, offset) {
                    Route::Direct {
                        region: id,
                        store,
                        offset,
                    }
                } else {
                    tracing::trace!(width, "access at {addr:#x} past end of backing store dropped");
                    Route::Dropped { region: id }
                }
            }
            Backing::Hooks(_) => Route::Hooks {
                region: id,
                offset: addr - region.base,
            },
        }
    }

    /// [`Self::decode_for`] of a one-byte access, plus how many bytes from `addr` are
    /// guaranteed to decode the same way. For callers that cache routes.
    pub fn decode_span(&self, initiator: Initiator, addr: u64, is_write: bool) -> (Route, u64) {
        let (_, span) = self.chunk_at(initiator, addr, is_write);
        (self.decode_for(initiator, addr, 1, is_write), span)
    }

    #[inline]
    fn claimant(
        &self,
        initiator: Initiator,
        addr: u64,
        is_write: bool,
    ) -> Option<(RegionId, &Region)> {
        if addr >= self.limit {
            return None;
        }
        let policy = self.policy.effective(addr).for_access(is_write);
        if policy == AccessPolicy::Disabled {
            return None;
        }
        let mut best: Option<(RegionId, &Region)> = None;
        for (id, region) in self.regions.bucket(addr) {
            if !self.eligible(region, policy, initiator, addr, is_write) {
                continue;
            }
            if best.map_or(true, |(_, b)| region.generation > b.generation) {
                best = Some((id, region));
            }
        }
        best
    }

    #[inline]
    fn eligible(
        &self,
        region: &Region,
        policy: AccessPolicy,
        initiator: Initiator,
        addr: u64,
        is_write: bool,
    ) -> bool {
        region.enabled
            && region.contains(addr)
            && policy.admits(region.class, initiator)
            && (!is_write || self.backing_writable(&region.backing))
    }

    fn backing_writable(&self, backing: &Backing) -> bool {
        match *backing {
            Backing::Direct { store, .. } => self.store_is_writable(store),
            Backing::Hooks(_) => true,
        }
    }

    /// Claimant of `addr` plus the number of bytes from `addr` over which that answer holds.
    fn chunk_at(&self, initiator: Initiator, addr: u64, is_write: bool) -> (Chunk, u64) {
        if addr >= self.limit {
            return (Chunk::OpenBus, u64::MAX);
        }
        let granule = self.granule_size();
        let mut end = ((addr / granule) + 1) * granule;
        end = end.min(RegionRegistry::bucket_end(addr)).min(self.limit);

        let policy = self.policy.effective(addr).for_access(is_write);
        let mut best: Option<(RegionId, &Region)> = None;
        for (id, region) in self.regions.bucket(addr) {
            if !region.enabled {
                continue;
            }
            // A region starting or ending inside the chunk may change the answer there.
            if region.base > addr {
                end = end.min(region.base);
            } else if region.end() > addr {
                end = end.min(region.end());
            }
            if policy != AccessPolicy::Disabled
                && self.eligible(region, policy, initiator, addr, is_write)
                && best.map_or(true, |(_, b)| region.generation > b.generation)
            {
                best = Some((id, region));
            }
        }

        let chunk = match best {
            None => Chunk::OpenBus,
            Some((id, region)) => match region.backing {
                Backing::Direct { store, offset } => match offset.checked_add(addr - region.base) {
                    Some(offset) => Chunk::Store { store, offset },
                    None => Chunk::OpenBus,
                },
                Backing::Hooks(_) => Chunk::Hooks {
                    region: id,
                    offset: addr - region.base,
                },
            },
        };
        (chunk, end - addr)
    }

    fn hooks_mut(&mut self, id: RegionId) -> Option<&mut dyn MmioHandler> {
        match &mut self.regions.get_mut(id)?.backing {
            Backing::Hooks(handler) => Some(handler.as_mut()),
            Backing::Direct { .. } => None,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Access
    // ---------------------------------------------------------------------------------------------

    /// Reads `size` (1..=8) bytes as one access, little-endian.
    pub fn read_sized(&mut self, initiator: Initiator, addr: u64, size: usize) -> u64 {
        debug_assert!((1..=8).contains(&size));
        match self.decode_for(initiator, addr, size, false) {
            Route::Direct { store, offset, .. } => {
                let mut buf = [0u8; 8];
                let ok = self
                    .store(store)
                    .is_some_and(|mem| mem.read_into(offset, &mut buf[..size]).is_ok());
                if ok {
                    u64::from_le_bytes(buf)
                } else {
                    open_bus(size)
                }
            }
            Route::Hooks { region, offset } => match self.hooks_mut(region) {
                Some(handler) => handler.read(offset, size) & open_bus(size),
                None => open_bus(size),
            },
            Route::Dropped { .. } | Route::Unclaimed => open_bus(size),
        }
    }

    /// Writes the low `size` (1..=8) bytes of `value` as one access.
    pub fn write_sized(&mut self, initiator: Initiator, addr: u64, size: usize, value: u64) {
        debug_assert!((1..=8).contains(&size));
        match self.decode_for(initiator, addr, size, true) {
            Route::Direct { store, offset, .. } => {
                if let Some(mem) = self.store_mut(store) {
                    let _ = mem.write_from(offset, &value.to_le_bytes()[..size]);
                }
            }
            Route::Hooks { region, offset } => {
                if let Some(handler) = self.hooks_mut(region) {
                    handler.write(offset, size, value & open_bus(size));
                }
            }
            Route::Dropped { .. } | Route::Unclaimed => {}
        }
    }

    /// Bus-master read; see [`Initiator::BusMaster`].
    pub fn dma_read(&mut self, paddr: u64, dst: &mut [u8]) {
        self.read_bulk(Initiator::BusMaster, paddr, dst);
    }

    pub fn dma_write(&mut self, paddr: u64, src: &[u8]) {
        self.write_bulk(Initiator::BusMaster, paddr, src);
    }

    pub fn read_bulk(&mut self, initiator: Initiator, paddr: u64, dst: &mut [u8]) {
        let mut pos = 0usize;
        while pos < dst.len() {
            let Some(addr) = paddr.checked_add(pos as u64) else {
                dst[pos..].fill(OPEN_BUS_BYTE);
                break;
            };
            let (chunk, span) = self.chunk_at(initiator, addr, false);
            let len = span.min((dst.len() - pos) as u64) as usize;
            let out = &mut dst[pos..pos + len];
            match chunk {
                Chunk::Store { store, offset } => self.read_store_chunk(store, offset, out),
                Chunk::Hooks { region, offset } => {
                    let Some(handler) = self.hooks_mut(region) else {
                        out.fill(OPEN_BUS_BYTE);
                        pos += len;
                        continue;
                    };
                    let mut done = 0usize;
                    while done < out.len() {
                        let size = mmio_piece(out.len() - done);
                        let value = handler.read(offset + done as u64, size);
                        out[done..done + size].copy_from_slice(&value.to_le_bytes()[..size]);
                        done += size;
                    }
                }
                Chunk::OpenBus => out.fill(OPEN_BUS_BYTE),
            }
            pos += len;
        }
    }

    pub fn write_bulk(&mut self, initiator: Initiator, paddr: u64, src: &[u8]) {
        let mut pos = 0usize;
        while pos < src.len() {
            let Some(addr) = paddr.checked_add(pos as u64) else {
                break;
            };
            let (chunk, span) = self.chunk_at(initiator, addr, true);
            let len = span.min((src.len() - pos) as u64) as usize;
            let data = &src[pos..pos + len];
            match chunk {
                Chunk::Store { store, offset } => self.write_store_chunk(store, offset, data),
                Chunk::Hooks { region, offset } => {
                    if let Some(handler) = self.hooks_mut(region) {
                        let mut done = 0usize;
                        while done < data.len() {
                            let size = mmio_piece(data.len() - done);
                            let mut bytes = [0u8; 8];
                            bytes[..size].copy_from_slice(&data[done..done + size]);
                            handler.write(offset + done as u64, size, u64::from_le_bytes(bytes));
                            done += size;
                        }
                    }
                }
                Chunk::OpenBus => {}
            }
            pos += len;
        }
    }

    fn read_store_chunk(&self, store: StoreId, offset: u64, out: &mut [u8]) {
        let Some(mem) = self.store(store) else {
            out.fill(OPEN_BUS_BYTE);
            return;
        };
        let avail = mem.size().saturating_sub(offset).min(out.len() as u64) as usize;
        let (inside, past) = out.split_at_mut(avail);
        if mem.read_into(offset, inside).is_err() {
            inside.fill(OPEN_BUS_BYTE);
        }
        if !past.is_empty() {
            tracing::trace!(
                store = store.0,
                dropped = past.len(),
                "bulk read at store offset {offset:#x} runs past end of backing store"
            );
            past.fill(OPEN_BUS_BYTE);
        }
    }

    fn write_store_chunk(&mut self, store: StoreId, offset: u64, data: &[u8]) {
        let Some(mem) = self.store_mut(store) else {
            return;
        };
        let avail = mem.size().saturating_sub(offset).min(data.len() as u64) as usize;
        let _ = mem.write_from(offset, &data[..avail]);
        if avail < data.len() {
            tracing::trace!(
                store = store.0,
                dropped = data.len() - avail,
                "bulk write at store offset {offset:#x} runs past end of backing store"
            );
        }
    }
}

impl MemoryBus for AddressSpace {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        self.read_bulk(Initiator::Cpu, paddr, buf);
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        self.write_bulk(Initiator::Cpu, paddr, buf);
    }

    fn read_access(&mut self, paddr: u64, size: usize) -> u64 {
        self.read_sized(Initiator::Cpu, paddr, size)
    }

    fn write_access(&mut self, paddr: u64, size: usize, value: u64) {
        self.write_sized(Initiator::Cpu, paddr, size, value);
    }
}

#[inline]
fn open_bus(size: usize) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    }
}

/// Largest MMIO access (8, 4, 2 or 1 bytes) that fits in `remaining`.
#[inline]
fn mmio_piece(remaining: usize) -> usize {
    match remaining {
        8.. => 8,
        4..=7 => 4,
        2..=3 => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionClass;

    fn space(limit: u64) -> AddressSpace {
        AddressSpace::new(AddressSpaceConfig {
            phys_limit: limit,
            granule_shift: 14,
        })
        .unwrap()
    }

    #[test]
    fn open_bus_masks() {
        assert_eq!(open_bus(1), 0xFF);
        assert_eq!(open_bus(2), 0xFFFF);
        assert_eq!(open_bus(4), 0xFFFF_FFFF);
        assert_eq!(open_bus(8), u64::MAX);
        assert_eq!(mmio_piece(13), 8);
        assert_eq!(mmio_piece(6), 4);
        assert_eq!(mmio_piece(3), 2);
    }

    #[test]
    fn registration_validates_backing() {
        let mut space = space(1 << 20);
        let ram = space.add_ram(Box::new(DenseMemory::new(0x1_0000).unwrap()));

        assert_eq!(
            space
                .register_region(RegionDesc::direct(0, 0x1000, StoreId(7), 0))
                .unwrap_err(),
            MapError::UnknownStore(StoreId(7))
        );
        assert!(matches!(
            space.register_region(RegionDesc::direct(0x800, 0x1000, ram, 0)),
            Err(MapError::Misaligned { .. })
        ));
        assert!(matches!(
            space.register_region(RegionDesc::direct(0xF_F000, 0x2000, ram, 0)),
            Err(MapError::BeyondLimit { .. })
        ));

        let id = space
            .register_region(RegionDesc::direct(0, 0x1000, ram, 0))
            .unwrap();
        assert!(!space.is_enabled(id));
        assert_eq!(
            space.region(id).unwrap().direct,
            Some((ram, 0)),
            "registration keeps the direct backing"
        );
    }

    #[test]
    fn rom_regions_never_claim_writes() {
        let mut space = space(1 << 20);
        let ram = space.add_ram(Box::new(DenseMemory::new(1 << 20).unwrap()));
        let rom = space.add_rom(&[0x5A; 0x1000]);

        let under = space
            .register_region(RegionDesc::direct(0, 1 << 20, ram, 0).enabled())
            .unwrap();
        let over = space
            .register_region(
                RegionDesc::direct(0xF_0000, 0x1000, rom, 0)
                    .class(RegionClass::External)
                    .enabled(),
            )
            .unwrap();

        assert_eq!(space.decode(0xF_0000, 1, false).region(), Some(over));
        assert_eq!(space.decode(0xF_0000, 1, true).region(), Some(under));

        space.write_u8(0xF_0000, 0x11);
        assert_eq!(space.read_u8(0xF_0000), 0x5A);
        assert_eq!(space.store(ram).unwrap().read_u8_le(0xF_0000).unwrap(), 0x11);
    }

    #[test]
    fn set_backing_retargets_without_reregistering() {
        let mut space = space(1 << 20);
        let ram = space.add_ram(Box::new(DenseMemory::new(0x2_0000).unwrap()));
        let id = space
            .register_region(RegionDesc::direct(0xD_0000, 0x4000, ram, 0).enabled())
            .unwrap();

        let old = space
            .set_backing(
                id,
                Backing::Direct {
                    store: ram,
                    offset: 0x1_4000,
                },
            )
            .unwrap();
        assert!(matches!(old, Backing::Direct { offset: 0, .. }));
        assert_eq!(
            space.decode(0xD_0010, 2, false),
            Route::Direct {
                region: id,
                store: ram,
                offset: 0x1_4010
            }
        );

        space.set_base(id, 0xE_0000).unwrap();
        assert_eq!(space.decode(0xD_0010, 1, false), Route::Unclaimed);
        assert_eq!(space.decode(0xE_0000, 1, false).region(), Some(id));
    }
}
