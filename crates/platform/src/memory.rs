use memory::{
    AddressSpace, AddressSpaceConfig, DenseMemory, GuestMemory, Initiator, RegionClass,
    RegionDesc, RegionId, Route, SparseMemory, StoreId, OPEN_BUS_BYTE,
};
use pcmem_pc_constants::{CONVENTIONAL_RAM_END, HIGH_MEMORY_BASE, RESET_VECTOR_FROM_TOP};

use crate::address_filter::AddressFilter;
use crate::chipset::A20GateHandle;
use crate::config::PlatformConfig;
use crate::error::{PlatformError, Result};

/// End of the system BIOS window (exclusive); the image is mapped so that it ends here.
pub const BIOS_ROM_END: u64 = HIGH_MEMORY_BASE;
/// Base address of a 64 KiB system BIOS image in the 20-bit real-mode window.
pub const BIOS_ROM_BASE: u64 = 0x000F_0000;
/// Size of a standard system BIOS image (64 KiB).
pub const BIOS_ROM_SIZE: usize = 0x10000;
/// Size of an extended (E000+F000) system BIOS image.
pub const BIOS_ROM_SIZE_128K: usize = 0x20000;

/// Masking only ever changes bits 20 and up, so a span inside one 1 MiB block stays linear.
const FILTER_BLOCK: u64 = HIGH_MEMORY_BASE;

/// Where the system BIOS image ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosRomMapping {
    pub store: StoreId,
    /// Copy ending at 1 MiB.
    pub low: RegionId,
    /// Copy at the top of the address bus; absent on a 20-bit bus where the two coincide.
    pub high: Option<RegionId>,
}

/// PC physical memory bus: the [`AddressSpace`] behind the chipset address filter.
///
/// Every CPU and bus-master access has the bus-width wrap and the A20 gate applied before it
/// reaches region matching. Main RAM starts out mapped as conventional memory (`0..640K`) and
/// extended memory (`1M..`); the hole in between belongs to the shadow, SMRAM and page-remap
/// controllers.
pub struct MemoryBus {
    filter: AddressFilter,
    space: AddressSpace,
    ram: StoreId,
    conventional: Option<RegionId>,
    extended: Option<RegionId>,
    bios: Option<BiosRomMapping>,
}

impl MemoryBus {
    /// Bus with `ram_size` bytes of dense RAM and the default policy granule.
    pub fn new(filter: AddressFilter, ram_size: u64) -> Result<Self> {
        let ram = DenseMemory::new(ram_size)?;
        Self::with_ram(filter, Box::new(ram), PlatformConfig::default().granule_shift)
    }

    pub fn from_config(filter: AddressFilter, config: &PlatformConfig) -> Result<Self> {
        let ram: Box<dyn GuestMemory> =
            if config.ram_size_bytes >= PlatformConfig::SPARSE_RAM_THRESHOLD_BYTES {
                Box::new(SparseMemory::new(config.ram_size_bytes)?)
            } else {
                Box::new(DenseMemory::new(config.ram_size_bytes)?)
            };
        Self::with_ram(filter, ram, config.granule_shift)
    }

    pub fn with_ram(
        filter: AddressFilter,
        ram: Box<dyn GuestMemory>,
        granule_shift: u32,
    ) -> Result<Self> {
        let ram_size = ram.size();
        if ram_size % 0x1000 != 0 {
            return Err(PlatformError::InvalidRamSize { size: ram_size });
        }
        let limit = filter.bus_width().limit();
        // The space signals the same bus as the A20 gate so the CPU sees one stream.
        let mut space = AddressSpace::with_invalidation(
            AddressSpaceConfig {
                phys_limit: limit,
                granule_shift,
            },
            filter.a20().invalidation().clone(),
        )?;
        let ram_store = space.add_ram(ram);

        let conventional_end = ram_size.min(CONVENTIONAL_RAM_END);
        let conventional = if conventional_end > 0 {
            Some(space.register_region(
                RegionDesc::direct(0, conventional_end, ram_store, 0).enabled(),
            )?)
        } else {
            None
        };

        let extended_end = ram_size.min(limit);
        let extended = if extended_end > HIGH_MEMORY_BASE {
            Some(
                space.register_region(
                    RegionDesc::direct(
                        HIGH_MEMORY_BASE,
                        extended_end - HIGH_MEMORY_BASE,
                        ram_store,
                        HIGH_MEMORY_BASE,
                    )
                    .enabled(),
                )?,
            )
        } else {
            None
        };

        tracing::debug!(bus = ?filter.bus_width(), "memory bus with {ram_size:#x} bytes of RAM");

        Ok(Self {
            filter,
            space,
            ram: ram_store,
            conventional,
            extended,
            bios: None,
        })
    }

    pub fn a20(&self) -> A20GateHandle {
        self.filter.a20()
    }

    pub fn filter(&self) -> &AddressFilter {
        &self.filter
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut AddressSpace {
        &mut self.space
    }

    pub fn ram_store(&self) -> StoreId {
        self.ram
    }

    /// Unfiltered view of main RAM for loaders and snapshots.
    pub fn ram(&self) -> Option<&dyn GuestMemory> {
        self.space.store(self.ram)
    }

    pub fn ram_mut(&mut self) -> Option<&mut dyn GuestMemory> {
        self.space.store_mut(self.ram)
    }

    /// The `0..640K` RAM region, if there is any RAM.
    pub fn conventional_region(&self) -> Option<RegionId> {
        self.conventional
    }

    /// The `1M..` RAM region, if RAM extends past 1 MiB.
    pub fn extended_region(&self) -> Option<RegionId> {
        self.extended
    }

    pub fn bios(&self) -> Option<BiosRomMapping> {
        self.bios
    }

    /// Reset vector as seen by the CPU on this bus (16 bytes below the top).
    pub fn reset_vector(&self) -> u64 {
        self.filter.bus_width().limit() - RESET_VECTOR_FROM_TOP
    }

    /// Maps the system BIOS so it ends at 1 MiB and, above a 20-bit bus, again at the top of
    /// the address space where the reset vector lives. Both copies are outer-bus regions; a
    /// previous mapping is replaced.
    pub fn map_system_bios_rom(&mut self, rom: &[u8]) -> Result<BiosRomMapping> {
        if rom.len() != BIOS_ROM_SIZE && rom.len() != BIOS_ROM_SIZE_128K {
            return Err(PlatformError::InvalidRom { len: rom.len() });
        }
        if let Some(old) = self.bios.take() {
            self.space.unregister(old.low);
            if let Some(high) = old.high {
                self.space.unregister(high);
            }
        }

        let len = rom.len() as u64;
        let store = self.space.add_rom(rom);
        let low = self.space.register_region(
            RegionDesc::direct(BIOS_ROM_END - len, len, store, 0)
                .class(RegionClass::External)
                .enabled(),
        )?;
        let high = if self.filter.bus_width().has_a20_gate() {
            let top = self.filter.bus_width().limit();
            Some(
                self.space.register_region(
                    RegionDesc::direct(top - len, len, store, 0)
                        .class(RegionClass::External)
                        .enabled(),
                )?,
            )
        } else {
            None
        };

        let mapping = BiosRomMapping { store, low, high };
        self.bios = Some(mapping);
        self.space.invalidate();
        Ok(mapping)
    }

    pub fn invalidate(&self) {
        self.space.invalidate();
    }

    /// CPU decode of a physical address as it leaves the core (before A20/bus-width masking).
    pub fn decode(&self, paddr: u64, width: usize, is_write: bool) -> Route {
        self.decode_for(Initiator::Cpu, paddr, width, is_write)
    }

    pub fn decode_for(
        &self,
        initiator: Initiator,
        paddr: u64,
        width: usize,
        is_write: bool,
    ) -> Route {
        self.space
            .decode_for(initiator, self.filter.filter(paddr), width, is_write)
    }

    /// Filtered [`AddressSpace::decode_span`]. The span never crosses a 1 MiB boundary.
    pub fn decode_span(&self, initiator: Initiator, paddr: u64, is_write: bool) -> (Route, u64) {
        let (route, span) = self
            .space
            .decode_span(initiator, self.filter.filter(paddr), is_write);
        (route, span.min(block_span(paddr, usize::MAX) as u64))
    }

    pub fn read_u8(&mut self, paddr: u64) -> u8 {
        self.read_sized(paddr, 1) as u8
    }

    pub fn read_u16(&mut self, paddr: u64) -> u16 {
        self.read_sized(paddr, 2) as u16
    }

    pub fn read_u32(&mut self, paddr: u64) -> u32 {
        self.read_sized(paddr, 4) as u32
    }

    pub fn write_u8(&mut self, paddr: u64, value: u8) {
        self.write_sized(paddr, 1, u64::from(value));
    }

    pub fn write_u16(&mut self, paddr: u64, value: u16) {
        self.write_sized(paddr, 2, u64::from(value));
    }

    pub fn write_u32(&mut self, paddr: u64, value: u32) {
        self.write_sized(paddr, 4, u64::from(value));
    }

    fn read_sized(&mut self, paddr: u64, size: usize) -> u64 {
        let addr = self.filter.filter(paddr);
        self.space.read_sized(Initiator::Cpu, addr, size)
    }

    fn write_sized(&mut self, paddr: u64, size: usize, value: u64) {
        let addr = self.filter.filter(paddr);
        self.space.write_sized(Initiator::Cpu, addr, size, value);
    }

    pub fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        self.read_filtered(Initiator::Cpu, paddr, buf);
    }

    pub fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        self.write_filtered(Initiator::Cpu, paddr, buf);
    }

    /// Bus-master read. DMA goes through the same address filter as the CPU.
    pub fn dma_read(&mut self, paddr: u64, buf: &mut [u8]) {
        self.read_filtered(Initiator::BusMaster, paddr, buf);
    }

    pub fn dma_write(&mut self, paddr: u64, buf: &[u8]) {
        self.write_filtered(Initiator::BusMaster, paddr, buf);
    }

    fn read_filtered(&mut self, initiator: Initiator, paddr: u64, dst: &mut [u8]) {
        let mask = self.filter.mask();
        let mut pos = 0usize;
        while pos < dst.len() {
            let Some(addr) = paddr.checked_add(pos as u64) else {
                dst[pos..].fill(OPEN_BUS_BYTE);
                break;
            };
            let len = block_span(addr, dst.len() - pos);
            self.space
                .read_bulk(initiator, addr & mask, &mut dst[pos..pos + len]);
            pos += len;
        }
    }

    fn write_filtered(&mut self, initiator: Initiator, paddr: u64, src: &[u8]) {
        let mask = self.filter.mask();
        let mut pos = 0usize;
        while pos < src.len() {
            let Some(addr) = paddr.checked_add(pos as u64) else {
                break;
            };
            let len = block_span(addr, src.len() - pos);
            self.space
                .write_bulk(initiator, addr & mask, &src[pos..pos + len]);
            pos += len;
        }
    }
}

/// Bytes from `addr` to the end of its 1 MiB block, capped at `remaining`.
#[inline]
fn block_span(addr: u64, remaining: usize) -> usize {
    let block_last = addr | (FILTER_BLOCK - 1);
    let max_len = (block_last - addr).saturating_add(1);
    max_len.min(remaining as u64) as usize
}

impl memory::MemoryBus for MemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        self.read_filtered(Initiator::Cpu, paddr, buf);
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        self.write_filtered(Initiator::Cpu, paddr, buf);
    }

    fn read_access(&mut self, paddr: u64, size: usize) -> u64 {
        self.read_sized(paddr, size)
    }

    fn write_access(&mut self, paddr: u64, size: usize, value: u64) {
        self.write_sized(paddr, size, value);
    }
}
