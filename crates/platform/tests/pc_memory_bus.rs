use memory::{GuestMemory, RegionClass, RegionDesc, Route};
use pcmem_pc_constants::{HIGH_MEMORY_BASE, SYSTEM_BIOS_BASE};
use pcmem_platform::memory::{MemoryBus, BIOS_ROM_BASE, BIOS_ROM_SIZE, BIOS_ROM_SIZE_128K};
use pcmem_platform::{
    A20Source, AddressBusWidth, AddressFilter, ChipsetState, PlatformConfig, PlatformError,
    TopRemap,
};
use std::sync::{Arc, Mutex};

const IOAPIC_MMIO_BASE: u64 = 0xFEC0_0000;

#[derive(Default)]
struct MmioState {
    mem: Vec<u8>,
    reads: Vec<(u64, usize)>,
    writes: Vec<(u64, usize, u64)>,
}

#[derive(Clone)]
struct RecordingMmio {
    state: Arc<Mutex<MmioState>>,
}

impl RecordingMmio {
    fn new(mem: Vec<u8>) -> (Self, Arc<Mutex<MmioState>>) {
        let state = Arc::new(Mutex::new(MmioState {
            mem,
            ..Default::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

impl memory::MmioHandler for RecordingMmio {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.reads.push((offset, size));

        let mut buf = [0xFFu8; 8];
        let off = offset as usize;
        for (i, dst) in buf.iter_mut().enumerate().take(size.min(8)) {
            *dst = state.mem.get(off + i).copied().unwrap_or(0xFF);
        }
        u64::from_le_bytes(buf)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        let mut state = self.state.lock().unwrap();
        state.writes.push((offset, size, value));

        let bytes = value.to_le_bytes();
        let off = offset as usize;
        for (i, &byte) in bytes.iter().enumerate().take(size.min(8)) {
            if let Some(dst) = state.mem.get_mut(off + i) {
                *dst = byte;
            }
        }
    }
}

fn new_bus_with_width(a20_enabled: bool, ram_size: u64, width: AddressBusWidth) -> MemoryBus {
    let chipset = ChipsetState::new(a20_enabled);
    let filter = AddressFilter::new(chipset.a20(), width);
    MemoryBus::new(filter, ram_size).unwrap()
}

fn new_bus(a20_enabled: bool, ram_size: u64) -> MemoryBus {
    new_bus_with_width(a20_enabled, ram_size, AddressBusWidth::Bits32)
}

fn counting_rom(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i & 0xFF) as u8).collect()
}

#[test]
fn bios_rom_aliasing_maps_reset_vector_at_top_of_4gib() {
    let mut bus = new_bus(true, 2 * 1024 * 1024);
    let rom = counting_rom(BIOS_ROM_SIZE);
    let mapping = bus.map_system_bios_rom(&rom).unwrap();
    assert!(mapping.high.is_some());
    assert_eq!(bus.reset_vector(), 0xFFFF_FFF0);

    let reset_off = (BIOS_ROM_SIZE - 16) as u64;
    let low_addr = BIOS_ROM_BASE + reset_off;

    let mut low = [0u8; 16];
    bus.read_physical(low_addr, &mut low);

    let mut high = [0u8; 16];
    bus.read_physical(bus.reset_vector(), &mut high);

    assert_eq!(high, low);
    assert_eq!(high, rom[reset_off as usize..reset_off as usize + 16]);
}

#[test]
fn bios_alias_follows_a_24_bit_bus() {
    let mut bus = new_bus_with_width(true, 1024 * 1024, AddressBusWidth::Bits24);
    bus.map_system_bios_rom(&counting_rom(BIOS_ROM_SIZE)).unwrap();

    assert_eq!(bus.reset_vector(), 0xFF_FFF0);
    assert_eq!(bus.read_u8(0xFF_FFF3), 0xF3);
    // Bits above the bus width wrap.
    assert_eq!(bus.read_u8(0x1FF_FFF3), 0xF3);
}

#[test]
fn xt_bios_has_a_single_copy() {
    let mut bus = new_bus_with_width(false, 640 * 1024, AddressBusWidth::Bits20);
    let mapping = bus.map_system_bios_rom(&counting_rom(BIOS_ROM_SIZE)).unwrap();
    assert!(mapping.high.is_none());
    assert_eq!(bus.reset_vector(), 0xF_FFF0);
    assert_eq!(bus.read_u8(0xF_FFF0), 0xF0);
}

#[test]
fn large_bios_images_start_at_e0000() {
    let mut bus = new_bus(true, 1024 * 1024);
    let mut rom = vec![0u8; BIOS_ROM_SIZE_128K];
    rom[0] = 0xE0;
    bus.map_system_bios_rom(&rom).unwrap();
    assert_eq!(bus.read_u8(SYSTEM_BIOS_BASE), 0xE0);

    assert_eq!(
        bus.map_system_bios_rom(&[0u8; 0x8000]),
        Err(PlatformError::InvalidRom { len: 0x8000 })
    );
}

#[test]
fn remapping_the_bios_replaces_the_previous_image() {
    let mut bus = new_bus(true, 1024 * 1024);
    bus.map_system_bios_rom(&vec![0x11; BIOS_ROM_SIZE]).unwrap();
    let regions = bus.space().regions().count();

    let epoch = bus.space().invalidation().epoch();
    bus.map_system_bios_rom(&vec![0x22; BIOS_ROM_SIZE]).unwrap();
    assert_eq!(bus.space().regions().count(), regions);
    assert_eq!(bus.space().invalidation().epoch(), epoch + 1);
    assert_eq!(bus.read_u8(BIOS_ROM_BASE), 0x22);
}

#[test]
fn rom_is_read_only_and_does_not_write_through_to_ram() {
    let mut bus = new_bus(true, 2 * 1024 * 1024);

    let addr = BIOS_ROM_BASE + 0x1234;
    bus.ram_mut().unwrap().write_u8_le(addr, 0xAA).unwrap();

    let mut rom = vec![0xFFu8; BIOS_ROM_SIZE];
    rom[0x1234] = 0x11;
    bus.map_system_bios_rom(&rom).unwrap();

    assert_eq!(bus.read_u8(addr), 0x11);
    bus.write_u8(addr, 0x55);
    assert_eq!(bus.read_u8(addr), 0x11);
    assert_eq!(bus.ram().unwrap().read_u8_le(addr).unwrap(), 0xAA);
}

#[test]
fn mmio_overrides_rom_and_ram() {
    let mut bus = new_bus(true, 2 * 1024 * 1024);
    let addr = 0x1000u64;

    bus.ram_mut()
        .unwrap()
        .write_from(addr, &[0x01, 0x02, 0x03, 0x04])
        .unwrap();
    let space = bus.space_mut();
    let rom = space.add_rom(&[0x10u8; 0x1000]);
    space
        .register_region(
            RegionDesc::direct(addr, 0x1000, rom, 0)
                .class(RegionClass::External)
                .enabled(),
        )
        .unwrap();

    let (mmio, mmio_state) = RecordingMmio::new(vec![0xAA, 0xBB, 0xCC, 0xDD]);
    space
        .register_region(RegionDesc::hooks(addr, 4, Box::new(mmio)).enabled())
        .unwrap();

    let mut readback = [0u8; 4];
    bus.read_physical(addr, &mut readback);
    assert_eq!(readback, [0xAA, 0xBB, 0xCC, 0xDD]);

    bus.write_physical(addr, &[0x11, 0x22, 0x33, 0x44]);

    let state = mmio_state.lock().unwrap();
    assert_eq!(state.writes.len(), 1);
    assert_eq!(state.mem, vec![0x11, 0x22, 0x33, 0x44]);
    drop(state);

    // Past the MMIO window the ROM answers again.
    assert_eq!(bus.read_u8(addr + 4), 0x10);

    let mut ram_view = [0u8; 4];
    bus.ram().unwrap().read_into(addr, &mut ram_view).unwrap();
    assert_eq!(ram_view, [0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn a20_masking_aliases_high_mmio_addresses() {
    let mut bus = new_bus(false, 2 * 1024 * 1024);

    bus.write_u8(0x0, 0xAA);
    assert_eq!(bus.read_u8(0x1_00000), 0xAA);

    bus.a20().set_source(A20Source::PortWrite, true);
    bus.write_u8(0x1_00000, 0xBB);
    assert_eq!(bus.read_u8(0x0), 0xAA);
    assert_eq!(bus.read_u8(0x1_00000), 0xBB);

    // Masking applies to every physical access, MMIO included.
    let mmio_alias = IOAPIC_MMIO_BASE | (1 << 20);
    let (mmio, mmio_state) = RecordingMmio::new(vec![0xDE, 0xAD, 0xBE, 0xEF]);
    bus.space_mut()
        .register_region(RegionDesc::hooks(IOAPIC_MMIO_BASE, 4, Box::new(mmio)).enabled())
        .unwrap();

    bus.a20().set_source(A20Source::PortWrite, false);
    let mut buf = [0u8; 4];
    bus.read_physical(mmio_alias, &mut buf);
    assert_eq!(buf, [0xDE, 0xAD, 0xBE, 0xEF]);

    bus.a20().set_source(A20Source::PortWrite, true);
    buf.fill(0);
    bus.read_physical(mmio_alias, &mut buf);
    assert_eq!(buf, [0xFF; 4]);

    let state = mmio_state.lock().unwrap();
    assert_eq!(state.reads, vec![(0, 4)]);
}

#[test]
fn a20_masking_does_not_apply_to_direct_ram_backend_access() {
    let mut bus = new_bus(false, 2 * 1024 * 1024);

    let ram = bus.ram_mut().unwrap();
    ram.write_u8_le(0x0, 0x11).unwrap();
    ram.write_u8_le(0x1_00000, 0x22).unwrap();

    assert_eq!(bus.read_u8(0x0), 0x11);
    assert_eq!(bus.read_u8(0x1_00000), 0x11);

    assert_eq!(bus.ram().unwrap().read_u8_le(0x1_00000).unwrap(), 0x22);

    bus.write_u8(0x1_00000, 0x33);
    assert_eq!(bus.ram().unwrap().read_u8_le(0x0).unwrap(), 0x33);
    assert_eq!(bus.ram().unwrap().read_u8_le(0x1_00000).unwrap(), 0x22);
}

#[test]
fn bulk_access_wraps_at_the_megabyte_while_a20_is_off() {
    let mut bus = new_bus(false, 2 * 1024 * 1024);
    let ram = bus.ram_mut().unwrap();
    ram.write_u8_le(0xF_FFFF, 0x01).unwrap();
    ram.write_u8_le(0x0, 0x02).unwrap();
    ram.write_u8_le(HIGH_MEMORY_BASE, 0x03).unwrap();

    let mut buf = [0u8; 2];
    bus.read_physical(0xF_FFFF, &mut buf);
    assert_eq!(buf, [0x01, 0x02]);

    bus.dma_read(0xF_FFFF, &mut buf);
    assert_eq!(buf, [0x01, 0x02]);

    bus.a20().set_source(A20Source::KeyboardFastGate, true);
    bus.read_physical(0xF_FFFF, &mut buf);
    assert_eq!(buf, [0x01, 0x03]);
}

#[test]
fn decode_reports_the_filtered_route() {
    let bus = new_bus(false, 2 * 1024 * 1024);
    let conventional = bus.conventional_region().unwrap();
    assert_eq!(
        bus.decode(0x10_0010, 1, false),
        Route::Direct {
            region: conventional,
            store: bus.ram_store(),
            offset: 0x10,
        }
    );
    assert!(bus.extended_region().is_some());
    assert_eq!(bus.decode(0xA_0000, 1, false), Route::Unclaimed);
}

#[test]
fn small_machines_have_no_extended_region() {
    let bus = new_bus(false, 512 * 1024);
    assert!(bus.extended_region().is_none());
    assert_eq!(
        bus.space()
            .region(bus.conventional_region().unwrap())
            .unwrap()
            .size,
        512 * 1024
    );
}

#[test]
fn ram_size_must_be_page_granular() {
    let chipset = ChipsetState::new(false);
    let filter = AddressFilter::new(chipset.a20(), AddressBusWidth::Bits32);
    assert!(matches!(
        MemoryBus::new(filter, 0x1_0001),
        Err(PlatformError::InvalidRamSize { size: 0x1_0001 })
    ));
}

#[test]
fn large_configs_use_sparse_ram() {
    let config = PlatformConfig {
        a20_enabled_at_reset: true,
        ..PlatformConfig::at_386(PlatformConfig::SPARSE_RAM_THRESHOLD_BYTES)
    };
    let chipset = ChipsetState::new(config.a20_enabled_at_reset);
    let filter = AddressFilter::new(chipset.a20(), config.bus_width);
    let mut bus = MemoryBus::from_config(filter, &config).unwrap();

    bus.write_u32(0x1000_0000, 0xCAFE_F00D);
    assert_eq!(bus.read_u32(0x1000_0000), 0xCAFE_F00D);
    assert_eq!(
        bus.ram().unwrap().size(),
        PlatformConfig::SPARSE_RAM_THRESHOLD_BYTES
    );
}

#[test]
fn top_remap_exposes_the_ram_behind_the_hole() {
    let mut bus = new_bus(true, 2 * 1024 * 1024);
    bus.ram_mut().unwrap().write_u8_le(0xA_0010, 0x77).unwrap();

    let ram = bus.ram_store();
    let mut remap = TopRemap::new(bus.space_mut(), ram).unwrap();
    assert_eq!(remap.base(), 2 * 1024 * 1024);
    assert_eq!(bus.read_u8(0x20_0010), 0xFF);

    remap.set(bus.space_mut(), 384).unwrap();
    assert_eq!(remap.size(), 384 * 1024);
    assert_eq!(bus.read_u8(0x20_0010), 0x77);

    remap.set(bus.space_mut(), 0).unwrap();
    assert_eq!(bus.read_u8(0x20_0010), 0xFF);
}

#[test]
fn top_remap_can_reach_past_the_hole() {
    let mut bus = new_bus(true, 2 * 1024 * 1024);
    bus.ram_mut().unwrap().write_u8_le(0x10_0010, 0x5A).unwrap();

    let ram = bus.ram_store();
    let mut remap = TopRemap::new(bus.space_mut(), ram).unwrap();
    remap.set(bus.space_mut(), 1024).unwrap();
    assert_eq!(remap.size(), 1024 * 1024);
    // 384 KiB into the window is RAM offset 1 MiB, the same byte seen at 0x10_0010.
    assert_eq!(bus.read_u8(0x20_0000 + 0x6_0010), 0x5A);

    remap.set(bus.space_mut(), 4096).unwrap();
    assert_eq!(remap.size(), 2 * 1024 * 1024 - 640 * 1024);
}

#[test]
fn top_remap_is_capped_by_hidden_ram() {
    let mut bus = new_bus(true, 768 * 1024);
    let ram = bus.ram_store();
    let mut remap = TopRemap::new(bus.space_mut(), ram).unwrap();
    assert_eq!(remap.base(), HIGH_MEMORY_BASE);

    remap.set(bus.space_mut(), 384).unwrap();
    assert_eq!(remap.size(), 128 * 1024);

    let mut tiny = new_bus(true, 640 * 1024);
    let ram = tiny.ram_store();
    let mut remap = TopRemap::new(tiny.space_mut(), ram).unwrap();
    assert!(remap.region().is_none());
    remap.set(tiny.space_mut(), 384).unwrap();
    assert_eq!(remap.size(), 0);
}
