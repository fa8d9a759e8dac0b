use pcmem::memory::{
    AccessPolicy, AddressSpace, AddressSpaceConfig, DenseMemory, GuestMemory, Initiator,
    MemoryBus as _, RegionClass, RegionDesc, Route,
};
use pcmem::platform::chipsets::{intel_4x0_pam, intel_pam, lim_ems_board};
use pcmem::platform::{
    A20Source, BitRef, PageRemapBank, PolicyRule, ShadowController, ShadowLayout,
    ShadowWindowDesc, SmramController, SmramStorage, SmramWindow,
};
use pcmem::pc_constants::{BIOS_SEGMENT_BASE, HIGH_MEMORY_BASE};
use pcmem::{Platform, PlatformConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn rom_image() -> Vec<u8> {
    (0..0x1_0000u32).map(|i| i as u8).collect()
}

/// 384 KiB of RAM mapped at 0 out of a 1 MiB store, plus a 64 KiB BIOS ROM at F0000.
fn ram_and_rom() -> (AddressSpace, pcmem::memory::StoreId, pcmem::memory::RegionId) {
    let mut space = AddressSpace::new(AddressSpaceConfig {
        phys_limit: HIGH_MEMORY_BASE,
        granule_shift: 14,
    })
    .unwrap();
    let ram = space.add_ram(Box::new(DenseMemory::new(HIGH_MEMORY_BASE).unwrap()));
    let rom = space.add_rom(&rom_image());
    space
        .register_region(RegionDesc::direct(0, 384 * 1024, ram, 0).enabled())
        .unwrap();
    let rom_region = space
        .register_region(
            RegionDesc::direct(BIOS_SEGMENT_BASE, 0x1_0000, rom, 0)
                .class(RegionClass::External)
                .enabled(),
        )
        .unwrap();
    (space, ram, rom_region)
}

#[test]
fn scenario_1_unshadowed_bios_reads_from_rom() {
    init_tracing();
    let (mut space, _, rom_region) = ram_and_rom();

    match space.decode(0xF_0010, 1, false) {
        Route::Direct { region, offset, .. } => {
            assert_eq!(region, rom_region);
            assert_eq!(offset, 0x10);
        }
        other => panic!("unexpected route {other:?}"),
    }
    assert_eq!(space.read_u8(0xF_0010), 0x10);
}

#[test]
fn scenario_2_read_only_shadow_discards_writes() {
    init_tracing();
    let (mut space, ram, rom_region) = ram_and_rom();
    space
        .store_mut(ram)
        .unwrap()
        .write_u8_le(0xF_0010, 0xAB)
        .unwrap();

    let layout = ShadowLayout {
        name: "bios-shadow",
        windows: vec![ShadowWindowDesc::new(
            BIOS_SEGMENT_BASE,
            0x1_0000,
            BitRef::set(0, 0x01),
            BitRef::set(0, 0x02),
        )],
        rule: PolicyRule::WRITE_PROTECT,
        overrides: Vec::new(),
    };
    let mut shadow = ShadowController::new(&mut space, ram, layout).unwrap();
    let shadow_region = shadow.window_region(0).unwrap();

    // Window off: still the ROM.
    assert_eq!(space.decode(0xF_0010, 1, false).region(), Some(rom_region));

    let before = space.invalidation().epoch();
    shadow.recalc(&mut space, &[0x01]);
    assert_eq!(space.invalidation().epoch(), before + 1);
    let policy = space.policy(0xF_0010);
    assert_eq!(policy.read, AccessPolicy::Internal);
    assert_eq!(policy.write, AccessPolicy::Disabled);

    assert_eq!(
        space.decode(0xF_0010, 1, false),
        Route::Direct {
            region: shadow_region,
            store: ram,
            offset: 0xF_0010,
        }
    );
    assert_eq!(space.decode(0xF_0010, 1, true), Route::Unclaimed);

    space.write_sized(Initiator::Cpu, 0xF_0010, 1, 0x55);
    assert_eq!(space.read_u8(0xF_0010), 0xAB);
    assert_eq!(space.store(ram).unwrap().read_u8_le(0xF_0010).unwrap(), 0xAB);
}

#[test]
fn scenario_3_a20_wraps_until_any_source_asserts() {
    init_tracing();
    let mut platform = Platform::new(PlatformConfig::at_386(16 * 1024 * 1024)).unwrap();
    let a20 = platform.a20();
    a20.set_source(A20Source::KeyboardFastGate, false);
    assert!(!a20.enabled());

    assert_eq!(
        platform.memory.decode(0x10_0010, 1, false),
        platform.memory.decode(0x00_0010, 1, false)
    );
    platform.memory.write_u8(0x10_0010, 0x5A);
    assert_eq!(platform.memory.read_u8(0x00_0010), 0x5A);

    let before = platform.memory.space().invalidation().epoch();
    a20.set_source(A20Source::ChipsetAlternate, true);
    assert_eq!(platform.memory.space().invalidation().epoch(), before + 1);

    let high = platform.memory.decode(0x10_0010, 1, false);
    assert_ne!(high, platform.memory.decode(0x00_0010, 1, false));
    assert!(matches!(high, Route::Direct { offset: 0x10_0010, .. }));
}

#[test]
fn scenario_4_smram_windows_follow_enable_order() {
    init_tracing();
    let mut platform = Platform::new(PlatformConfig::at_386(16 * 1024 * 1024)).unwrap();
    let ram = platform.memory.ram_store();
    let space = platform.memory.space_mut();
    let mut smram = SmramController::new(space, 2, SmramStorage::MainRam(ram)).unwrap();

    smram.disable_all(space);
    smram
        .enable(space, 0, SmramWindow::open(0x4_0000, 0xA_0000, 0x2_0000))
        .unwrap();
    assert_eq!(
        space.decode(0xA_0010, 1, false),
        Route::Direct {
            region: smram.window_region(0).unwrap(),
            store: ram,
            offset: 0x4_0010,
        }
    );

    smram
        .enable(space, 1, SmramWindow::open(0x6_0000, 0xA_0000, 0x1_0000))
        .unwrap();
    assert_eq!(
        space.decode(0xA_0010, 1, false),
        Route::Direct {
            region: smram.window_region(1).unwrap(),
            store: ram,
            offset: 0x6_0010,
        }
    );
    // The part window 1 doesn't cover still belongs to window 0.
    assert!(matches!(
        space.decode(0xB_0010, 1, false),
        Route::Direct {
            offset: 0x5_0010,
            ..
        }
    ));
}

#[test]
fn scenario_5_page_remap_slot_displaces_shadow_ram() {
    init_tracing();
    let mut platform = Platform::new(PlatformConfig::at_386(16 * 1024 * 1024)).unwrap();
    let ram = platform.memory.ram_store();
    let space = platform.memory.space_mut();

    let mut shadow = ShadowController::new(space, ram, intel_4x0_pam()).unwrap();
    let mut regs = [0u8; 0x60];
    // PAM4 low nibble: D8000 read/write RAM.
    regs[intel_pam::PAM1 + 3] = 0x03;
    shadow.recalc(space, &regs);
    let shadow_region = shadow.window_region(6).unwrap();
    assert_eq!(space.region(shadow_region).unwrap().base, 0xD_8000);

    let mut bank = PageRemapBank::new(space, lim_ems_board(0xD_0000), ram, HIGH_MEMORY_BASE)
        .unwrap();
    let slot_base = bank.slot(2).unwrap().base;
    assert_eq!(slot_base, 0xD_8000);

    bank.set_slot(space, 2, true, 5).unwrap();
    assert_eq!(
        space.decode(slot_base, 1, false),
        Route::Direct {
            region: bank.slot_region(2).unwrap(),
            store: ram,
            offset: HIGH_MEMORY_BASE + 5 * 0x4000,
        }
    );
    assert!(!space.is_enabled(shadow_region));

    bank.set_slot(space, 2, false, 5).unwrap();
    assert!(space.is_enabled(shadow_region));
    assert_eq!(
        space.decode(slot_base, 1, false),
        Route::Direct {
            region: shadow_region,
            store: ram,
            offset: 0xD_8000,
        }
    );
}
