//! Register layouts of the chipset families the shared controllers know how to drive.
//!
//! Shadow layouts index the chipset's own register file: PCI configuration space offsets for
//! the Intel and VIA north bridges, configuration index registers for SCAMP.

use memory::{AccessPolicy, GranulePolicy};
use pcmem_pc_constants::{EXPANSION_ROM_BASE, SHADOW_GRANULE, SYSTEM_BIOS_BASE};

use crate::page_remap::PageRemapLayout;
use crate::shadow::{BitRef, GlobalOverride, PolicyRule, ShadowLayout, ShadowWindowDesc};

/// Intel 430/440 PAM registers.
pub mod intel_pam {
    pub const PAM0: usize = 0x59;
    pub const PAM1: usize = 0x5A;
    pub const PAM6: usize = 0x5F;
}

/// VIA Apollo shadow RAM control registers.
pub mod via_apollo {
    pub const SHADOW_C: usize = 0x61;
    pub const SHADOW_D: usize = 0x62;
    pub const SHADOW_EF: usize = 0x63;
}

/// VLSI SCAMP configuration registers.
pub mod scamp {
    pub const RAMMAP: usize = 0x03;
    pub const EMSEN1: usize = 0x0B;
    pub const EMSEN2: usize = 0x0C;
    pub const CAXS: usize = 0x0F;
    pub const DAXS: usize = 0x10;
    pub const FEAXS: usize = 0x11;

    /// 386 remap mode; turns every shadow window off.
    pub const RAMMAP_REMP386: u8 = 1 << 4;
    /// EMS windows at A000/B000/D000 instead of C000/D000/E000.
    pub const EMSEN1_EMSMAP: u8 = 1 << 4;
    pub const EMSEN1_EMSENAB: u8 = 1 << 7;

    pub const EMS_WINDOWS: usize = 12;
}

const EMS_PAGE: u64 = 0x4000;
const K32: u64 = 0x8000;
const K64: u64 = 0x1_0000;

/// Intel 430FX..440BX: one PAM nibble per window, bit 0 read, bit 1 write.
///
/// `0x59` high nibble covers `F0000` as one 64 KiB window; `0x5A..=0x5F` cover
/// `C0000..F0000` in 16 KiB steps, low nibble first.
pub fn intel_4x0_pam() -> ShadowLayout {
    let mut windows = Vec::with_capacity(13);
    for i in 0..12u64 {
        let reg = intel_pam::PAM1 + (i / 2) as usize;
        let shift = if i % 2 == 0 { 0 } else { 4 };
        windows.push(ShadowWindowDesc::new(
            EXPANSION_ROM_BASE + i * SHADOW_GRANULE,
            SHADOW_GRANULE,
            BitRef::set(reg, 0x01 << shift),
            BitRef::set(reg, 0x02 << shift),
        ));
    }
    debug_assert_eq!(windows[11].read.reg, intel_pam::PAM6);
    windows.push(ShadowWindowDesc::new(
        0xF_0000,
        K64,
        BitRef::set(intel_pam::PAM0, 0x10),
        BitRef::set(intel_pam::PAM0, 0x20),
    ));
    ShadowLayout {
        name: "intel-4x0",
        windows,
        rule: PolicyRule::STANDARD,
        overrides: Vec::new(),
    }
}

/// VIA Apollo VP/MVP/Pro: two bits per window, low bit write, high bit read.
///
/// `0x61`/`0x62` cover `C0000..E0000` in 16 KiB steps; `0x63` bits 4-5 cover `F0000` and
/// bits 6-7 cover `E0000`, each as one 64 KiB window.
pub fn via_apollo() -> ShadowLayout {
    let mut windows = Vec::with_capacity(10);
    for i in 0..8u64 {
        let reg = if i < 4 {
            via_apollo::SHADOW_C
        } else {
            via_apollo::SHADOW_D
        };
        let shift = (i % 4) * 2;
        windows.push(ShadowWindowDesc::new(
            EXPANSION_ROM_BASE + i * SHADOW_GRANULE,
            SHADOW_GRANULE,
            BitRef::set(reg, 0x02 << shift),
            BitRef::set(reg, 0x01 << shift),
        ));
    }
    windows.push(ShadowWindowDesc::new(
        SYSTEM_BIOS_BASE,
        K64,
        BitRef::set(via_apollo::SHADOW_EF, 0x80),
        BitRef::set(via_apollo::SHADOW_EF, 0x40),
    ));
    windows.push(ShadowWindowDesc::new(
        0xF_0000,
        K64,
        BitRef::set(via_apollo::SHADOW_EF, 0x20),
        BitRef::set(via_apollo::SHADOW_EF, 0x10),
    ));
    ShadowLayout {
        name: "via-apollo",
        windows,
        rule: PolicyRule::STANDARD,
        overrides: Vec::new(),
    }
}

/// VLSI SCAMP (82C311): two bits per window, bit 0 write, bit 1 read.
///
/// Windows 0..12 are the 16 KiB windows `C0000..F0000` (the `E000` pairs share their bits);
/// windows 12 and 13 are the 32 KiB halves of `F000`. An EMS-enabled window is plain RAM
/// whatever its shadow bits say, and REMP386 turns all remaining shadowing off.
pub fn vlsi_scamp() -> ShadowLayout {
    let mut windows = Vec::with_capacity(14);
    for i in 0..8u64 {
        let reg = if i < 4 { scamp::CAXS } else { scamp::DAXS };
        let shift = (i % 4) * 2;
        windows.push(ShadowWindowDesc::new(
            EXPANSION_ROM_BASE + i * SHADOW_GRANULE,
            SHADOW_GRANULE,
            BitRef::set(reg, 0x02 << shift),
            BitRef::set(reg, 0x01 << shift),
        ));
    }
    for i in 0..4u64 {
        let shift = (i / 2) * 2;
        windows.push(ShadowWindowDesc::new(
            SYSTEM_BIOS_BASE + i * SHADOW_GRANULE,
            SHADOW_GRANULE,
            BitRef::set(scamp::FEAXS, 0x02 << shift),
            BitRef::set(scamp::FEAXS, 0x01 << shift),
        ));
    }
    for (i, base) in [0xF_0000u64, 0xF_8000].into_iter().enumerate() {
        let shift = 4 + i * 2;
        windows.push(ShadowWindowDesc::new(
            base,
            K32,
            BitRef::set(scamp::FEAXS, 0x02 << shift),
            BitRef::set(scamp::FEAXS, 0x01 << shift),
        ));
    }

    let internal = GranulePolicy::new(AccessPolicy::Internal, AccessPolicy::Internal);
    let mut overrides: Vec<GlobalOverride> = (0..scamp::EMS_WINDOWS)
        .map(|i| GlobalOverride {
            when: vec![
                BitRef::set(scamp::EMSEN1, scamp::EMSEN1_EMSENAB),
                BitRef::clear(scamp::EMSEN1, scamp::EMSEN1_EMSMAP),
                scamp_ems_enable_bit(i),
            ],
            windows: 1 << i,
            policy: internal,
        })
        .collect();
    overrides.push(GlobalOverride {
        when: vec![BitRef::set(scamp::RAMMAP, scamp::RAMMAP_REMP386)],
        windows: (1 << windows.len()) - 1,
        policy: PolicyRule::STANDARD.off,
    });

    ShadowLayout {
        name: "vlsi-scamp",
        windows,
        rule: PolicyRule::STANDARD,
        overrides,
    }
}

/// Per-window EMS enable in `C000`/`D000`/`E000` mapping mode: `EMSEN2` holds
/// `C0000..E0000`, the low nibble of `EMSEN1` holds `E0000..F0000`.
pub fn scamp_ems_enable_bit(window: usize) -> BitRef {
    if window < 8 {
        BitRef::set(scamp::EMSEN2, 1 << window)
    } else {
        BitRef::set(scamp::EMSEN1, 1 << (window - 8))
    }
}

/// LIM EMS memory board: four 16 KiB slots in a 64 KiB page frame, 7-bit page numbers.
pub fn lim_ems_board(frame_base: u64) -> PageRemapLayout {
    PageRemapLayout {
        name: "lim-ems",
        slot_bases: (0..4).map(|i| frame_base + i * EMS_PAGE).collect(),
        page_size: EMS_PAGE,
        page_bits: 7,
        active_at_reset: true,
    }
}

/// VLSI SCAMP EMS: twelve 16 KiB windows over `C0000..F0000`, 10-bit page numbers into
/// main RAM. Inactive until `EMSENAB` is set.
pub fn vlsi_scamp_ems() -> PageRemapLayout {
    PageRemapLayout {
        name: "vlsi-scamp-ems",
        slot_bases: (0..scamp::EMS_WINDOWS as u64)
            .map(|i| EXPANSION_ROM_BASE + i * EMS_PAGE)
            .collect(),
        page_size: EMS_PAGE,
        page_bits: 10,
        active_at_reset: false,
    }
}
