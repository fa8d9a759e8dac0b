#![forbid(unsafe_code)]

//! Legacy IBM PC physical-layout constants.
//!
//! The address-space core (`memory`) and the chipset wiring (`pcmem-platform`) both need to agree
//! on where the legacy holes and ROM windows sit, so the numbers live in one place.

/// End of conventional ("low") RAM, exclusive. 640 KiB.
pub const CONVENTIONAL_RAM_END: u64 = 0xA_0000;

/// Expansion ROM / upper-memory window managed by shadow RAM registers.
pub const EXPANSION_ROM_BASE: u64 = 0xC_0000;

/// System BIOS window (`E000`/`F000` segments).
pub const SYSTEM_BIOS_BASE: u64 = 0xE_0000;

/// Start of the 64 KiB `F000` BIOS segment.
pub const BIOS_SEGMENT_BASE: u64 = 0xF_0000;

/// First byte above the 20-bit real-mode address space.
pub const HIGH_MEMORY_BASE: u64 = 0x10_0000;

/// Address bit gated by the A20 line.
pub const A20_BIT: u64 = 1 << 20;

/// Granule used by virtually every chipset for shadow windows in `C0000..E0000`.
pub const SHADOW_GRANULE: u64 = 0x4000;

/// Default SMBASE-relative SMRAM window used by Intel chipsets (`A_SEG`).
pub const SMRAM_DEFAULT_BASE: u64 = 0xA_0000;
pub const SMRAM_DEFAULT_SIZE: u64 = 0x2_0000;

/// Physical address of the reset vector relative to the top of the address bus.
pub const RESET_VECTOR_FROM_TOP: u64 = 0x10;
