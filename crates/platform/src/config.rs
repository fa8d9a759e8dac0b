use pcmem_pc_constants::A20_BIT;

/// Width of the CPU's physical address bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressBusWidth {
    /// 8088/8086: 1 MiB, no A20 gate.
    Bits20,
    /// 286 and 386SX: 16 MiB.
    Bits24,
    /// 386DX and later: 4 GiB.
    Bits32,
}

impl AddressBusWidth {
    /// Size of the decoded physical address space.
    pub const fn limit(self) -> u64 {
        match self {
            AddressBusWidth::Bits20 => 1 << 20,
            AddressBusWidth::Bits24 => 1 << 24,
            AddressBusWidth::Bits32 => 1 << 32,
        }
    }

    /// Address mask with the A20 gate open.
    pub const fn mask(self) -> u64 {
        self.limit() - 1
    }

    /// Whether the A20 gate has any effect on this bus.
    pub const fn has_a20_gate(self) -> bool {
        !matches!(self, AddressBusWidth::Bits20)
    }

    /// Address mask for the given A20 state (bit 20 forced low while the gate is closed).
    pub const fn mask_for(self, a20_enabled: bool) -> u64 {
        if a20_enabled || !self.has_a20_gate() {
            self.mask()
        } else {
            self.mask() & !A20_BIT
        }
    }
}

/// Construction parameters for a [`crate::Platform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Main RAM size in bytes; must be a multiple of 4 KiB.
    pub ram_size_bytes: u64,
    pub bus_width: AddressBusWidth,
    /// log2 of the access-policy granule (12..=14).
    pub granule_shift: u32,
    /// Whether the port 0x92 A20 source starts asserted.
    pub a20_enabled_at_reset: bool,
}

impl PlatformConfig {
    /// RAM at or above this size is backed by [`memory::SparseMemory`].
    pub const SPARSE_RAM_THRESHOLD_BYTES: u64 = 512 * 1024 * 1024;

    /// 8088-class machine.
    #[must_use]
    pub fn xt(ram_size_bytes: u64) -> Self {
        Self {
            ram_size_bytes,
            bus_width: AddressBusWidth::Bits20,
            ..Self::default()
        }
    }

    /// 286-class AT with a 24-bit bus.
    #[must_use]
    pub fn at_286(ram_size_bytes: u64) -> Self {
        Self {
            ram_size_bytes,
            bus_width: AddressBusWidth::Bits24,
            ..Self::default()
        }
    }

    /// 386-class machine with a 32-bit bus.
    #[must_use]
    pub fn at_386(ram_size_bytes: u64) -> Self {
        Self {
            ram_size_bytes,
            bus_width: AddressBusWidth::Bits32,
            ..Self::default()
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            ram_size_bytes: 16 * 1024 * 1024,
            bus_width: AddressBusWidth::Bits32,
            granule_shift: 14,
            a20_enabled_at_reset: false,
        }
    }
}
