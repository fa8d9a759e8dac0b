//! PC chipset wiring around the [`memory`] address-space core.
//!
//! [`Platform`] is one machine's worth of it: the A20 gate, the filtered PC [`MemoryBus`] with
//! conventional and extended RAM mapped, and port 0x92. The shadow, SMRAM, page-remap and
//! top-of-memory controllers are attached by chipset models on top of [`MemoryBus::space_mut`].

pub mod a20_port;
pub mod address_filter;
pub mod chipset;
pub mod chipsets;
pub mod config;
pub mod cpu;
pub mod error;
pub mod io;
pub mod memory;
pub mod page_remap;
pub mod remap;
pub mod shadow;
pub mod smram;

pub use a20_port::{FastA20Port, FAST_A20_PORT};
pub use address_filter::AddressFilter;
pub use chipset::{A20GateHandle, A20Source, A20Sources, ChipsetState};
pub use config::{AddressBusWidth, PlatformConfig};
pub use cpu::{CpuMode, CpuModeSource, Translation, TranslationCache};
pub use error::{PlatformError, Result};
pub use io::{IoPortBus, PortIoDevice};
pub use self::memory::{BiosRomMapping, MemoryBus};
pub use page_remap::{PageRemapBank, PageRemapLayout, PageRemapSlot};
pub use remap::TopRemap;
pub use shadow::{
    BitRef, GlobalOverride, PolicyRule, ShadowController, ShadowLayout, ShadowWindowDesc,
};
pub use smram::{SmramController, SmramStorage, SmramWindow};

/// One emulated machine's memory-side platform.
pub struct Platform {
    pub chipset: ChipsetState,
    pub memory: MemoryBus,
    pub io: IoPortBus,
}

impl Platform {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let invalidation = ::memory::InvalidationBus::new();
        let chipset = ChipsetState::with_invalidation(config.a20_enabled_at_reset, invalidation);
        let filter = AddressFilter::new(chipset.a20(), config.bus_width);
        let memory = MemoryBus::from_config(filter, &config)?;

        let mut io = IoPortBus::new();
        if config.bus_width.has_a20_gate() {
            io.register(FAST_A20_PORT, Box::new(FastA20Port::new(chipset.a20())));
        }

        tracing::debug!(
            bus = ?config.bus_width,
            a20 = config.a20_enabled_at_reset,
            "platform with {:#x} bytes of RAM",
            config.ram_size_bytes
        );
        Ok(Self {
            chipset,
            memory,
            io,
        })
    }

    pub fn a20(&self) -> A20GateHandle {
        self.chipset.a20()
    }

    /// Connects the CPU core's translation flush to the shared invalidation bus, returning the
    /// previous sink.
    pub fn connect_invalidation_sink(
        &self,
        sink: Box<dyn ::memory::InvalidationSink>,
    ) -> Option<Box<dyn ::memory::InvalidationSink>> {
        self.memory.space().invalidation().connect(sink)
    }
}
