use crate::chipset::A20GateHandle;
use crate::config::AddressBusWidth;

/// Chipset-level address mangling applied before any region lookup: the bus-width wrap and the
/// A20 gate.
#[derive(Debug, Clone)]
pub struct AddressFilter {
    a20: A20GateHandle,
    bus_width: AddressBusWidth,
}

impl AddressFilter {
    pub fn new(a20: A20GateHandle, bus_width: AddressBusWidth) -> Self {
        Self { a20, bus_width }
    }

    pub fn a20(&self) -> A20GateHandle {
        self.a20.clone()
    }

    pub fn bus_width(&self) -> AddressBusWidth {
        self.bus_width
    }

    #[inline]
    pub fn mask(&self) -> u64 {
        self.bus_width.mask_for(self.a20.enabled())
    }

    #[inline]
    pub fn filter(&self, paddr: u64) -> u64 {
        paddr & self.mask()
    }
}
