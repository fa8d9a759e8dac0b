use crate::chipset::{A20GateHandle, A20Source};
use crate::io::PortIoDevice;

/// System control port A.
pub const FAST_A20_PORT: u16 = 0x92;

const RESET_BIT: u8 = 0x01;
const A20_BIT: u8 = 0x02;

/// Port 0x92 "fast A20" latch.
///
/// Bit 1 drives the port-write A20 source and reads back from it. Bit 0 pulses the optional
/// reset callback and never reads back set.
pub struct FastA20Port {
    a20: A20GateHandle,
    reset: Option<Box<dyn FnMut()>>,
    value: u8,
}

impl FastA20Port {
    pub fn new(a20: A20GateHandle) -> Self {
        let value = if a20.source(A20Source::PortWrite) {
            A20_BIT
        } else {
            0
        };
        Self {
            a20,
            reset: None,
            value,
        }
    }

    pub fn with_reset_callback(a20: A20GateHandle, reset: Box<dyn FnMut()>) -> Self {
        let mut dev = Self::new(a20);
        dev.reset = Some(reset);
        dev
    }

    fn read_value(&self) -> u8 {
        let a20_bit = if self.a20.source(A20Source::PortWrite) {
            A20_BIT
        } else {
            0
        };
        (self.value & !A20_BIT) | a20_bit
    }
}

impl PortIoDevice for FastA20Port {
    fn read(&mut self, _port: u16, _size: u8) -> u32 {
        u32::from(self.read_value())
    }

    fn write(&mut self, _port: u16, _size: u8, value: u32) {
        let value = value as u8;
        if value & RESET_BIT != 0 {
            tracing::debug!("reset requested through port 0x92");
            if let Some(reset) = self.reset.as_mut() {
                reset();
            }
        }
        self.a20.set_source(A20Source::PortWrite, value & A20_BIT != 0);
        self.value = value & !RESET_BIT;
    }

    fn reset(&mut self) {
        self.value = 0;
        self.a20.set_source(A20Source::PortWrite, false);
    }
}
