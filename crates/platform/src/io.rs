use std::collections::HashMap;

/// A device answering x86 port I/O.
pub trait PortIoDevice {
    fn read(&mut self, port: u16, size: u8) -> u32;
    fn write(&mut self, port: u16, size: u8, value: u32);

    /// Reset the device back to its power-on state.
    fn reset(&mut self) {}
}

/// Minimal port I/O dispatcher for the chipset latches that live next to the memory map
/// (port 0x92 and friends).
#[derive(Default)]
pub struct IoPortBus {
    devices: HashMap<u16, Box<dyn PortIoDevice>>,
}

impl IoPortBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `device` at `port`, returning whatever was there before.
    pub fn register(
        &mut self,
        port: u16,
        device: Box<dyn PortIoDevice>,
    ) -> Option<Box<dyn PortIoDevice>> {
        self.devices.insert(port, device)
    }

    pub fn unregister(&mut self, port: u16) -> Option<Box<dyn PortIoDevice>> {
        self.devices.remove(&port)
    }

    pub fn read(&mut self, port: u16, size: u8) -> u32 {
        // Only byte, word and dword port accesses exist; anything else floats high.
        if !matches!(size, 1 | 2 | 4) {
            return 0xFFFF_FFFF;
        }
        match self.devices.get_mut(&port) {
            Some(dev) => dev.read(port, size),
            None => match size {
                1 => 0xFF,
                2 => 0xFFFF,
                _ => 0xFFFF_FFFF,
            },
        }
    }

    pub fn write(&mut self, port: u16, size: u8, value: u32) {
        if !matches!(size, 1 | 2 | 4) {
            return;
        }
        if let Some(dev) = self.devices.get_mut(&port) {
            dev.write(port, size, value);
        }
    }

    pub fn read_u8(&mut self, port: u16) -> u8 {
        self.read(port, 1) as u8
    }

    pub fn write_u8(&mut self, port: u16, value: u8) {
        self.write(port, 1, u32::from(value));
    }

    pub fn reset(&mut self) {
        for dev in self.devices.values_mut() {
            dev.reset();
        }
    }
}
