/// CPU-side physical memory access.
///
/// Reads take `&mut self` because a read may land on device hooks with side effects. A sized
/// access is one bus cycle: it is routed by its starting address alone, unlike the bulk copies,
/// which re-resolve at every region boundary.
pub trait MemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]);
    fn write_physical(&mut self, paddr: u64, buf: &[u8]);

    /// Reads `size` (1..=8) bytes as one access, little-endian in the low bytes.
    fn read_access(&mut self, paddr: u64, size: usize) -> u64;
    /// Writes the low `size` (1..=8) bytes of `value` as one access.
    fn write_access(&mut self, paddr: u64, size: usize, value: u64);

    fn read_u8(&mut self, paddr: u64) -> u8 {
        self.read_access(paddr, 1) as u8
    }

    fn read_u16(&mut self, paddr: u64) -> u16 {
        self.read_access(paddr, 2) as u16
    }

    fn read_u32(&mut self, paddr: u64) -> u32 {
        self.read_access(paddr, 4) as u32
    }

    fn read_u64(&mut self, paddr: u64) -> u64 {
        self.read_access(paddr, 8)
    }

    fn write_u8(&mut self, paddr: u64, val: u8) {
        self.write_access(paddr, 1, u64::from(val));
    }

    fn write_u16(&mut self, paddr: u64, val: u16) {
        self.write_access(paddr, 2, u64::from(val));
    }

    fn write_u32(&mut self, paddr: u64, val: u32) {
        self.write_access(paddr, 4, u64::from(val));
    }

    fn write_u64(&mut self, paddr: u64, val: u64) {
        self.write_access(paddr, 8, val);
    }
}
