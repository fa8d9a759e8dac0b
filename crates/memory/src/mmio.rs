/// Callback hooks for a region that models live device behaviour instead of storage.
///
/// `offset` is relative to the region base. `size` is 1, 2, 4 or 8 bytes; values are
/// little-endian in the low bytes of the `u64`.
pub trait MmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64;
    fn write(&mut self, offset: u64, size: usize, value: u64);
}

impl<T: MmioHandler + ?Sized> MmioHandler for Box<T> {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        (**self).read(offset, size)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        (**self).write(offset, size, value)
    }
}
