use thiserror::Error;

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    #[error("store access out of range: offset=0x{offset:x} len={len} size=0x{size:x}")]
    OutOfRange { offset: u64, len: usize, size: u64 },
    /// The requested size cannot be allocated on this host.
    #[error("store size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
    #[error("invalid sparse chunk size {chunk_size}")]
    InvalidChunkSize { chunk_size: usize },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// A flat backing store (RAM array, ROM image, separate SMRAM, EMS board memory).
///
/// Offsets are store-relative. The address decoder turns a physical address into a store offset
/// before any of these methods are called.
pub trait GuestMemory {
    fn size(&self) -> u64;

    fn read_into(&self, offset: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    fn write_from(&mut self, offset: u64, src: &[u8]) -> GuestMemoryResult<()>;

    fn read_u8_le(&self, offset: u64) -> GuestMemoryResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_le(&self, offset: u64) -> GuestMemoryResult<u16> {
        let mut buf = [0u8; 2];
        self.read_into(offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&self, offset: u64) -> GuestMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u8_le(&mut self, offset: u64, value: u8) -> GuestMemoryResult<()> {
        self.write_from(offset, &[value])
    }

    fn write_u16_le(&mut self, offset: u64, value: u16) -> GuestMemoryResult<()> {
        self.write_from(offset, &value.to_le_bytes())
    }

    fn write_u32_le(&mut self, offset: u64, value: u32) -> GuestMemoryResult<()> {
        self.write_from(offset, &value.to_le_bytes())
    }
}

/// `offset..offset + len` as host indices, if it lies inside a store of `size` bytes.
fn span(size: u64, offset: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
    let out_of_range = || GuestMemoryError::OutOfRange { offset, len, size };
    offset
        .checked_add(len as u64)
        .filter(|&end| end <= size)
        .ok_or_else(out_of_range)?;
    let start = usize::try_from(offset).map_err(|_| out_of_range())?;
    Ok((start, start + len))
}

fn host_size(size: u64) -> GuestMemoryResult<usize> {
    usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })
}

/// Contiguous backing store.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Ok(Self {
            data: vec![0u8; host_size(size)?].into_boxed_slice(),
        })
    }

    /// Copies an existing image, e.g. a ROM dump.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { data: bytes.into() }
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, offset: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = span(self.size(), offset, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, offset: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = span(self.size(), offset, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }
}

/// Backing store made of fixed-size chunks allocated on first write.
///
/// Large RAM configurations use it: guests rarely touch most of the upper pages, and untouched
/// chunks read as zero.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    size: u64,
    chunk_size: usize,
    chunks: Vec<Option<Box<[u8]>>>,
}

impl SparseMemory {
    pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Self::with_chunk_size(size, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: usize) -> GuestMemoryResult<Self> {
        if chunk_size == 0 {
            return Err(GuestMemoryError::InvalidChunkSize { chunk_size });
        }
        let count = host_size(size.div_ceil(chunk_size as u64))?;
        Ok(Self {
            size,
            chunk_size,
            chunks: vec![None; count],
        })
    }

    /// Number of chunks written at least once.
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.iter().flatten().count()
    }

    /// Splits the in-range span `start..end` at chunk boundaries, yielding
    /// `(chunk, offset in chunk, range in the caller's buffer)`.
    fn pieces(
        &self,
        start: usize,
        end: usize,
    ) -> impl Iterator<Item = (usize, usize, std::ops::Range<usize>)> {
        let chunk_size = self.chunk_size;
        let mut cur = start;
        std::iter::from_fn(move || {
            if cur >= end {
                return None;
            }
            let (chunk, within) = (cur / chunk_size, cur % chunk_size);
            let take = (chunk_size - within).min(end - cur);
            let buf = cur - start..cur - start + take;
            cur += take;
            Some((chunk, within, buf))
        })
    }
}

impl GuestMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, offset: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = span(self.size, offset, dst.len())?;
        for (chunk, within, buf) in self.pieces(start, end) {
            match &self.chunks[chunk] {
                Some(data) => dst[buf.clone()].copy_from_slice(&data[within..within + buf.len()]),
                None => dst[buf].fill(0),
            }
        }
        Ok(())
    }

    fn write_from(&mut self, offset: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = span(self.size, offset, src.len())?;
        let chunk_size = self.chunk_size;
        for (chunk, within, buf) in self.pieces(start, end) {
            let data = self.chunks[chunk]
                .get_or_insert_with(|| vec![0u8; chunk_size].into_boxed_slice());
            data[within..within + buf.len()].copy_from_slice(&src[buf]);
        }
        Ok(())
    }
}
