//! The boundary with the CPU core: execution-mode queries and a translation cache that honours
//! the invalidation bus.

use memory::{GuestMemory, Initiator, Route, StoreId};

use crate::memory::MemoryBus;

/// CPU execution mode as far as memory decoding cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuMode {
    Real,
    Protected,
    Virtual8086,
    /// System-management mode.
    Smm,
}

/// Implemented by the CPU core so mode-dependent chipset logic can ask where it is.
pub trait CpuModeSource {
    fn effective_mode(&self) -> CpuMode;
}

impl CpuModeSource for CpuMode {
    fn effective_mode(&self) -> CpuMode {
        *self
    }
}

const PAGE_SHIFT: u32 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
const PAGE_MASK: u64 = PAGE_SIZE - 1;
const ENTRIES: usize = 256;

/// A cached direct route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub store: StoreId,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    page: u64,
    store: StoreId,
    /// Store offset of the first byte of the page.
    base: u64,
}

/// Direct-mapped cache of 4 KiB RAM/ROM routes, keyed by the address the CPU puts on the bus.
///
/// Only pages that decode to one store linearly across the whole page are cached; everything
/// else goes through the bus each time. The cache flushes itself whenever the bus's
/// invalidation epoch has moved since it was last consulted.
#[derive(Debug)]
pub struct TranslationCache {
    entries: Vec<Option<Entry>>,
    epoch: u64,
    hits: u64,
    misses: u64,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationCache {
    pub fn new() -> Self {
        Self {
            entries: vec![None; ENTRIES * 2],
            epoch: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn flush(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    #[inline]
    fn slot(paddr: u64, is_write: bool) -> usize {
        let set = ((paddr >> PAGE_SHIFT) as usize) & (ENTRIES - 1);
        if is_write {
            set + ENTRIES
        } else {
            set
        }
    }

    pub fn translate(
        &mut self,
        bus: &MemoryBus,
        paddr: u64,
        is_write: bool,
    ) -> Option<Translation> {
        let epoch = bus.space().invalidation().epoch();
        if epoch != self.epoch {
            self.flush();
            self.epoch = epoch;
        }

        let page = paddr >> PAGE_SHIFT;
        let slot = Self::slot(paddr, is_write);
        if let Some(entry) = self.entries[slot].filter(|e| e.page == page) {
            self.hits += 1;
            return Some(Translation {
                store: entry.store,
                offset: entry.base + (paddr & PAGE_MASK),
            });
        }
        self.misses += 1;

        let page_addr = paddr & !PAGE_MASK;
        let (route, span) = bus.decode_span(Initiator::Cpu, page_addr, is_write);
        let Route::Direct { store, offset, .. } = route else {
            return None;
        };
        let store_size = bus.space().store(store).map_or(0, |m| m.size());
        let whole_page = span >= PAGE_SIZE
            && offset
                .checked_add(PAGE_SIZE)
                .is_some_and(|end| end <= store_size);
        if !whole_page {
            return None;
        }

        self.entries[slot] = Some(Entry {
            page,
            store,
            base: offset,
        });
        Some(Translation {
            store,
            offset: offset + (paddr & PAGE_MASK),
        })
    }

    pub fn read_u8(&mut self, bus: &mut MemoryBus, paddr: u64) -> u8 {
        if let Some(t) = self.translate(bus, paddr, false) {
            if let Some(value) = bus
                .space()
                .store(t.store)
                .and_then(|m| m.read_u8_le(t.offset).ok())
            {
                return value;
            }
        }
        bus.read_u8(paddr)
    }

    pub fn write_u8(&mut self, bus: &mut MemoryBus, paddr: u64, value: u8) {
        if let Some(t) = self.translate(bus, paddr, true) {
            let done = bus
                .space_mut()
                .store_mut(t.store)
                .is_some_and(|m| m.write_u8_le(t.offset, value).is_ok());
            if done {
                return;
            }
        }
        bus.write_u8(paddr, value);
    }
}
