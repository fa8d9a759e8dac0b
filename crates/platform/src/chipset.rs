use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use memory::InvalidationBus;

bitflags! {
    /// Set of A20 assertion sources currently driving the gate high.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct A20Sources: u8 {
        /// Keyboard controller output port bit 1 (and its fast-gate command).
        const KEYBOARD_FAST_GATE = 1 << 0;
        /// Chipset-specific alternate gate (e.g. a north-bridge config bit).
        const CHIPSET_ALTERNATE = 1 << 1;
        /// System control port A (0x92) bit 1.
        const PORT_WRITE = 1 << 2;
    }
}

/// One A20 assertion source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum A20Source {
    KeyboardFastGate,
    ChipsetAlternate,
    PortWrite,
}

impl A20Source {
    pub const ALL: [A20Source; 3] = [
        A20Source::KeyboardFastGate,
        A20Source::ChipsetAlternate,
        A20Source::PortWrite,
    ];

    pub const fn flag(self) -> A20Sources {
        match self {
            A20Source::KeyboardFastGate => A20Sources::KEYBOARD_FAST_GATE,
            A20Source::ChipsetAlternate => A20Sources::CHIPSET_ALTERNATE,
            A20Source::PortWrite => A20Sources::PORT_WRITE,
        }
    }
}

struct A20State {
    sources: Cell<A20Sources>,
    invalidation: InvalidationBus,
}

/// Shared handle to the A20 gate.
///
/// The effective gate is the OR of all asserted sources. Every change to a source's value
/// signals the invalidation bus exactly once, whether or not the OR flips, since the CPU may have
/// cached translations made under either state.
#[derive(Clone)]
pub struct A20GateHandle {
    state: Rc<A20State>,
}

impl A20GateHandle {
    fn new(initial: A20Sources, invalidation: InvalidationBus) -> Self {
        Self {
            state: Rc::new(A20State {
                sources: Cell::new(initial),
                invalidation,
            }),
        }
    }

    /// The effective A20 line.
    #[inline]
    pub fn enabled(&self) -> bool {
        !self.state.sources.get().is_empty()
    }

    pub fn sources(&self) -> A20Sources {
        self.state.sources.get()
    }

    pub fn source(&self, source: A20Source) -> bool {
        self.sources().contains(source.flag())
    }

    /// Drives one source. Writing a source's current value is a no-op.
    pub fn set_source(&self, source: A20Source, asserted: bool) {
        let old = self.state.sources.get();
        let mut new = old;
        new.set(source.flag(), asserted);
        if new == old {
            return;
        }
        self.state.sources.set(new);
        tracing::debug!(
            ?source,
            asserted,
            enabled = !new.is_empty(),
            "A20 source changed"
        );
        self.state.invalidation.invalidate();
    }

    pub fn invalidation(&self) -> &InvalidationBus {
        &self.state.invalidation
    }
}

impl fmt::Debug for A20GateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("A20GateHandle")
            .field("sources", &self.sources())
            .field("enabled", &self.enabled())
            .finish()
    }
}

/// Chipset-wide state that the memory bus consults on every access.
#[derive(Debug, Clone)]
pub struct ChipsetState {
    a20: A20GateHandle,
}

impl ChipsetState {
    /// Standalone chipset with its own invalidation bus. `a20_enabled` asserts the port 0x92
    /// source.
    pub fn new(a20_enabled: bool) -> Self {
        Self::with_invalidation(a20_enabled, InvalidationBus::new())
    }

    pub fn with_invalidation(a20_enabled: bool, invalidation: InvalidationBus) -> Self {
        let initial = if a20_enabled {
            A20Sources::PORT_WRITE
        } else {
            A20Sources::empty()
        };
        Self {
            a20: A20GateHandle::new(initial, invalidation),
        }
    }

    pub fn a20(&self) -> A20GateHandle {
        self.a20.clone()
    }
}
