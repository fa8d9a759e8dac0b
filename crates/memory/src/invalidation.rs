use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// CPU-side receiver of invalidation signals.
///
/// The CPU core implements this to drop TLB entries, decoded-block caches and any other
/// structure that memoises "physical address X resolves to backing Y".
pub trait InvalidationSink {
    fn invalidate(&mut self);
}

impl<F> InvalidationSink for F
where
    F: FnMut(),
{
    fn invalidate(&mut self) {
        self();
    }
}

#[derive(Default)]
struct Inner {
    epoch: Cell<u64>,
    sink: RefCell<Option<Box<dyn InvalidationSink>>>,
}

/// Cloneable handle to the machine's invalidation signal.
///
/// Every controller that can change what a physical address resolves to holds a clone and calls
/// [`InvalidationBus::invalidate`] once after its batch of changes. Each call bumps a
/// monotonically increasing epoch, so cached translations can also be validated lazily by
/// comparing epochs.
#[derive(Clone, Default)]
pub struct InvalidationBus {
    inner: Rc<Inner>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invalidations signalled so far.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.get()
    }

    /// Signals that any cached physical translation is stale.
    ///
    /// The connected sink runs synchronously. A nested call made from inside the sink only bumps
    /// the epoch.
    pub fn invalidate(&self) {
        let epoch = self.inner.epoch.get().wrapping_add(1);
        self.inner.epoch.set(epoch);
        tracing::trace!(epoch, "physical map invalidated");

        if let Ok(mut sink) = self.inner.sink.try_borrow_mut() {
            if let Some(sink) = sink.as_mut() {
                sink.invalidate();
            }
        }
    }

    /// Connects the CPU-side sink, returning the previously connected one.
    pub fn connect(
        &self,
        sink: Box<dyn InvalidationSink>,
    ) -> Option<Box<dyn InvalidationSink>> {
        self.inner.sink.replace(Some(sink))
    }

    pub fn disconnect(&self) -> Option<Box<dyn InvalidationSink>> {
        self.inner.sink.replace(None)
    }
}

impl fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("epoch", &self.epoch())
            .field(
                "connected",
                &self.inner.sink.try_borrow().map(|s| s.is_some()).ok(),
            )
            .finish()
    }
}
