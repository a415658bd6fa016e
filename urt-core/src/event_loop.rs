//! Single-threaded readiness reactor.
//!
//! The loop polls the descriptors of every registered [`EventSource`],
//! dispatches ready ones, and fires an interval signal on a fixed period.
//! Sources added or removed while the loop is dispatching are queued and
//! applied once the pass completes, so the active set never changes under a
//! running pass. The loop returns when no sources remain.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::signal::{SlotId, SlotList, Subscription};
use crate::{sys, Error};

/// Default period of the interval signal
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Something the loop can watch.
pub trait EventSource {
    /// Descriptor to poll for readability
    fn raw_fd(&self) -> RawFd;

    /// Called when the descriptor is readable, errored or hung up.
    ///
    /// Returning false removes the source after the current pass.
    fn on_activity(&mut self) -> bool;

    /// Name used when logging this source
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base).to_string()
    }
}

/// Shared handle to a registered source
pub type SourceRef = Rc<RefCell<dyn EventSource>>;

/// Identifies a source for the lifetime of its registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

type IntervalFn = dyn Fn();

enum PendingOp {
    Add(SourceId, SourceRef),
    Remove(SourceId),
}

struct Entry {
    id: SourceId,
    source: SourceRef,
}

struct Inner {
    entries: Vec<Entry>,
    pollfds: Vec<libc::pollfd>,
    pending: Vec<PendingOp>,
    running: bool,
    next_id: u64,
    interval: Duration,
    interval_slots: SlotList<IntervalFn>,
}

fn same_source(a: &SourceRef, b: &SourceRef) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

impl Inner {
    fn index_of(&self, id: SourceId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn contains_source(&self, source: &SourceRef) -> bool {
        self.entries.iter().any(|e| same_source(&e.source, source))
            || self.pending.iter().any(|op| match op {
                PendingOp::Add(_, queued) => same_source(queued, source),
                PendingOp::Remove(_) => false,
            })
    }

    fn is_pending_add(&self, id: SourceId) -> bool {
        self.pending
            .iter()
            .any(|op| matches!(op, PendingOp::Add(queued, _) if *queued == id))
    }

    fn is_pending_removal(&self, id: SourceId) -> bool {
        self.pending
            .iter()
            .any(|op| matches!(op, PendingOp::Remove(queued) if *queued == id))
    }

    fn push_entry(&mut self, id: SourceId, source: SourceRef) {
        let fd = source.borrow().raw_fd();
        self.entries.push(Entry { id, source });
        self.pollfds.push(sys::pollfd(fd));
    }

    /// Apply queued removals (highest index first), then queued additions.
    /// Removed entries are returned so they can be dropped outside the borrow.
    fn apply_pending(&mut self) -> Vec<Entry> {
        let pending = std::mem::take(&mut self.pending);
        let mut indices: Vec<usize> = Vec::new();
        let mut additions: Vec<(SourceId, SourceRef)> = Vec::new();
        let mut removed = Vec::new();
        for op in pending {
            match op {
                PendingOp::Remove(id) => {
                    if let Some(index) = self.index_of(id) {
                        if !indices.contains(&index) {
                            indices.push(index);
                        }
                    } else if let Some(at) = additions.iter().position(|(added, _)| *added == id) {
                        // removed before its deferred add was applied
                        let (id, source) = additions.remove(at);
                        removed.push(Entry { id, source });
                    }
                }
                PendingOp::Add(id, source) => additions.push((id, source)),
            }
        }

        indices.sort_unstable_by(|a, b| b.cmp(a));
        for index in indices {
            self.pollfds.remove(index);
            removed.push(self.entries.remove(index));
        }
        for (id, source) in additions {
            self.push_entry(id, source);
        }
        removed
    }
}

fn log_removed(removed: Vec<Entry>) {
    for entry in removed {
        let name = entry.source.borrow().name();
        info!("{} removed", name);
    }
}

/// The reactor. Create one per thread; hand [`LoopHandle`]s to sources.
pub struct EventLoop {
    inner: Rc<RefCell<Inner>>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl EventLoop {
    /// Create a loop whose interval signal fires every `interval`
    pub fn new(interval: Duration) -> Self {
        EventLoop {
            inner: Rc::new(RefCell::new(Inner {
                entries: Vec::new(),
                pollfds: Vec::new(),
                pending: Vec::new(),
                running: false,
                next_id: 0,
                interval,
                interval_slots: SlotList::default(),
            })),
        }
    }

    /// A weak handle sources can keep without owning the loop
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.borrow().interval
    }

    /// Register a source.
    ///
    /// Returns `None` if this exact source is already registered. While the
    /// loop is dispatching, the source is only polled from the next pass.
    pub fn add(&self, source: SourceRef) -> Option<SourceId> {
        add_to(&self.inner, source)
    }

    /// Convenience wrapper around [`EventLoop::add`] for a concrete source
    pub fn add_source<S: EventSource + 'static>(&self, source: S) -> Option<(SourceId, Rc<RefCell<S>>)> {
        let source = Rc::new(RefCell::new(source));
        let id = self.add(source.clone())?;
        Some((id, source))
    }

    /// Unregister a source. Returns false if it is not registered.
    pub fn remove(&self, id: SourceId) -> bool {
        remove_from(&self.inner, id)
    }

    /// True if `id` is registered or queued for registration
    pub fn has(&self, id: SourceId) -> bool {
        let inner = self.inner.borrow();
        (inner.index_of(id).is_some() || inner.is_pending_add(id)) && !inner.is_pending_removal(id)
    }

    /// Number of active sources
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `slot` on every interval, in registration order.
    pub fn register_interval_slot(&self, slot: impl Fn() + 'static) -> Subscription {
        subscribe_interval(&self.inner, Rc::new(slot))
    }

    /// Run until no sources remain.
    ///
    /// Only a failure of the readiness wait itself is returned as an error.
    pub fn run(&self) -> Result<(), Error> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.running {
                warn!("event loop is already running");
                return Ok(());
            }
            inner.running = true;
        }
        let result = self.run_passes();
        let removed = {
            let mut inner = self.inner.borrow_mut();
            inner.running = false;
            inner.apply_pending()
        };
        log_removed(removed);
        result
    }

    fn run_passes(&self) -> Result<(), Error> {
        let interval = self.interval();
        let mut timeout = interval;
        let mut last_interval: Option<Instant> = None;

        loop {
            let mut fds = {
                let inner = self.inner.borrow();
                if inner.entries.is_empty() {
                    debug!("no sources left, leaving event loop");
                    return Ok(());
                }
                inner.pollfds.clone()
            };

            let ready = sys::poll(&mut fds, timeout).map_err(Error::Poll)?;
            if ready > 0 {
                self.dispatch(&fds);
            }

            let removed = self.inner.borrow_mut().apply_pending();
            log_removed(removed);

            let now = Instant::now();
            match last_interval {
                Some(last) if now.duration_since(last) < interval => {
                    timeout = interval - now.duration_since(last);
                }
                _ => {
                    self.fire_interval();
                    last_interval = Some(Instant::now());
                    timeout = interval;
                }
            }
        }
    }

    fn dispatch(&self, fds: &[libc::pollfd]) {
        for (index, fd) in fds.iter().enumerate() {
            if fd.revents & sys::ACTIVITY_EVENTS == 0 {
                continue;
            }
            let (id, source) = {
                let inner = self.inner.borrow();
                let entry = &inner.entries[index];
                if inner.is_pending_removal(entry.id) {
                    continue;
                }
                (entry.id, entry.source.clone())
            };
            let keep = source.borrow_mut().on_activity();
            if !keep {
                remove_from(&self.inner, id);
            }
        }
    }

    fn fire_interval(&self) {
        let slots = self.inner.borrow().interval_slots.snapshot();
        for (id, slot) in slots {
            if self.inner.borrow().interval_slots.contains(id) {
                slot();
            }
        }
    }
}

/// Weak reference to an [`EventLoop`].
///
/// Operations on a handle whose loop has been dropped are no-ops.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Weak<RefCell<Inner>>,
}

impl LoopHandle {
    pub fn add(&self, source: SourceRef) -> Option<SourceId> {
        let inner = self.inner.upgrade()?;
        add_to(&inner, source)
    }

    pub fn remove(&self, id: SourceId) -> bool {
        match self.inner.upgrade() {
            Some(inner) => remove_from(&inner, id),
            None => false,
        }
    }

    pub fn has(&self, id: SourceId) -> bool {
        match self.inner.upgrade() {
            Some(inner) => EventLoop { inner }.has(id),
            None => false,
        }
    }

    /// Register an interval slot. Returns `None` if the loop is gone.
    pub fn register_interval_slot(&self, slot: impl Fn() + 'static) -> Option<Subscription> {
        let inner = self.inner.upgrade()?;
        Some(subscribe_interval(&inner, Rc::new(slot)))
    }
}

fn add_to(inner: &Rc<RefCell<Inner>>, source: SourceRef) -> Option<SourceId> {
    let mut guard = inner.borrow_mut();
    if guard.contains_source(&source) {
        return None;
    }
    let id = SourceId(guard.next_id);
    guard.next_id += 1;
    if guard.running {
        guard.pending.push(PendingOp::Add(id, source));
    } else {
        guard.push_entry(id, source);
    }
    Some(id)
}

fn remove_from(inner: &Rc<RefCell<Inner>>, id: SourceId) -> bool {
    let removed = {
        let mut guard = inner.borrow_mut();
        if guard.running {
            let known = guard.index_of(id).is_some() || guard.is_pending_add(id);
            if !known || guard.is_pending_removal(id) {
                return known;
            }
            guard.pending.push(PendingOp::Remove(id));
            return true;
        }
        match guard.index_of(id) {
            Some(index) => {
                guard.pollfds.remove(index);
                guard.entries.remove(index)
            }
            None => return false,
        }
    };
    log_removed(vec![removed]);
    true
}

fn subscribe_interval(inner: &Rc<RefCell<Inner>>, slot: Rc<IntervalFn>) -> Subscription {
    let id: SlotId = inner.borrow_mut().interval_slots.insert(slot);
    let weak = Rc::downgrade(inner);
    Subscription::new(move || {
        if let Some(inner) = weak.upgrade() {
            // dropped once the loop is released
            let _slot = inner.borrow_mut().interval_slots.remove(id);
        }
    })
}
