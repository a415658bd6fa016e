//! Slot lists and the subscription handles that detach from them.

use std::rc::Rc;

/// Identifies one slot within a [`SlotList`]
pub(crate) type SlotId = u64;

/// Ordered callback list.
///
/// Callbacks are reference counted so a firing can run from a snapshot while
/// the list itself is changed by the callbacks.
pub(crate) struct SlotList<F: ?Sized> {
    next_id: SlotId,
    slots: Vec<(SlotId, Rc<F>)>,
}

impl<F: ?Sized> Default for SlotList<F> {
    fn default() -> Self {
        SlotList {
            next_id: 0,
            slots: Vec::new(),
        }
    }
}

impl<F: ?Sized> SlotList<F> {
    pub(crate) fn insert(&mut self, slot: Rc<F>) -> SlotId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push((id, slot));
        id
    }

    /// Take the slot out of the list.
    ///
    /// The slot is handed back so the caller can drop it after releasing any
    /// borrow of the list; dropping it may run further unsubscriptions.
    pub(crate) fn remove(&mut self, id: SlotId) -> Option<Rc<F>> {
        let index = self.slots.iter().position(|(slot_id, _)| *slot_id == id)?;
        Some(self.slots.remove(index).1)
    }

    pub(crate) fn contains(&self, id: SlotId) -> bool {
        self.slots.iter().any(|(slot_id, _)| *slot_id == id)
    }

    pub(crate) fn snapshot(&self) -> Vec<(SlotId, Rc<F>)> {
        self.slots.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Keeps a registered callback alive.
///
/// Dropping the handle unsubscribes the callback. Use [`Subscription::detach`]
/// to keep it registered for as long as its registry exists.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Leave the callback registered permanently
    pub fn detach(mut self) {
        self.cancel = None;
    }

    /// Unsubscribe now
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_snapshot_survives_removal() {
        let mut list: SlotList<dyn Fn() -> u32> = SlotList::default();
        let a = list.insert(Rc::new(|| 1));
        let b = list.insert(Rc::new(|| 2));
        let snapshot = list.snapshot();
        assert_eq!(list.remove(a).map(|f| f()), Some(1));
        assert!(list.remove(a).is_none());
        assert!(list.contains(b));
        assert_eq!(list.len(), 1);
        let sum: u32 = snapshot.iter().map(|(_, f)| f()).sum();
        assert_eq!(sum, 3);
    }

    #[test]
    fn test_subscription_drop_and_detach() {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        drop(Subscription::new(move || c.set(c.get() + 1)));
        assert_eq!(count.get(), 1);

        let c = count.clone();
        Subscription::new(move || c.set(c.get() + 1)).detach();
        assert_eq!(count.get(), 1);
    }
}
