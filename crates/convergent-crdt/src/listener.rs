//! Synchronous observer callbacks invoked on every applied update.
//!
//! The source threads a list of plain function references through each
//! map/register/counter type and lets callers append/detach by
//! identity. Rust closures aren't nominally comparable the way Python
//! function objects are, so `add_listener` hands back an opaque handle
//! and `remove_listener` takes that handle back -- the same shape,
//! adapted to the type system.

use convergent_core::{CrdtError, StateUpdate};

/// A listener observes the view a CRDT settled on immediately after
/// applying `su`, and may fail -- a failure propagates to the caller of
/// `update`, but only after the merge has already committed.
pub type Listener<V> = Box<dyn FnMut(&V, &StateUpdate) -> Result<(), CrdtError>>;

pub struct ListenerHandle(usize);

/// An ordered, append-only-until-removed registry of listeners for one
/// CRDT instance.
pub struct Listeners<V> {
    slots: Vec<Option<Listener<V>>>,
}

impl<V> Default for Listeners<V> {
    fn default() -> Self {
        Listeners { slots: Vec::new() }
    }
}

impl<V> Listeners<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, f: Listener<V>) -> ListenerHandle {
        self.slots.push(Some(f));
        ListenerHandle(self.slots.len() - 1)
    }

    pub fn remove_listener(&mut self, handle: ListenerHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            *slot = None;
        }
    }

    /// Invokes every live listener in registration order. Stops at the
    /// first error and returns it -- the caller's `update` has already
    /// committed the merge by the time this runs.
    pub fn invoke(&mut self, view: &V, su: &StateUpdate) -> Result<(), CrdtError> {
        for slot in self.slots.iter_mut() {
            if let Some(f) = slot {
                f(view, su)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn invokes_registered_listeners_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut listeners: Listeners<i32> = Listeners::new();
        let calls_clone = calls.clone();
        listeners.add_listener(Box::new(move |_v, _su| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let su = StateUpdate::new([0; 16], 1, Payload::Value(convergent_core::Value::Int(1)));
        listeners.invoke(&1, &su).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_listener_stops_firing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut listeners: Listeners<i32> = Listeners::new();
        let calls_clone = calls.clone();
        let handle = listeners.add_listener(Box::new(move |_v, _su| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        listeners.remove_listener(handle);
        let su = StateUpdate::new([0; 16], 1, Payload::Value(convergent_core::Value::Int(1)));
        listeners.invoke(&1, &su).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
