//! Single-threaded change notifications.
//!
//! Listeners are keyed by a [`ListenerId`] so a subscriber can check whether
//! it is already connected and never registers twice.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Identity of a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<T> = Rc<dyn Fn(&T)>;

pub struct Signal<T> {
    listeners: RefCell<Vec<(ListenerId, Callback<T>)>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
        }
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `id`. Returns `false` without registering
    /// when `id` is already connected.
    pub fn connect(&self, id: ListenerId, callback: impl Fn(&T) + 'static) -> bool {
        if self.is_connected(id) {
            return false;
        }
        self.listeners.borrow_mut().push((id, Rc::new(callback)));
        true
    }

    /// Remove the listener registered under `id`. Returns whether one existed.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    pub fn is_connected(&self, id: ListenerId) -> bool {
        self.listeners.borrow().iter().any(|(listener, _)| *listener == id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Invoke every listener. Listeners may connect or disconnect while the
    /// signal is being emitted; changes apply to the next emission.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
