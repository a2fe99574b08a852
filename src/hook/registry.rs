// Handle-keyed registries
//
// Hooks are plain `extern "system"` functions, so whatever they need has to be
// reachable from a handle. Each registry maps the raw value of a dispatchable
// handle to the state kept for it. Entries are independent: two devices never
// share overlay state.

use ash::vk::Handle;
use parking_lot::Mutex;
use std::collections::BTreeMap;

pub struct Registry<T> {
    entries: Mutex<BTreeMap<u64, T>>,
}

impl<T> Registry<T> {
    pub const fn new() -> Self {
        Self {
            entries: parking_lot::const_mutex(BTreeMap::new()),
        }
    }

    /// Insert or replace, returning the previous entry
    pub fn insert<H: Handle>(&self, handle: H, value: T) -> Option<T> {
        self.entries.lock().insert(handle.as_raw(), value)
    }

    pub fn remove<H: Handle>(&self, handle: H) -> Option<T> {
        self.entries.lock().remove(&handle.as_raw())
    }

    pub fn contains<H: Handle>(&self, handle: H) -> bool {
        self.entries.lock().contains_key(&handle.as_raw())
    }

    /// Run `f` on the entry while holding the lock.
    pub fn with<H: Handle, R>(&self, handle: H, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.entries.lock().get_mut(&handle.as_raw()).map(f)
    }

    /// First entry for which `f` returns something.
    pub fn find_map<R>(&self, f: impl FnMut(&T) -> Option<R>) -> Option<R> {
        self.entries.lock().values().find_map(f)
    }

    /// Drop every entry matching `f`, returning how many went.
    pub fn remove_where(&self, mut f: impl FnMut(&T) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, value| !f(value));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
