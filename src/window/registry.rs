// Pending-window registry
//
// Windows that have a frame queued but not yet rendered. The main loop
// renders every entry once per iteration and only blocks in the platform
// wait while this is empty.

use crate::platform::WindowKey;

#[derive(Debug, Default)]
pub struct PendingRegistry {
    // Insertion order is the render order within one loop iteration.
    windows: Vec<WindowKey>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the window was already registered.
    pub fn insert(&mut self, key: WindowKey) -> bool {
        if self.contains(key) {
            return false;
        }
        self.windows.push(key);
        true
    }

    /// Returns false if the window was not registered.
    pub fn remove(&mut self, key: WindowKey) -> bool {
        match self.windows.iter().position(|&k| k == key) {
            Some(index) => {
                self.windows.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: WindowKey) -> bool {
        self.windows.contains(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Copy of the current entries, so rendering can mutate the registry.
    pub fn snapshot(&self) -> Vec<WindowKey> {
        self.windows.clone()
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}
