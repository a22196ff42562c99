//! Process-wide global state.
//!
//! The frame allocator's bitmap, the active PML4 root, and the DWARF
//! context all need a home before the heap exists, which rules out a
//! `Box`-backed `OnceLock`. [`OnceCell`] wraps `spin::Once` instead: no
//! allocation, call-once semantics, available from the first instruction
//! after the Limine handshake.

use spin::Once;

/// A cell that is written at most once and read many times thereafter.
/// Reading before it is initialized returns `None` rather than blocking --
/// this kernel is single-threaded, so a caller observing an uninitialized
/// cell has a bug, not a race, and should treat it as a logic error.
pub struct OnceCell<T> {
    inner: Once<T>,
}

impl<T> OnceCell<T> {
    pub const fn new() -> Self {
        Self { inner: Once::new() }
    }

    pub fn get(&self) -> Option<&T> {
        self.inner.poll()
    }

    /// Initializes the cell. Returns the now-stored value either way; if the
    /// cell was already initialized, `value` is dropped and the existing
    /// value is returned.
    pub fn set(&self, value: T) -> &T {
        self.inner.call_once(|| value)
    }

    pub fn get_or_init<F: FnOnce() -> T>(&self, f: F) -> &T {
        self.inner.call_once(f)
    }
}

impl<T> Default for OnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_before_set_is_none() {
        let cell: OnceCell<u32> = OnceCell::new();
        assert_eq!(cell.get(), None);
    }

    #[test]
    fn set_then_get_returns_value() {
        let cell = OnceCell::new();
        cell.set(42u32);
        assert_eq!(cell.get(), Some(&42));
    }

    #[test]
    fn second_set_is_ignored() {
        let cell = OnceCell::new();
        cell.set(1u32);
        cell.set(2u32);
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn get_or_init_only_runs_the_closure_once() {
        let cell = OnceCell::new();
        let mut calls = 0;
        for _ in 0..3 {
            cell.get_or_init(|| {
                calls += 1;
                7u32
            });
        }
        assert_eq!(*cell.get().unwrap(), 7);
        assert_eq!(calls, 1);
    }
}
