//! Set-once cache cells attached to otherwise immutable actions.
//!
//! Replay fills in information that is not part of the recorded payload
//! (checkpoints, last-executed statements, callback register locations).
//! [`CacheCell`] holds such a value: set at most once, read many times, never
//! serialized and ignored by equality so that parsed and recorded actions
//! compare field-for-field.

use std::cell::OnceCell;
use std::fmt;

/// A set-once cell excluded from equality and serialization.
pub struct CacheCell<T>(OnceCell<T>);

impl<T> CacheCell<T> {
    pub fn new() -> Self {
        CacheCell(OnceCell::new())
    }

    pub fn get(&self) -> Option<&T> {
        self.0.get()
    }

    /// Stores `value` unless the cell is already set. Returns whether the
    /// value was stored.
    pub fn set(&self, value: T) -> bool {
        self.0.set(value).is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }
}

impl<T> Default for CacheCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for CacheCell<T> {
    fn clone(&self) -> Self {
        CacheCell(self.0.clone())
    }
}

impl<T> PartialEq for CacheCell<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> fmt::Debug for CacheCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            f.write_str("CacheCell(set)")
        } else {
            f.write_str("CacheCell(empty)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_once() {
        let cell = CacheCell::new();
        assert!(cell.set(1));
        assert!(!cell.set(2));
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn ignored_by_equality() {
        let a = CacheCell::new();
        let b = CacheCell::new();
        a.set("x");
        assert_eq!(a, b);
    }
}
