//! Typed state container shared by the steps of one run.

use crate::errors::StateError;
use crate::ui::{TracingUi, Ui};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed key into a [`StateBag`].
///
/// The value type is part of the key, so a read can only fail because the
/// key was never written.
pub struct StateKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    /// Declares a key. Names must be unique across all keys.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Returns the key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateKey").field(&self.name).finish()
    }
}

/// Run-scoped key/value bag passed through every step.
#[derive(Default)]
pub struct StateBag {
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl StateBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a value, replacing any previous one.
    pub fn put<T: Any + Send + Sync>(&mut self, key: StateKey<T>, value: T) {
        self.values.insert(key.name, Box::new(value));
    }

    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Missing`] if no earlier step wrote the key.
    pub fn get<T: Any + Send + Sync>(&self, key: StateKey<T>) -> Result<&T, StateError> {
        let raw = self.values.get(key.name).ok_or_else(|| StateError::Missing {
            key: key.name.to_string(),
        })?;
        raw.downcast_ref::<T>().ok_or_else(|| StateError::TypeMismatch {
            key: key.name.to_string(),
        })
    }

    /// Reads a value that may legitimately be absent.
    #[must_use]
    pub fn get_opt<T: Any + Send + Sync>(&self, key: StateKey<T>) -> Option<&T> {
        self.values.get(key.name).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutably borrows a value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Missing`] if no earlier step wrote the key.
    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: StateKey<T>) -> Result<&mut T, StateError> {
        let raw = self
            .values
            .get_mut(key.name)
            .ok_or_else(|| StateError::Missing {
                key: key.name.to_string(),
            })?;
        raw.downcast_mut::<T>().ok_or_else(|| StateError::TypeMismatch {
            key: key.name.to_string(),
        })
    }

    /// Removes and returns a value.
    pub fn remove<T: Any + Send + Sync>(&mut self, key: StateKey<T>) -> Option<T> {
        let raw = self.values.remove(key.name)?;
        raw.downcast::<T>().ok().map(|b| *b)
    }

    /// Returns true if the key has been written.
    #[must_use]
    pub fn contains<T>(&self, key: StateKey<T>) -> bool {
        self.values.contains_key(key.name)
    }

    /// Returns the written key names, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.values.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the UI stored under [`super::keys::UI`], or a tracing UI.
    #[must_use]
    pub fn ui(&self) -> Arc<dyn Ui> {
        self.get_opt(super::keys::UI)
            .cloned()
            .unwrap_or_else(|| Arc::new(TracingUi::new()))
    }
}

impl fmt::Debug for StateBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateBag").field("keys", &self.keys()).finish()
    }
}
