//! # Request Store
//!
//! Per-request key/value storage shared by middleware and handlers.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Only handles value storage and retrieval
//! - **O**: Extensible via `get::<T>()` for any type
//! - **D**: Handlers depend on keys and types, not on who stored the value

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased per-request storage
///
/// Values are reference counted so that a detached copy of a context (see
/// [`Context::detach`](crate::context::Context::detach)) shares them cheaply.
///
/// # Example
///
/// ```ignore
/// ctx.set("user", User { id: 7 });
/// let user = ctx.get::<User>("user");
/// ```
#[derive(Clone, Default)]
pub struct Store {
    data: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Store {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value with a string key
    ///
    /// Overwrites any existing value with the same key.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), Arc::new(value));
    }

    /// Borrow a value by key
    ///
    /// Returns `None` if key doesn't exist or type doesn't match.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Check if a key exists
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Remove a value by key
    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Get the number of stored items
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remove everything, keeping the allocation
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}
