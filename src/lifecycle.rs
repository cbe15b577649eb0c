//! Lazily constructed process-wide instances
//!
//! [`LazyInstance`] builds its value on first access, exactly once, no
//! matter how many threads race to be first. It is meant to live in a
//! `static`:
//!
//! ```
//! use callpath::lifecycle::LazyInstance;
//! use callpath::registry::PathRegistry;
//!
//! static REGISTRY: LazyInstance<PathRegistry> = LazyInstance::new(PathRegistry::new);
//!
//! let registry = REGISTRY.get();
//! assert!(std::ptr::eq(registry, REGISTRY.get()));
//! ```
//!
//! # Protocol
//!
//! `get` first performs an acquire load of the published value and returns
//! it without locking when present. Otherwise it takes the initialization
//! lock, re-checks, runs the factory only if the value is still absent and
//! publishes the result with release ordering. `std::sync::OnceLock`
//! implements exactly this sequence.
//!
//! A value stored in a `static` is never dropped. For a registry that is
//! an intentional leak bounded by the number of distinct call paths.

use std::fmt;
use std::sync::OnceLock;

/// Value constructed on first use by a fixed factory
pub struct LazyInstance<T> {
    cell: OnceLock<T>,
    init: fn() -> T,
}

impl<T> LazyInstance<T> {
    pub const fn new(init: fn() -> T) -> Self {
        Self {
            cell: OnceLock::new(),
            init,
        }
    }

    /// Shared instance, constructing it if this is the first access
    pub fn get(&self) -> &T {
        if let Some(instance) = self.cell.get() {
            return instance;
        }

        self.cell.get_or_init(|| {
            tracing::debug!(
                instance = std::any::type_name::<T>(),
                "constructing lazy instance"
            );
            (self.init)()
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: fmt::Debug> fmt::Debug for LazyInstance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyInstance")
            .field("instance", &self.cell.get())
            .finish()
    }
}
