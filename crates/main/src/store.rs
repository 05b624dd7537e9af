//! A cache of named global objects, created on first access.

use std::cell::RefCell;

use ahash::AHashMap;
use compact_str::CompactString;

use crate::{
    error::ScriptResult,
    runtime::{Runtime, Value},
};

/// A per-runtime cache of named global objects.
///
/// `get_or_create` resolves a global property, materializing an empty object
/// when the property is absent, and caches the wrapper until the store is
/// closed. The store holds strong references; closing it releases them.
pub struct ObjectStore {
    runtime: Runtime,
    cache: RefCell<AHashMap<CompactString, Value>>,
}

impl ObjectStore {
    #[inline(always)]
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            cache: RefCell::new(AHashMap::new()),
        }
    }

    #[inline(always)]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Resolves the named global object, creating and installing an empty
    /// object if the global property is null or undefined. The returned
    /// wrapper is an independent clone of the cached one.
    pub fn get_or_create(&self, name: &str) -> ScriptResult<Value> {
        if let Some(value) = self.cache.borrow().get(name) {
            return value.try_clone();
        }

        let global = self.runtime.global();
        let existing = global.get(name)?;

        let value = match existing.is_null_or_undefined() {
            false => existing,

            true => {
                log::debug!("materializing global object {name}");

                let created = self.runtime.create_object()?;

                global.set(name, &created)?;

                created
            }
        };

        let cached = value.try_clone()?;

        self.cache
            .borrow_mut()
            .insert(CompactString::from(name), cached);

        Ok(value)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    /// Releases every cached reference. The store is reusable afterwards;
    /// subsequent lookups repopulate it.
    pub fn close(&self) -> ScriptResult<()> {
        let drained: Vec<(CompactString, Value)> =
            self.cache.borrow_mut().drain().collect();

        for (_, value) in drained {
            value.close()?;
        }

        Ok(())
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            log::warn!("object store drop left references behind: {error}");
        }
    }
}
