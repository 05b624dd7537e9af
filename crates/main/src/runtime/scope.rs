use std::sync::Arc;

use crate::{
    error::{ScriptError, ScriptResult},
    report::system_panic,
    runtime::{Runtime, Value},
};

/// A reference scope pushed by [Runtime::scope].
///
/// Every reference wrapper created while this scope is the top of the
/// runtime's scope stack belongs to it and is released when the scope exits,
/// regardless of whether the closure returned normally or bailed out with
/// `?`. [Scope::escape] is the one way out.
pub struct Scope<'a> {
    runtime: &'a Runtime,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    #[inline(always)]
    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// Promotes a wrapper out of this scope: into the enclosing scope if one
    /// exists, otherwise to the caller, which then owns the release.
    ///
    /// Escaping a primitive or the global wrapper is a no-op. Escaping
    /// through a runtime that has been torn down is a lifecycle contract
    /// violation and fails fast.
    pub fn escape(&self, value: Value) -> ScriptResult<Value> {
        let shared = &self.runtime.shared;

        if shared.is_closed() {
            system_panic!("Escape from a scope of a closed runtime.");
        }

        if !Arc::ptr_eq(value.shared(), shared) {
            return Err(ScriptError::CrossRuntimeHandle);
        }

        let Some(id) = value.handle_id() else {
            return Ok(value);
        };

        let mut scopes = shared.scopes.borrow_mut();
        let depth = scopes.len();

        if depth == 0 {
            return Ok(value);
        }

        let top = &mut scopes[depth - 1];

        if let Some(position) = top.members.iter().position(|member| *member == id) {
            top.members.swap_remove(position);

            if depth >= 2 {
                scopes[depth - 2].members.push(id);
            }
        }

        Ok(value)
    }
}
