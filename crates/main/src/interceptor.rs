//! Batch registration of host callables onto script objects.

use std::rc::Rc;

use compact_str::CompactString;

use crate::{
    bridge::{CallbackSignature, Invocation},
    error::ScriptResult,
    runtime::{Runtime, Value},
};

/// A reusable bundle of host functionality installed onto script objects.
///
/// Both operations are idempotent: registering the same interceptor twice
/// overwrites its earlier installation, and unregistering treats an already
/// absent property as success.
pub trait Interceptor {
    /// Installs the interceptor onto every target object. Returns `false`
    /// when at least one installation failed, leaving the successful ones in
    /// place.
    fn register(&self, runtime: &Runtime, targets: &[Value]) -> ScriptResult<bool>;

    /// Removes the interceptor from every target object. Returns `false`
    /// when at least one removal failed.
    fn unregister(&self, runtime: &Runtime, targets: &[Value]) -> ScriptResult<bool>;
}

type BoundCallable = Rc<dyn Fn(&Invocation) -> ScriptResult<Option<Value>>>;

struct Binding {
    name: CompactString,
    signature: CallbackSignature,
    callable: BoundCallable,
}

/// An [Interceptor] that installs a fixed set of named host functions.
#[derive(Default)]
pub struct FunctionBinder {
    bindings: Vec<Binding>,
}

impl FunctionBinder {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named function to the bundle. Later bindings of the same name
    /// win at registration time.
    pub fn bind(
        mut self,
        name: &str,
        signature: CallbackSignature,
        callable: impl Fn(&Invocation) -> ScriptResult<Option<Value>> + 'static,
    ) -> Self {
        self.bindings.push(Binding {
            name: CompactString::from(name),
            signature,
            callable: Rc::new(callable),
        });

        self
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Interceptor for FunctionBinder {
    fn register(&self, runtime: &Runtime, targets: &[Value]) -> ScriptResult<bool> {
        let mut complete = true;

        for target in targets {
            for binding in &self.bindings {
                let callable = Rc::clone(&binding.callable);

                let bound = runtime.bind_to(
                    target,
                    binding.name.as_str(),
                    binding.signature,
                    move |invocation| callable(invocation),
                );

                match bound {
                    Ok(_) => (),

                    Err(error) => {
                        log::warn!("failed to bind {}: {error}", binding.name);
                        complete = false;
                    }
                }
            }
        }

        Ok(complete)
    }

    fn unregister(&self, runtime: &Runtime, targets: &[Value]) -> ScriptResult<bool> {
        let _ = runtime;

        let mut complete = true;

        for target in targets {
            for binding in &self.bindings {
                // An absent property is treated as already unregistered.
                match target.has(binding.name.as_str()) {
                    Ok(false) => continue,

                    Ok(true) => match target.delete(binding.name.as_str()) {
                        Ok(true) => (),

                        Ok(false) => complete = false,

                        Err(error) => {
                            log::warn!("failed to unbind {}: {error}", binding.name);
                            complete = false;
                        }
                    },

                    Err(error) => {
                        log::warn!("failed to probe {}: {error}", binding.name);
                        complete = false;
                    }
                }
            }
        }

        Ok(complete)
    }
}
