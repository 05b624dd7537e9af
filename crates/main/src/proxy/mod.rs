//! The capability-based interception protocol: proxy handlers and the
//! string-keyed virtual-property fast path.

use std::{rc::Rc, sync::Arc};

use compact_str::CompactString;
use indexmap::IndexMap;

use crate::{
    bridge::surface_host_error,
    engine::heap::ScriptVal,
    error::{ScriptError, ScriptResult},
    runtime::{Runtime, RuntimeShared, Value},
};

/// A host object exposed to script through interception capabilities.
///
/// Every capability has a permissive default: an unknown `get` falls
/// through to "not found" rather than an error, `has` consults the
/// advertised key set, and `invoke` rejects the call. Implement only the
/// capabilities the object actually supports.
///
/// All capabilities run on the runtime's owning thread, inside a dispatch
/// scope: wrappers they receive or create die with the trap call unless
/// escaped.
pub trait ProxyHandler {
    /// Property read. `Ok(None)` means the handler does not intercept the
    /// property.
    fn get(&self, runtime: &Runtime, name: &str) -> ScriptResult<Option<Value>> {
        let _ = (runtime, name);

        Ok(None)
    }

    /// Property write. Returns whether the write was accepted.
    fn set(&self, runtime: &Runtime, name: &str, value: Value) -> ScriptResult<bool> {
        let _ = (runtime, name, value);

        Ok(false)
    }

    /// Property existence. The default consults [ProxyHandler::own_keys].
    fn has(&self, runtime: &Runtime, name: &str) -> ScriptResult<bool> {
        Ok(self.own_keys(runtime)?.iter().any(|key| key.as_str() == name))
    }

    /// Property deletion. Returns whether the property was deleted.
    fn delete(&self, runtime: &Runtime, name: &str) -> ScriptResult<bool> {
        let _ = (runtime, name);

        Ok(false)
    }

    /// Enumerates the advertised property keys, and only those.
    fn own_keys(&self, runtime: &Runtime) -> ScriptResult<Vec<CompactString>> {
        let _ = runtime;

        Ok(Vec::new())
    }

    /// Call interception when the proxy itself is invoked.
    fn invoke(&self, runtime: &Runtime, this: Value, args: Vec<Value>) -> ScriptResult<Value> {
        let _ = (runtime, this, args);

        Err(ScriptError::SignatureMismatch {
            message: CompactString::from("proxy target is not callable"),
        })
    }
}

type VirtualGetter = Rc<dyn Fn(&Runtime) -> ScriptResult<Value>>;

/// The string-getter fast path: a fixed, enumerable set of lazily computed
/// properties.
///
/// A convenient [ProxyHandler] for host objects whose surface is a known
/// list of named values: `get` consults the table, `own_keys` advertises
/// exactly the registered names.
#[derive(Default)]
pub struct VirtualProperties {
    properties: IndexMap<CompactString, VirtualGetter>,
}

impl VirtualProperties {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named lazy property. Later registrations of the same
    /// name win.
    pub fn property(
        mut self,
        name: &str,
        getter: impl Fn(&Runtime) -> ScriptResult<Value> + 'static,
    ) -> Self {
        self.properties
            .insert(CompactString::from(name), Rc::new(getter));

        self
    }
}

impl ProxyHandler for VirtualProperties {
    fn get(&self, runtime: &Runtime, name: &str) -> ScriptResult<Option<Value>> {
        match self.properties.get(name) {
            Some(getter) => Ok(Some(getter(runtime)?)),
            None => Ok(None),
        }
    }

    fn has(&self, _runtime: &Runtime, name: &str) -> ScriptResult<bool> {
        Ok(self.properties.contains_key(name))
    }

    fn own_keys(&self, _runtime: &Runtime) -> ScriptResult<Vec<CompactString>> {
        Ok(self.properties.keys().cloned().collect())
    }
}

fn resolve_handler(
    shared: &Arc<RuntimeShared>,
    handler: u64,
) -> Result<Rc<dyn ProxyHandler>, String> {
    match shared.proxies.borrow().get(&handler) {
        Some(handler) => Ok(Rc::clone(handler)),
        None => Err(String::from("Error: proxy handler is retired")),
    }
}

pub(crate) fn trap_get(
    shared: &Arc<RuntimeShared>,
    handler: u64,
    name: &str,
) -> Result<Option<ScriptVal>, String> {
    let handler = resolve_handler(shared, handler)?;

    let runtime = Runtime {
        shared: Arc::clone(shared),
    };

    shared.push_scope();

    let outcome = match handler.get(&runtime, name) {
        Ok(Some(value)) => match shared.unwrap_value(&value) {
            Ok(value) => Ok(Some(value)),
            Err(error) => Err(surface_host_error(&error)),
        },

        Ok(None) => Ok(None),

        Err(error) => Err(surface_host_error(&error)),
    };

    shared.pop_scope();

    outcome
}

pub(crate) fn trap_set(
    shared: &Arc<RuntimeShared>,
    handler: u64,
    name: &str,
    value: ScriptVal,
) -> Result<bool, String> {
    let handler = resolve_handler(shared, handler)?;

    let runtime = Runtime {
        shared: Arc::clone(shared),
    };

    shared.push_scope();

    let value = shared.wrap(value);

    let outcome = match handler.set(&runtime, name, value) {
        Ok(accepted) => Ok(accepted),
        Err(error) => Err(surface_host_error(&error)),
    };

    shared.pop_scope();

    outcome
}

pub(crate) fn trap_has(
    shared: &Arc<RuntimeShared>,
    handler: u64,
    name: &str,
) -> Result<bool, String> {
    let handler = resolve_handler(shared, handler)?;

    let runtime = Runtime {
        shared: Arc::clone(shared),
    };

    match handler.has(&runtime, name) {
        Ok(found) => Ok(found),
        Err(error) => Err(surface_host_error(&error)),
    }
}

pub(crate) fn trap_delete(
    shared: &Arc<RuntimeShared>,
    handler: u64,
    name: &str,
) -> Result<bool, String> {
    let handler = resolve_handler(shared, handler)?;

    let runtime = Runtime {
        shared: Arc::clone(shared),
    };

    match handler.delete(&runtime, name) {
        Ok(deleted) => Ok(deleted),
        Err(error) => Err(surface_host_error(&error)),
    }
}

pub(crate) fn trap_invoke(
    shared: &Arc<RuntimeShared>,
    handler: u64,
    this: ScriptVal,
    args: Vec<ScriptVal>,
) -> Result<ScriptVal, String> {
    let handler = resolve_handler(shared, handler)?;

    let runtime = Runtime {
        shared: Arc::clone(shared),
    };

    shared.push_scope();

    let this = shared.wrap(this);
    let args: Vec<Value> = args.into_iter().map(|arg| shared.wrap(arg)).collect();

    let outcome = match handler.invoke(&runtime, this, args) {
        Ok(value) => match shared.unwrap_value(&value) {
            Ok(value) => Ok(value),
            Err(error) => Err(surface_host_error(&error)),
        },

        Err(error) => Err(surface_host_error(&error)),
    };

    shared.pop_scope();

    outcome
}

pub(crate) fn trap_own_keys(
    shared: &Arc<RuntimeShared>,
    handler: u64,
) -> ScriptResult<Vec<CompactString>> {
    let handler = match shared.proxies.borrow().get(&handler) {
        Some(handler) => Rc::clone(handler),
        None => return Err(ScriptError::StaleHandle),
    };

    let runtime = Runtime {
        shared: Arc::clone(shared),
    };

    handler.own_keys(&runtime)
}
