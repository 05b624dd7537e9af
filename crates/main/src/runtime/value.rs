use std::{
    cell::Cell,
    fmt::{Debug, Formatter},
    sync::Arc,
    thread,
};

use compact_str::CompactString;

use crate::{
    engine::{
        eval::{
            call_value_of, delete_property_of, get_property_of, set_property_of, to_display,
            EvalError, Host,
        },
        heap::{Handle, HeapValue, Microtask, PromiseState, ScriptVal},
    },
    error::{ScriptError, ScriptResult, ScriptingDetails},
    runtime::RuntimeShared,
};

/// The kind of script value a [Value] wraps.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Bytes,
    Function,
    Map,
    Set,
    Date,
    Error,
    Symbol,
    Promise,
    Proxy,
    GlobalObject,
}

/// The observable state of a wrapped promise.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PromiseKind {
    Pending,
    Fulfilled,
    Rejected,
}

enum Repr {
    /// Host-side copy of a primitive. Never holds a registry reference.
    Primitive(ScriptVal),

    /// The distinguished global object wrapper.
    Global,

    /// A registry reference into the engine heap.
    Reference { handle: Handle, kind: ValueKind },
}

/// A host-side wrapper of a script value.
///
/// Primitive kinds are plain copies. Reference kinds own exactly one registry
/// reference which is released when the wrapper is closed, dropped, or its
/// enclosing [Scope](crate::runtime::Scope) exits. After release the wrapper
/// is stale: accessors fail with [ScriptError::StaleHandle] and never
/// dereference the dead handle.
///
/// Dropping a wrapper on a thread that does not own its runtime defers the
/// release to the owner's next runtime call.
pub struct Value {
    shared: Arc<RuntimeShared>,
    repr: Repr,
    released: Cell<bool>,
}

impl Debug for Value {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Repr::Primitive(value) => {
                formatter.write_fmt(format_args!("Value({value:?})"))
            }

            Repr::Global => formatter.write_str("Value(GlobalObject)"),

            Repr::Reference { handle, kind } => formatter.write_fmt(format_args!(
                "Value({kind:?}, ref {})",
                handle.id,
            )),
        }
    }
}

impl Value {
    pub(crate) fn primitive(shared: Arc<RuntimeShared>, value: ScriptVal) -> Self {
        Self {
            shared,
            repr: Repr::Primitive(value),
            released: Cell::new(false),
        }
    }

    pub(crate) fn global(shared: Arc<RuntimeShared>) -> Self {
        Self {
            shared,
            repr: Repr::Global,
            released: Cell::new(false),
        }
    }

    pub(crate) fn reference(shared: Arc<RuntimeShared>, handle: Handle, kind: ValueKind) -> Self {
        Self {
            shared,
            repr: Repr::Reference { handle, kind },
            released: Cell::new(false),
        }
    }

    #[inline(always)]
    pub(crate) fn runtime_id(&self) -> u64 {
        self.shared.id
    }

    #[inline(always)]
    pub(crate) fn handle_id(&self) -> Option<u64> {
        match &self.repr {
            Repr::Reference { handle, .. } => Some(handle.id),
            _ => None,
        }
    }

    #[inline(always)]
    pub(crate) fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    /// The engine-side value behind this wrapper, with liveness verified.
    pub(crate) fn script_val(&self) -> ScriptResult<ScriptVal> {
        match &self.repr {
            Repr::Primitive(value) => Ok(value.clone()),

            Repr::Global => Ok(ScriptVal::Ref(self.shared.engine.borrow().global_slot())),

            Repr::Reference { handle, .. } => {
                if self.released.get() {
                    return Err(ScriptError::StaleHandle);
                }

                let slot = self.shared.engine.borrow().resolve(*handle)?;

                Ok(ScriptVal::Ref(slot))
            }
        }
    }

    pub fn kind(&self) -> ValueKind {
        match &self.repr {
            Repr::Primitive(ScriptVal::Undefined) => ValueKind::Undefined,
            Repr::Primitive(ScriptVal::Null) => ValueKind::Null,
            Repr::Primitive(ScriptVal::Bool(_)) => ValueKind::Boolean,
            Repr::Primitive(ScriptVal::Number(_)) => ValueKind::Number,
            Repr::Primitive(ScriptVal::String(_)) => ValueKind::String,
            Repr::Primitive(ScriptVal::Ref(_)) => ValueKind::Object,
            Repr::Global => ValueKind::GlobalObject,
            Repr::Reference { kind, .. } => *kind,
        }
    }

    #[inline(always)]
    pub fn is_undefined(&self) -> bool {
        self.kind() == ValueKind::Undefined
    }

    #[inline(always)]
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self.kind(), ValueKind::Null | ValueKind::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.repr {
            Repr::Primitive(ScriptVal::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.repr {
            Repr::Primitive(ScriptVal::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.repr {
            Repr::Primitive(ScriptVal::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    /// The engine's string rendering of the value.
    pub fn to_text(&self) -> ScriptResult<CompactString> {
        self.shared.gate()?;

        let value = self.script_val()?;

        Ok(to_display(&value, &self.shared.engine.borrow()))
    }

    /// Registers a second reference to the same script value. The clone's
    /// lifecycle is independent of this wrapper's.
    pub fn try_clone(&self) -> ScriptResult<Value> {
        self.shared.gate()?;

        match &self.repr {
            Repr::Primitive(value) => {
                Ok(Value::primitive(Arc::clone(&self.shared), value.clone()))
            }

            Repr::Global => Ok(Value::global(Arc::clone(&self.shared))),

            Repr::Reference { .. } => {
                let value = self.script_val()?;

                Ok(self.shared.wrap(value))
            }
        }
    }

    /// Releases the wrapper's registry reference. Closing a primitive, the
    /// global wrapper, or an already closed wrapper is a no-op.
    pub fn close(&self) -> ScriptResult<()> {
        let Repr::Reference { handle, .. } = &self.repr else {
            return Ok(());
        };

        if self.released.get() {
            return Ok(());
        }

        if self.shared.is_closed() {
            self.released.set(true);

            return Ok(());
        }

        self.shared.gate()?;
        self.released.set(true);
        self.shared.engine.borrow_mut().release_ref(handle.id);

        Ok(())
    }

    /// Drops (or restores) the host's strong claim on the script value. A
    /// weak wrapper's handle may be invalidated by any collection pass.
    ///
    /// No-op on primitives and on the global wrapper, which cannot be
    /// weakened.
    pub fn set_weak(&self, weak: bool) -> ScriptResult<()> {
        let Repr::Reference { handle, .. } = &self.repr else {
            return Ok(());
        };

        self.shared.gate()?;
        self.shared.engine.borrow_mut().set_weak(handle.id, weak)
    }

    pub fn is_weak(&self) -> ScriptResult<bool> {
        let Repr::Reference { handle, .. } = &self.repr else {
            return Ok(false);
        };

        self.shared.gate()?;

        Ok(self.shared.engine.borrow().is_weak(handle.id))
    }

    /// Reads a property, dispatching accessors and proxy traps as needed.
    pub fn get(&self, name: &str) -> ScriptResult<Value> {
        self.shared.gate()?;

        let object = self.script_val()?;

        let result = get_property_of(&self.shared, &object, name)
            .map_err(|error| surface_eval_error(&self.shared, error))?;

        Ok(self.shared.wrap(result))
    }

    /// Writes a property, dispatching setters and proxy traps as needed.
    pub fn set(&self, name: &str, value: &Value) -> ScriptResult<()> {
        self.shared.gate()?;

        let object = self.script_val()?;
        let value = self.shared.unwrap_value(value)?;

        set_property_of(&self.shared, &object, name, value)
            .map_err(|error| surface_eval_error(&self.shared, error))
    }

    pub fn has(&self, name: &str) -> ScriptResult<bool> {
        self.shared.gate()?;

        let object = self.script_val()?;

        let slot = match object {
            ScriptVal::Ref(slot) => slot,
            _ => return Ok(false),
        };

        let handler = {
            let engine = self.shared.engine.borrow();

            match engine.slot_value(slot) {
                HeapValue::Object(map) => return Ok(map.contains_key(name)),

                HeapValue::Array(items) => {
                    return Ok(name
                        .parse::<usize>()
                        .map(|index| index < items.len())
                        .unwrap_or(false));
                }

                HeapValue::Proxy(handler) => *handler,

                _ => return Ok(false),
            }
        };

        self.shared
            .proxy_has(handler, name)
            .map_err(surface_trap_error)
    }

    pub fn delete(&self, name: &str) -> ScriptResult<bool> {
        self.shared.gate()?;

        let object = self.script_val()?;

        delete_property_of(&self.shared, &object, name)
            .map_err(|error| surface_eval_error(&self.shared, error))
    }

    /// Enumerates own property keys. For proxies this consults the
    /// `own_keys` capability and reports only advertised keys.
    pub fn own_keys(&self) -> ScriptResult<Vec<CompactString>> {
        self.shared.gate()?;

        let object = self.script_val()?;

        let slot = match object {
            ScriptVal::Ref(slot) => slot,
            _ => return Ok(Vec::new()),
        };

        let handler = {
            let engine = self.shared.engine.borrow();

            match engine.slot_value(slot) {
                HeapValue::Object(map) => return Ok(map.keys().cloned().collect()),

                HeapValue::Array(items) => {
                    return Ok((0..items.len())
                        .map(|index| CompactString::from(index.to_string()))
                        .collect());
                }

                HeapValue::Proxy(handler) => *handler,

                _ => return Ok(Vec::new()),
            }
        };

        crate::proxy::trap_own_keys(&self.shared, handler)
    }

    /// The element count of an array, byte buffer, map, or set, or the
    /// character count of a string.
    pub fn length(&self) -> ScriptResult<usize> {
        if let Repr::Primitive(ScriptVal::String(value)) = &self.repr {
            return Ok(value.chars().count());
        }

        self.shared.gate()?;

        let object = self.script_val()?;

        let slot = match object {
            ScriptVal::Ref(slot) => slot,
            _ => return Ok(0),
        };

        let engine = self.shared.engine.borrow();

        Ok(match engine.slot_value(slot) {
            HeapValue::Array(items) => items.len(),
            HeapValue::Bytes(bytes) => bytes.len(),
            HeapValue::Map(map) => map.len(),
            HeapValue::Set(set) => set.len(),
            _ => 0,
        })
    }

    pub fn get_index(&self, index: usize) -> ScriptResult<Value> {
        self.get(&index.to_string())
    }

    pub fn set_index(&self, index: usize, value: &Value) -> ScriptResult<()> {
        self.set(&index.to_string(), value)
    }

    /// Invokes the wrapped function with an optional receiver.
    pub fn call(&self, this: Option<&Value>, args: &[Value]) -> ScriptResult<Value> {
        self.shared.gate()?;

        let callee = self.script_val()?;

        let this = match this {
            Some(this) => self.shared.unwrap_value(this)?,
            None => ScriptVal::Undefined,
        };

        let mut arg_values = Vec::with_capacity(args.len());

        for arg in args {
            arg_values.push(self.shared.unwrap_value(arg)?);
        }

        self.shared.engine.borrow_mut().enter_execution();

        let result = call_value_of(&self.shared, &callee, this, arg_values);

        // Wrap before the frame unwinds: a collection deferred from inside
        // the call would treat the unrooted result as garbage.
        let result = result.map(|value| self.shared.wrap(value));

        let outcome = self.shared.engine.borrow_mut().leave_execution();

        if let Some(outcome) = outcome {
            self.shared.retire(&outcome);
        }

        result.map_err(|error| surface_eval_error(&self.shared, error))
    }

    /// The raw bytes of a byte-buffer value.
    pub fn bytes(&self) -> ScriptResult<Vec<u8>> {
        self.shared.gate()?;

        let object = self.script_val()?;

        if let ScriptVal::Ref(slot) = object {
            if let HeapValue::Bytes(bytes) = self.shared.engine.borrow().slot_value(slot) {
                return Ok(bytes.clone());
            }
        }

        Err(ScriptError::Conversion {
            message: CompactString::from("value is not a byte buffer"),
        })
    }

    /// The epoch-millisecond instant of a date value.
    pub fn epoch_millis(&self) -> ScriptResult<i64> {
        self.shared.gate()?;

        let object = self.script_val()?;

        if let ScriptVal::Ref(slot) = object {
            if let HeapValue::Date(millis) = self.shared.engine.borrow().slot_value(slot) {
                return Ok(*millis);
            }
        }

        Err(ScriptError::Conversion {
            message: CompactString::from("value is not a date"),
        })
    }

    pub fn promise_state(&self) -> ScriptResult<PromiseKind> {
        self.shared.gate()?;

        let object = self.script_val()?;

        if let ScriptVal::Ref(slot) = object {
            if let HeapValue::Promise(state) = self.shared.engine.borrow().slot_value(slot) {
                return Ok(match state {
                    PromiseState::Pending => PromiseKind::Pending,
                    PromiseState::Fulfilled(_) => PromiseKind::Fulfilled,
                    PromiseState::Rejected(_) => PromiseKind::Rejected,
                });
            }
        }

        Err(ScriptError::Conversion {
            message: CompactString::from("value is not a promise"),
        })
    }

    /// The settlement value of a fulfilled or rejected promise.
    pub fn promise_result(&self) -> ScriptResult<Value> {
        self.shared.gate()?;

        let object = self.script_val()?;

        let settled = if let ScriptVal::Ref(slot) = object {
            match self.shared.engine.borrow().slot_value(slot) {
                HeapValue::Promise(PromiseState::Fulfilled(value))
                | HeapValue::Promise(PromiseState::Rejected(value)) => Some(value.clone()),

                HeapValue::Promise(PromiseState::Pending) => Some(ScriptVal::Undefined),

                _ => None,
            }
        } else {
            None
        };

        match settled {
            Some(value) => Ok(self.shared.wrap(value)),

            None => Err(ScriptError::Conversion {
                message: CompactString::from("value is not a promise"),
            }),
        }
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        let Repr::Reference { handle, .. } = &self.repr else {
            return;
        };

        if self.released.get() || self.shared.is_closed() {
            return;
        }

        let owned = {
            let owner = self.shared.owner_state();

            owner.thread == Some(thread::current().id())
        };

        if !owned {
            self.shared.defer_release(handle.id);

            return;
        }

        // A wrapper dropped inside a dispatched callback finds the engine
        // borrowed; defer to the next gate pass.
        match self.shared.engine.try_borrow_mut() {
            Ok(mut engine) => {
                engine.release_ref(handle.id);
            }

            Err(_) => self.shared.defer_release(handle.id),
        }
    }
}

/// Settles a pending promise created through
/// [Runtime::create_promise](crate::runtime::Runtime::create_promise).
///
/// Settling enqueues a microtask; the state transition becomes observable
/// after [pump_message_loop](crate::runtime::Runtime::pump_message_loop).
pub struct PromiseResolver {
    value: Value,
}

impl PromiseResolver {
    pub(crate) fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn resolve(&self, settlement: &Value) -> ScriptResult<()> {
        self.settle(settlement, true)
    }

    pub fn reject(&self, settlement: &Value) -> ScriptResult<()> {
        self.settle(settlement, false)
    }

    fn settle(&self, settlement: &Value, fulfilled: bool) -> ScriptResult<()> {
        let shared = self.value.shared();

        shared.gate()?;

        let promise = match self.value.script_val()? {
            ScriptVal::Ref(slot) => slot,
            _ => return Err(ScriptError::StaleHandle),
        };

        let settlement = shared.unwrap_value(settlement)?;

        shared.engine.borrow_mut().enqueue_microtask(Microtask::Settle {
            promise,
            value: settlement,
            fulfilled,
        });

        Ok(())
    }
}

/// Maps an abrupt evaluator completion triggered from host-side value access
/// into the public error taxonomy.
pub(crate) fn surface_eval_error(shared: &RuntimeShared, error: EvalError) -> ScriptError {
    match error {
        EvalError::Thrown { message, .. } => ScriptError::Execution {
            details: ScriptingDetails {
                message,
                resource_name: String::from("undefined"),
                source_line: String::new(),
                line_number: 1,
                start_column: 0,
                end_column: 0,
                start_position: 0,
                end_position: 0,
            },
        },

        EvalError::Terminated => {
            shared
                .terminate
                .store(false, std::sync::atomic::Ordering::Release);

            ScriptError::Terminated
        }
    }
}

fn surface_trap_error(message: String) -> ScriptError {
    ScriptError::Execution {
        details: ScriptingDetails {
            message,
            resource_name: String::from("undefined"),
            source_line: String::new(),
            line_number: 1,
            start_column: 0,
            end_column: 0,
            start_position: 0,
            end_position: 0,
        },
    }
}
