//! The bidirectional callback bridge: host callables exposed as script
//! functions, with calling-convention descriptors and scoped dispatch.

use std::{rc::Rc, sync::Arc};

use compact_str::CompactString;

use crate::{
    engine::heap::{FunctionKind, HeapValue, ScriptVal},
    error::{ScriptError, ScriptResult},
    runtime::{Runtime, RuntimeShared, Value},
};

/// Argument-count convention of a host callable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arity {
    /// No declared parameters; extra script-side arguments are dropped.
    Zero,

    /// Exactly this many arguments; any other count is a signature
    /// mismatch.
    Fixed(u8),

    /// Any number of arguments, delivered as passed.
    Variadic,
}

/// The three-axis calling-convention descriptor of a host callable:
/// receiver requirement, arity, and whether the produced result is
/// propagated back into script.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CallbackSignature {
    pub this_required: bool,
    pub arity: Arity,
    pub returns_result: bool,
}

impl CallbackSignature {
    /// A plain function: no receiver, variadic, result propagated.
    #[inline(always)]
    pub fn function() -> Self {
        Self {
            this_required: false,
            arity: Arity::Variadic,
            returns_result: true,
        }
    }

    /// A method: receiver required, variadic, result propagated.
    #[inline(always)]
    pub fn method() -> Self {
        Self {
            this_required: true,
            arity: Arity::Variadic,
            returns_result: true,
        }
    }

    /// A property getter: receiver required, no arguments, result
    /// propagated.
    #[inline(always)]
    pub fn getter() -> Self {
        Self {
            this_required: true,
            arity: Arity::Zero,
            returns_result: true,
        }
    }

    /// A property setter: receiver required, one argument, result ignored.
    #[inline(always)]
    pub fn setter() -> Self {
        Self {
            this_required: true,
            arity: Arity::Fixed(1),
            returns_result: false,
        }
    }
}

/// One dispatched call from script into the host.
pub struct Invocation {
    pub runtime: Runtime,

    /// The receiver, present when the signature requires one.
    pub this: Option<Value>,

    pub args: Vec<Value>,
}

impl Invocation {
    #[inline(always)]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }
}

pub(crate) type Callable = Rc<dyn Fn(&Invocation) -> ScriptResult<Option<Value>>>;

/// A boxed callable for accessor slots, where either side may be absent.
pub type AccessorCallable = Box<dyn Fn(&Invocation) -> ScriptResult<Option<Value>>>;

/// A registered host callable: the receiver object (via the owning function
/// slot), its signature, and the callable itself.
///
/// A context lives until every script-side function object owning it becomes
/// unreachable and a collection pass retires it, or until the runtime
/// closes.
#[derive(Clone)]
pub(crate) struct CallbackContext {
    pub(crate) name: CompactString,
    pub(crate) signature: CallbackSignature,
    pub(crate) callable: Callable,
}

impl Runtime {
    /// Exposes a host callable as a global script function.
    pub fn register_function(
        &self,
        name: &str,
        signature: CallbackSignature,
        callable: impl Fn(&Invocation) -> ScriptResult<Option<Value>> + 'static,
    ) -> ScriptResult<Value> {
        let function = self.create_callable(name, signature, Rc::new(callable))?;

        self.global().set(name, &function)?;

        Ok(function)
    }

    /// Exposes a host callable as a property of an existing object.
    pub fn bind_to(
        &self,
        object: &Value,
        name: &str,
        signature: CallbackSignature,
        callable: impl Fn(&Invocation) -> ScriptResult<Option<Value>> + 'static,
    ) -> ScriptResult<Value> {
        let function = self.create_callable(name, signature, Rc::new(callable))?;

        object.set(name, &function)?;

        Ok(function)
    }

    /// Installs a getter/setter accessor slot on an object property.
    ///
    /// Script-side reads of the property dispatch the getter with the object
    /// as receiver; writes dispatch the setter. A property with no setter
    /// rejects writes with a script-level `TypeError`.
    pub fn bind_accessor(
        &self,
        object: &Value,
        name: &str,
        getter: Option<AccessorCallable>,
        setter: Option<AccessorCallable>,
    ) -> ScriptResult<()> {
        self.shared.gate()?;

        let object_slot = match self.shared.unwrap_value(object)? {
            ScriptVal::Ref(slot) => slot,

            _ => {
                return Err(ScriptError::SignatureMismatch {
                    message: CompactString::from("accessor target is not an object"),
                })
            }
        };

        // Arrays, maps, and proxies have no accessor slots; rejecting them
        // upfront keeps the install from silently doing nothing.
        let is_object = matches!(
            self.shared.engine.borrow().slot_value(object_slot),
            HeapValue::Object(_),
        );

        if !is_object {
            return Err(ScriptError::SignatureMismatch {
                message: CompactString::from("accessor target is not an object"),
            });
        }

        let getter = match getter {
            Some(callable) => Some(self.create_callable(
                name,
                CallbackSignature::getter(),
                Rc::from(callable),
            )?),
            None => None,
        };

        let setter = match setter {
            Some(callable) => Some(self.create_callable(
                name,
                CallbackSignature::setter(),
                Rc::from(callable),
            )?),
            None => None,
        };

        let getter_slot = match &getter {
            Some(value) => match self.shared.unwrap_value(value)? {
                ScriptVal::Ref(slot) => Some(slot),
                _ => None,
            },
            None => None,
        };

        let setter_slot = match &setter {
            Some(value) => match self.shared.unwrap_value(value)? {
                ScriptVal::Ref(slot) => Some(slot),
                _ => None,
            },
            None => None,
        };

        let accessor_slot = self.shared.engine.borrow_mut().alloc(HeapValue::Accessor {
            getter: getter_slot,
            setter: setter_slot,
        });

        // Raw property install; going through the write path would dispatch
        // an already installed setter instead of replacing it.
        let mut engine = self.shared.engine.borrow_mut();

        if let HeapValue::Object(map) = engine.slot_value_mut(object_slot) {
            map.insert(CompactString::from(name), ScriptVal::Ref(accessor_slot));
        }

        Ok(())
    }

    fn create_callable(
        &self,
        name: &str,
        signature: CallbackSignature,
        callable: Callable,
    ) -> ScriptResult<Value> {
        self.shared.gate()?;

        let id = self.shared.next_callback_id.get();

        self.shared.next_callback_id.set(id + 1);

        self.shared.callbacks.borrow_mut().insert(
            id,
            CallbackContext {
                name: CompactString::from(name),
                signature,
                callable,
            },
        );

        let slot = self
            .shared
            .engine
            .borrow_mut()
            .alloc(HeapValue::Function(FunctionKind::Host { context_id: id }));

        Ok(self.shared.wrap(ScriptVal::Ref(slot)))
    }
}

/// Renders a host-side error as the message of the script-level exception
/// that replaces it.
pub(crate) fn surface_host_error(error: &ScriptError) -> String {
    match error.details() {
        Some(details) => details.message.clone(),
        None => format!("Error: {error}"),
    }
}

/// Dispatches one script-to-host call.
///
/// The receiver and every argument handle are wrapped inside a dedicated
/// call scope; exactly the produced result (when the signature propagates
/// one) leaves the scope, and everything else is released on return.
pub(crate) fn dispatch(
    shared: &Arc<RuntimeShared>,
    context_id: u64,
    this: ScriptVal,
    mut args: Vec<ScriptVal>,
) -> Result<ScriptVal, String> {
    let context = shared.callbacks.borrow().get(&context_id).cloned();

    let Some(context) = context else {
        return Err(String::from("Error: callback context is retired"));
    };

    match context.signature.arity {
        Arity::Variadic => (),

        Arity::Zero => args.clear(),

        Arity::Fixed(expected) => {
            if args.len() != expected as usize {
                return Err(format!(
                    "Error: callback signature mismatch: {} expects {} arguments, got {}",
                    context.name,
                    expected,
                    args.len(),
                ));
            }
        }
    }

    if context.signature.this_required && matches!(this, ScriptVal::Undefined) {
        return Err(format!(
            "Error: callback signature mismatch: {} requires a receiver",
            context.name,
        ));
    }

    shared.push_scope();

    let this = match context.signature.this_required {
        true => Some(shared.wrap(this)),
        false => None,
    };

    let args = args.into_iter().map(|arg| shared.wrap(arg)).collect();

    let invocation = Invocation {
        runtime: Runtime {
            shared: Arc::clone(shared),
        },
        this,
        args,
    };

    let result = (context.callable)(&invocation);

    let outcome = match result {
        Ok(Some(value)) if context.signature.returns_result => {
            match shared.unwrap_value(&value) {
                Ok(value) => Ok(value),
                Err(error) => Err(surface_host_error(&error)),
            }
        }

        Ok(_) => Ok(ScriptVal::Undefined),

        Err(error) => Err(surface_host_error(&error)),
    };

    drop(invocation);

    shared.pop_scope();

    outcome
}
