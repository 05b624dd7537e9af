use std::{cell::RefMut, rc::Rc};

use compact_str::CompactString;
use indexmap::IndexMap;

use crate::engine::{
    heap::{Binding, EngineCore, FunctionKind, HeapValue, ScriptFunction, ScriptVal},
    parser::{BinaryOp, DeclKind, Expr, Stmt, UnaryOp},
    source::Span,
};

// Each script frame recurses through several native evaluator frames, so
// the bound must stay far below the native stack limit of a default thread.
const MAX_CALL_DEPTH: usize = 32;

/// The evaluator's view of the runtime that embeds the engine.
///
/// Engine state is handed out in short-lived borrows. The evaluator drops
/// the borrow before dispatching into host code, so a callback or a proxy
/// trap may freely re-enter the runtime.
pub(crate) trait Host {
    fn engine(&self) -> RefMut<'_, EngineCore>;

    /// Invokes a registered host callable. An `Err` message becomes a
    /// script-level exception at the call site.
    fn call_host(
        &self,
        context_id: u64,
        this: ScriptVal,
        args: Vec<ScriptVal>,
    ) -> Result<ScriptVal, String>;

    /// The `get` trap. `Ok(None)` means the handler does not intercept the
    /// property.
    fn proxy_get(&self, handler: u64, name: &str) -> Result<Option<ScriptVal>, String>;

    fn proxy_set(&self, handler: u64, name: &str, value: ScriptVal) -> Result<bool, String>;

    fn proxy_has(&self, handler: u64, name: &str) -> Result<bool, String>;

    fn proxy_delete(&self, handler: u64, name: &str) -> Result<bool, String>;

    fn proxy_call(
        &self,
        handler: u64,
        this: ScriptVal,
        args: Vec<ScriptVal>,
    ) -> Result<ScriptVal, String>;

    /// Polled at loop back-edges and call sites.
    fn terminated(&self) -> bool;
}

/// An abrupt completion of evaluation.
pub(crate) enum EvalError {
    /// A script-level exception with its throw site.
    Thrown { message: String, span: Span },

    /// Execution was cut short by a termination request.
    Terminated,
}

enum Flow {
    Normal,
    Return(ScriptVal),
}

type EvalResult<T> = Result<T, EvalError>;

/// Runs a parsed program to completion.
///
/// The result is the value of the last expression statement executed at the
/// top level, or `undefined` if there was none.
pub(crate) fn evaluate<H: Host>(host: &H, program: &[Stmt]) -> Result<ScriptVal, EvalError> {
    let mut evaluator = Evaluator {
        host,
        frames: Vec::new(),
        this_stack: Vec::new(),
        result: ScriptVal::Undefined,
    };

    for statement in program {
        match evaluator.statement(statement)? {
            Flow::Normal => (),
            Flow::Return(_) => break,
        }
    }

    Ok(evaluator.result)
}

/// Property read on behalf of host code, with accessor and proxy dispatch.
pub(crate) fn get_property_of<H: Host>(
    host: &H,
    object: &ScriptVal,
    name: &str,
) -> Result<ScriptVal, EvalError> {
    detached(host).get_property(object, name, Span::default())
}

/// Property write on behalf of host code.
pub(crate) fn set_property_of<H: Host>(
    host: &H,
    object: &ScriptVal,
    name: &str,
    value: ScriptVal,
) -> Result<(), EvalError> {
    detached(host).set_property(object, name, value, Span::default())
}

/// Property deletion on behalf of host code.
pub(crate) fn delete_property_of<H: Host>(
    host: &H,
    object: &ScriptVal,
    name: &str,
) -> Result<bool, EvalError> {
    let deleted = detached(host).delete_property(object, name, Span::default())?;

    Ok(matches!(deleted, ScriptVal::Bool(true)))
}

/// Function invocation on behalf of host code.
pub(crate) fn call_value_of<H: Host>(
    host: &H,
    callee: &ScriptVal,
    this: ScriptVal,
    args: Vec<ScriptVal>,
) -> Result<ScriptVal, EvalError> {
    detached(host).call_value(callee, "", this, args, Span::default())
}

fn detached<H: Host>(host: &H) -> Evaluator<'_, H> {
    Evaluator {
        host,
        frames: Vec::new(),
        this_stack: Vec::new(),
        result: ScriptVal::Undefined,
    }
}

struct Frame {
    bindings: IndexMap<CompactString, Binding>,
}

struct Evaluator<'a, H: Host> {
    host: &'a H,
    frames: Vec<Frame>,
    this_stack: Vec<ScriptVal>,
    result: ScriptVal,
}

impl<'a, H: Host> Evaluator<'a, H> {
    #[inline(always)]
    fn throw(&self, message: impl Into<String>, span: Span) -> EvalError {
        EvalError::Thrown {
            message: message.into(),
            span,
        }
    }

    fn check_terminated(&self) -> EvalResult<()> {
        match self.host.terminated() {
            true => Err(EvalError::Terminated),
            false => Ok(()),
        }
    }

    fn statement(&mut self, statement: &Stmt) -> EvalResult<Flow> {
        match statement {
            Stmt::Decl {
                kind,
                name,
                name_span,
                init,
            } => {
                let value = match init {
                    Some(init) => self.expr(init)?,
                    None => ScriptVal::Undefined,
                };

                self.declare(*kind, name, *name_span, value)?;

                Ok(Flow::Normal)
            }

            Stmt::Func {
                name,
                name_span,
                params,
                body,
            } => {
                // A function body is moved into the heap once per source and
                // shared by reference afterwards; redeclaring it clones the
                // statements again only because the AST outlives the call.
                let function = Rc::new(ScriptFunction {
                    name: name.clone(),
                    params: params.clone(),
                    body: clone_body(body),
                });

                let slot = self
                    .host
                    .engine()
                    .alloc(HeapValue::Function(FunctionKind::Script(function)));

                self.bind_function(name, *name_span, ScriptVal::Ref(slot))?;

                Ok(Flow::Normal)
            }

            Stmt::Expr(expression) => {
                let value = self.expr(expression)?;

                if self.frames.is_empty() {
                    self.result = value;
                }

                Ok(Flow::Normal)
            }

            Stmt::Return { value } => {
                let value = match value {
                    Some(value) => self.expr(value)?,
                    None => ScriptVal::Undefined,
                };

                Ok(Flow::Return(value))
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.expr(condition)?;
                let truthy = condition.is_truthy(&self.host.engine());

                let branch = match truthy {
                    true => Some(then_branch),
                    false => else_branch.as_ref(),
                };

                if let Some(branch) = branch {
                    return self.block(branch);
                }

                Ok(Flow::Normal)
            }

            Stmt::While { condition, body } => {
                loop {
                    self.check_terminated()?;

                    let condition = self.expr(condition)?;

                    if !condition.is_truthy(&self.host.engine()) {
                        break;
                    }

                    if let Flow::Return(value) = self.block(body)? {
                        return Ok(Flow::Return(value));
                    }
                }

                Ok(Flow::Normal)
            }

            Stmt::Block(body) => self.block(body),
        }
    }

    fn block(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        for statement in body {
            if let Flow::Return(value) = self.statement(statement)? {
                return Ok(Flow::Return(value));
            }
        }

        Ok(Flow::Normal)
    }

    fn declare(
        &mut self,
        kind: DeclKind,
        name: &CompactString,
        name_span: Span,
        value: ScriptVal,
    ) -> EvalResult<()> {
        if let Some(frame) = self.frames.last_mut() {
            if kind != DeclKind::Var && frame.bindings.contains_key(name) {
                return Err(self.throw(
                    format!("SyntaxError: Identifier '{name}' has already been declared"),
                    name_span,
                ));
            }

            frame.bindings.insert(
                name.clone(),
                Binding {
                    value,
                    mutable: kind != DeclKind::Const,
                },
            );

            return Ok(());
        }

        match kind {
            // `var` at the top level is a plain global object property,
            // which also makes it deletable.
            DeclKind::Var => {
                let mut engine = self.host.engine();
                let global = engine.global_slot();

                if let HeapValue::Object(map) = engine.slot_value_mut(global) {
                    map.insert(name.clone(), value);
                }

                Ok(())
            }

            DeclKind::Let | DeclKind::Const => {
                let result = self.host.engine().lexical_declare(
                    name,
                    value,
                    kind == DeclKind::Let,
                );

                result.map_err(|message| self.throw(message, name_span))
            }
        }
    }

    fn bind_function(
        &mut self,
        name: &CompactString,
        name_span: Span,
        value: ScriptVal,
    ) -> EvalResult<()> {
        if let Some(frame) = self.frames.last_mut() {
            frame.bindings.insert(
                name.clone(),
                Binding {
                    value,
                    mutable: true,
                },
            );

            return Ok(());
        }

        // Function declarations may repeat; the later one wins.
        let mut engine = self.host.engine();

        match engine.lexical_assign(name, value.clone()) {
            Ok(true) => Ok(()),
            Err(()) => {
                drop(engine);

                Err(self.throw(
                    "TypeError: Assignment to constant variable.",
                    name_span,
                ))
            }
            Ok(false) => {
                let result = engine.lexical_declare(name, value, true);

                drop(engine);

                result.map_err(|message| self.throw(message, name_span))
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<ScriptVal> {
        if let Some(frame) = self.frames.last() {
            if let Some(binding) = frame.bindings.get(name) {
                return Some(binding.value.clone());
            }
        }

        let engine = self.host.engine();

        if let Some(value) = engine.lexical_lookup(name) {
            return Some(value);
        }

        if let HeapValue::Object(map) = engine.slot_value(engine.global_slot()) {
            if let Some(value) = map.get(name) {
                return Some(value.clone());
            }
        }

        match name {
            "globalThis" => Some(ScriptVal::Ref(engine.global_slot())),
            _ => None,
        }
    }

    fn expr(&mut self, expression: &Expr) -> EvalResult<ScriptVal> {
        match expression {
            Expr::Number(value, _) => Ok(ScriptVal::Number(*value)),
            Expr::Str(value, _) => Ok(ScriptVal::String(value.clone())),
            Expr::Bool(value, _) => Ok(ScriptVal::Bool(*value)),
            Expr::Null(_) => Ok(ScriptVal::Null),
            Expr::Undefined(_) => Ok(ScriptVal::Undefined),

            Expr::Ident(name, span) => match self.lookup(name) {
                Some(value) => Ok(value),
                None => Err(self.throw(
                    format!("ReferenceError: {name} is not defined"),
                    *span,
                )),
            },

            Expr::This(_) => match self.this_stack.last() {
                Some(value) => Ok(value.clone()),
                None => Ok(ScriptVal::Ref(self.host.engine().global_slot())),
            },

            Expr::Array(items, _) => {
                let mut values = Vec::with_capacity(items.len());

                for item in items {
                    values.push(self.expr(item)?);
                }

                let slot = self.host.engine().alloc(HeapValue::Array(values));

                Ok(ScriptVal::Ref(slot))
            }

            Expr::Object(properties, _) => {
                let mut map = IndexMap::with_capacity(properties.len());

                for (key, value) in properties {
                    let value = self.expr(value)?;

                    map.insert(key.clone(), value);
                }

                let slot = self.host.engine().alloc(HeapValue::Object(map));

                Ok(ScriptVal::Ref(slot))
            }

            Expr::Member {
                object,
                name,
                name_span,
            } => {
                let object = self.expr(object)?;

                self.get_property(&object, name, *name_span)
            }

            Expr::Index {
                object,
                index,
                span,
            } => {
                let object = self.expr(object)?;
                let index = self.expr(index)?;
                let name = to_display(&index, &self.host.engine());

                self.get_property(&object, &name, *span)
            }

            Expr::Call { callee, args, span } => self.call(callee, args, *span),

            Expr::Assign {
                target,
                value,
                op_span,
            } => {
                let value = self.expr(value)?;

                self.assign(target, value.clone(), *op_span)?;

                Ok(value)
            }

            Expr::Binary {
                op,
                lhs,
                rhs,
                op_span,
            } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;

                self.binary(*op, lhs, rhs, *op_span)
            }

            Expr::Logical { and, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let truthy = lhs.is_truthy(&self.host.engine());

                match (*and, truthy) {
                    (true, true) | (false, false) => self.expr(rhs),
                    _ => Ok(lhs),
                }
            }

            Expr::Unary {
                op,
                operand,
                op_span,
            } => {
                let operand = self.expr(operand)?;

                match op {
                    UnaryOp::Not => {
                        let truthy = operand.is_truthy(&self.host.engine());

                        Ok(ScriptVal::Bool(!truthy))
                    }

                    UnaryOp::Neg => match to_number(&operand) {
                        Some(value) => Ok(ScriptVal::Number(-value)),
                        None => Err(self.throw(
                            "TypeError: Cannot convert object to primitive value",
                            *op_span,
                        )),
                    },
                }
            }

            Expr::Delete { target, span } => self.delete(target, *span),
        }
    }

    fn get_property(
        &mut self,
        object: &ScriptVal,
        name: &str,
        span: Span,
    ) -> EvalResult<ScriptVal> {
        match object {
            ScriptVal::Undefined | ScriptVal::Null => {
                let kind = match object {
                    ScriptVal::Null => "null",
                    _ => "undefined",
                };

                Err(self.throw(
                    format!("TypeError: Cannot read properties of {kind} (reading '{name}')"),
                    span,
                ))
            }

            ScriptVal::String(value) => match name {
                "length" => Ok(ScriptVal::Number(value.chars().count() as f64)),
                _ => Ok(ScriptVal::Undefined),
            },

            ScriptVal::Bool(_) | ScriptVal::Number(_) => Ok(ScriptVal::Undefined),

            ScriptVal::Ref(slot) => {
                let slot = *slot;

                enum Action {
                    Getter(FunctionKind),
                    GetterMissing,
                    Trap(u64),
                }

                let action = {
                    let engine = self.host.engine();

                    match engine.slot_value(slot) {
                        HeapValue::Object(map) => match map.get(name) {
                            None => return Ok(ScriptVal::Undefined),

                            Some(value) => match value {
                                ScriptVal::Ref(target) => match engine.slot_value(*target) {
                                    HeapValue::Accessor { getter, .. } => match getter {
                                        None => Action::GetterMissing,

                                        Some(getter) => match engine.slot_value(*getter) {
                                            HeapValue::Function(kind) => {
                                                Action::Getter(kind.clone())
                                            }
                                            _ => Action::GetterMissing,
                                        },
                                    },

                                    _ => return Ok(value.clone()),
                                },

                                _ => return Ok(value.clone()),
                            },
                        },

                        HeapValue::Array(items) => match name {
                            "length" => return Ok(ScriptVal::Number(items.len() as f64)),

                            _ => {
                                return Ok(parse_index(name)
                                    .and_then(|index| items.get(index).cloned())
                                    .unwrap_or_default())
                            }
                        },

                        HeapValue::Bytes(bytes) => match name {
                            "length" => return Ok(ScriptVal::Number(bytes.len() as f64)),

                            _ => {
                                return Ok(parse_index(name)
                                    .and_then(|index| bytes.get(index).copied())
                                    .map(|byte| ScriptVal::Number(byte as f64))
                                    .unwrap_or_default())
                            }
                        },

                        HeapValue::Map(map) => match name {
                            "size" => return Ok(ScriptVal::Number(map.len() as f64)),
                            _ => return Ok(ScriptVal::Undefined),
                        },

                        HeapValue::Set(set) => match name {
                            "size" => return Ok(ScriptVal::Number(set.len() as f64)),
                            _ => return Ok(ScriptVal::Undefined),
                        },

                        HeapValue::Error(error) => match name {
                            "name" => {
                                return Ok(ScriptVal::String(error.name.clone()))
                            }
                            "message" => {
                                return Ok(ScriptVal::String(CompactString::from(
                                    error.message.as_str(),
                                )))
                            }
                            _ => return Ok(ScriptVal::Undefined),
                        },

                        HeapValue::Function(kind) => match name {
                            "name" => {
                                let name = match kind {
                                    FunctionKind::Script(function) => function.name.clone(),
                                    FunctionKind::Host { .. } => CompactString::default(),
                                };

                                return Ok(ScriptVal::String(name));
                            }
                            _ => return Ok(ScriptVal::Undefined),
                        },

                        HeapValue::Proxy(handler) => Action::Trap(*handler),

                        _ => return Ok(ScriptVal::Undefined),
                    }
                };

                // Engine borrow dropped; getters and traps may re-enter the
                // runtime.
                match action {
                    Action::GetterMissing => Ok(ScriptVal::Undefined),

                    Action::Getter(kind) => {
                        self.dispatch_kind(kind, false, object.clone(), Vec::new(), span)
                    }

                    Action::Trap(handler) => match self.host.proxy_get(handler, name) {
                        Ok(Some(value)) => Ok(value),
                        Ok(None) => Ok(ScriptVal::Undefined),
                        Err(message) => Err(self.throw(message, span)),
                    },
                }
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: ScriptVal, op_span: Span) -> EvalResult<()> {
        match target {
            Expr::Ident(name, _) => {
                if let Some(frame) = self.frames.last_mut() {
                    if let Some(binding) = frame.bindings.get_mut(name.as_str()) {
                        if !binding.mutable {
                            return Err(self.throw(
                                "TypeError: Assignment to constant variable.",
                                op_span,
                            ));
                        }

                        binding.value = value;

                        return Ok(());
                    }
                }

                let mut engine = self.host.engine();

                match engine.lexical_assign(name, value.clone()) {
                    Ok(true) => Ok(()),

                    Err(()) => {
                        drop(engine);

                        Err(self.throw(
                            "TypeError: Assignment to constant variable.",
                            op_span,
                        ))
                    }

                    // No lexical binding: the assignment lands on the global
                    // object, matching sloppy-mode scripts.
                    Ok(false) => {
                        let global = engine.global_slot();

                        if let HeapValue::Object(map) = engine.slot_value_mut(global) {
                            map.insert(name.clone(), value);
                        }

                        Ok(())
                    }
                }
            }

            Expr::Member {
                object,
                name,
                name_span,
            } => {
                let object = self.expr(object)?;

                self.set_property(&object, name, value, *name_span)
            }

            Expr::Index {
                object,
                index,
                span,
            } => {
                let object = self.expr(object)?;
                let index = self.expr(index)?;
                let name = to_display(&index, &self.host.engine());

                self.set_property(&object, &name, value, *span)
            }

            _ => Err(self.throw(
                "SyntaxError: Invalid left-hand side in assignment",
                target.span(),
            )),
        }
    }

    fn set_property(
        &mut self,
        object: &ScriptVal,
        name: &str,
        value: ScriptVal,
        span: Span,
    ) -> EvalResult<()> {
        let slot = match object {
            ScriptVal::Undefined | ScriptVal::Null => {
                let kind = match object {
                    ScriptVal::Null => "null",
                    _ => "undefined",
                };

                return Err(self.throw(
                    format!("TypeError: Cannot set properties of {kind} (setting '{name}')"),
                    span,
                ));
            }

            // Property writes on primitives are silently dropped.
            ScriptVal::Bool(_) | ScriptVal::Number(_) | ScriptVal::String(_) => return Ok(()),

            ScriptVal::Ref(slot) => *slot,
        };

        enum Action {
            Plain,
            Array,
            Setter(FunctionKind),
            GetterOnly,
            Trap(u64),
            Ignore,
        }

        let action = {
            let engine = self.host.engine();

            match engine.slot_value(slot) {
                HeapValue::Object(map) => match map.get(name) {
                    Some(ScriptVal::Ref(target)) => match engine.slot_value(*target) {
                        HeapValue::Accessor { setter, .. } => match setter {
                            None => Action::GetterOnly,

                            Some(setter) => match engine.slot_value(*setter) {
                                HeapValue::Function(kind) => Action::Setter(kind.clone()),
                                _ => Action::GetterOnly,
                            },
                        },

                        _ => Action::Plain,
                    },

                    _ => Action::Plain,
                },

                HeapValue::Array(_) => Action::Array,
                HeapValue::Proxy(handler) => Action::Trap(*handler),
                _ => Action::Ignore,
            }
        };

        match action {
            Action::Plain => {
                let mut engine = self.host.engine();

                if let HeapValue::Object(map) = engine.slot_value_mut(slot) {
                    map.insert(CompactString::from(name), value);
                }

                Ok(())
            }

            Action::Array => {
                let mut engine = self.host.engine();

                if let HeapValue::Array(items) = engine.slot_value_mut(slot) {
                    if let Some(index) = parse_index(name) {
                        if index >= items.len() {
                            items.resize(index + 1, ScriptVal::Undefined);
                        }

                        items[index] = value;
                    }
                }

                Ok(())
            }

            Action::Setter(kind) => {
                self.dispatch_kind(kind, false, object.clone(), vec![value], span)?;

                Ok(())
            }

            Action::GetterOnly => Err(self.throw(
                format!(
                    "TypeError: Cannot set property {name} of #<Object> which has only a getter"
                ),
                span,
            )),

            Action::Trap(handler) => match self.host.proxy_set(handler, name, value) {
                Ok(_) => Ok(()),
                Err(message) => Err(self.throw(message, span)),
            },

            Action::Ignore => Ok(()),
        }
    }

    fn delete(&mut self, target: &Expr, span: Span) -> EvalResult<ScriptVal> {
        match target {
            Expr::Ident(name, _) => {
                let mut engine = self.host.engine();

                if engine.lexical_lookup(name).is_some() {
                    drop(engine);

                    // Lexical bindings are not configurable.
                    return Ok(ScriptVal::Bool(false));
                }

                let global = engine.global_slot();

                let deleted = match engine.slot_value_mut(global) {
                    HeapValue::Object(map) => map.shift_remove(name.as_str()).is_some(),
                    _ => false,
                };

                Ok(ScriptVal::Bool(deleted))
            }

            Expr::Member { object, name, .. } => {
                let object = self.expr(object)?;

                self.delete_property(&object, name, span)
            }

            Expr::Index { object, index, .. } => {
                let object = self.expr(object)?;
                let index = self.expr(index)?;
                let name = to_display(&index, &self.host.engine());

                self.delete_property(&object, &name, span)
            }

            _ => Ok(ScriptVal::Bool(true)),
        }
    }

    fn delete_property(
        &mut self,
        object: &ScriptVal,
        name: &str,
        span: Span,
    ) -> EvalResult<ScriptVal> {
        let slot = match object {
            ScriptVal::Ref(slot) => *slot,
            _ => return Ok(ScriptVal::Bool(true)),
        };

        let handler = {
            let mut engine = self.host.engine();

            match engine.slot_value_mut(slot) {
                HeapValue::Object(map) => {
                    return Ok(ScriptVal::Bool(map.shift_remove(name).is_some()));
                }

                HeapValue::Array(items) => {
                    if let Some(index) = parse_index(name) {
                        if index < items.len() {
                            items[index] = ScriptVal::Undefined;

                            return Ok(ScriptVal::Bool(true));
                        }
                    }

                    return Ok(ScriptVal::Bool(true));
                }

                HeapValue::Proxy(handler) => *handler,

                _ => return Ok(ScriptVal::Bool(true)),
            }
        };

        match self.host.proxy_delete(handler, name) {
            Ok(deleted) => Ok(ScriptVal::Bool(deleted)),
            Err(message) => Err(self.throw(message, span)),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> EvalResult<ScriptVal> {
        self.check_terminated()?;

        // For member calls the receiver becomes `this`.
        let (callee_value, this, callee_name) = match callee {
            Expr::Member {
                object,
                name,
                name_span,
            } => {
                let object = self.expr(object)?;
                let value = self.get_property(&object, name, *name_span)?;

                (value, object, name.clone())
            }

            Expr::Index {
                object,
                index,
                span: index_span,
            } => {
                let object = self.expr(object)?;
                let index = self.expr(index)?;
                let name = to_display(&index, &self.host.engine());
                let value = self.get_property(&object, &name, *index_span)?;

                (value, object, name)
            }

            Expr::Ident(name, _) => {
                let value = self.expr(callee)?;

                (value, ScriptVal::Undefined, name.clone())
            }

            _ => {
                let value = self.expr(callee)?;

                (value, ScriptVal::Undefined, CompactString::default())
            }
        };

        let mut arg_values = Vec::with_capacity(args.len());

        for arg in args {
            arg_values.push(self.expr(arg)?);
        }

        self.call_value(&callee_value, &callee_name, this, arg_values, span)
    }

    fn call_value(
        &mut self,
        callee: &ScriptVal,
        callee_name: &str,
        this: ScriptVal,
        args: Vec<ScriptVal>,
        span: Span,
    ) -> EvalResult<ScriptVal> {
        let slot = match callee {
            ScriptVal::Ref(slot) => *slot,
            _ => return Err(self.not_a_function(callee_name, span)),
        };

        let (kind, is_proxy) = {
            let engine = self.host.engine();

            match engine.slot_value(slot) {
                HeapValue::Function(kind) => (kind.clone(), false),

                HeapValue::Proxy(handler) => (
                    FunctionKind::Host {
                        context_id: *handler,
                    },
                    true,
                ),

                _ => {
                    drop(engine);

                    return Err(self.not_a_function(callee_name, span));
                }
            }
        };

        self.dispatch_kind(kind, is_proxy, this, args, span)
    }

    fn dispatch_kind(
        &mut self,
        kind: FunctionKind,
        is_proxy: bool,
        this: ScriptVal,
        args: Vec<ScriptVal>,
        span: Span,
    ) -> EvalResult<ScriptVal> {
        match kind {
            FunctionKind::Script(function) => self.call_script(&function, this, args, span),

            FunctionKind::Host { context_id } if is_proxy => {
                match self.host.proxy_call(context_id, this, args) {
                    Ok(value) => Ok(value),
                    Err(message) => Err(self.throw(message, span)),
                }
            }

            FunctionKind::Host { context_id } => {
                match self.host.call_host(context_id, this, args) {
                    Ok(value) => Ok(value),
                    Err(message) => Err(self.throw(message, span)),
                }
            }
        }
    }

    fn call_script(
        &mut self,
        function: &ScriptFunction,
        this: ScriptVal,
        args: Vec<ScriptVal>,
        span: Span,
    ) -> EvalResult<ScriptVal> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.throw(
                "RangeError: Maximum call stack size exceeded",
                span,
            ));
        }

        let mut bindings = IndexMap::with_capacity(function.params.len());

        for (index, param) in function.params.iter().enumerate() {
            bindings.insert(
                param.clone(),
                Binding {
                    value: args.get(index).cloned().unwrap_or_default(),
                    mutable: true,
                },
            );
        }

        self.frames.push(Frame { bindings });
        self.this_stack.push(this);

        let flow = self.block(&function.body);

        self.this_stack.pop();
        self.frames.pop();

        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(ScriptVal::Undefined),
        }
    }

    fn not_a_function(&self, name: &str, span: Span) -> EvalError {
        let name = match name.is_empty() {
            true => "expression",
            false => name,
        };

        self.throw(format!("TypeError: {name} is not a function"), span)
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: ScriptVal,
        rhs: ScriptVal,
        op_span: Span,
    ) -> EvalResult<ScriptVal> {
        match op {
            BinaryOp::Add => {
                if matches!(lhs, ScriptVal::String(_)) || matches!(rhs, ScriptVal::String(_)) {
                    let engine = self.host.engine();

                    let mut text = to_display(&lhs, &engine);

                    text.push_str(&to_display(&rhs, &engine));

                    return Ok(ScriptVal::String(text));
                }

                self.arithmetic(op, lhs, rhs, op_span)
            }

            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                self.arithmetic(op, lhs, rhs, op_span)
            }

            BinaryOp::StrictEq => Ok(ScriptVal::Bool(strict_equals(&lhs, &rhs))),
            BinaryOp::StrictNotEq => Ok(ScriptVal::Bool(!strict_equals(&lhs, &rhs))),
            BinaryOp::Eq => Ok(ScriptVal::Bool(loose_equals(&lhs, &rhs))),
            BinaryOp::NotEq => Ok(ScriptVal::Bool(!loose_equals(&lhs, &rhs))),

            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                if let (ScriptVal::String(left), ScriptVal::String(right)) = (&lhs, &rhs) {
                    let ordering = left.cmp(right);

                    return Ok(ScriptVal::Bool(match op {
                        BinaryOp::Lt => ordering.is_lt(),
                        BinaryOp::Gt => ordering.is_gt(),
                        BinaryOp::Le => ordering.is_le(),
                        BinaryOp::Ge => ordering.is_ge(),
                        _ => false,
                    }));
                }

                let (left, right) = match (to_number(&lhs), to_number(&rhs)) {
                    (Some(left), Some(right)) => (left, right),
                    _ => return Ok(ScriptVal::Bool(false)),
                };

                Ok(ScriptVal::Bool(match op {
                    BinaryOp::Lt => left < right,
                    BinaryOp::Gt => left > right,
                    BinaryOp::Le => left <= right,
                    BinaryOp::Ge => left >= right,
                    _ => false,
                }))
            }
        }
    }

    fn arithmetic(
        &mut self,
        op: BinaryOp,
        lhs: ScriptVal,
        rhs: ScriptVal,
        op_span: Span,
    ) -> EvalResult<ScriptVal> {
        let (left, right) = match (to_number(&lhs), to_number(&rhs)) {
            (Some(left), Some(right)) => (left, right),

            _ => {
                return Err(self.throw(
                    "TypeError: Cannot convert object to primitive value",
                    op_span,
                ))
            }
        };

        let value = match op {
            BinaryOp::Add => left + right,
            BinaryOp::Sub => left - right,
            BinaryOp::Mul => left * right,
            BinaryOp::Div => left / right,
            BinaryOp::Rem => left % right,
            _ => return Ok(ScriptVal::Bool(false)),
        };

        Ok(ScriptVal::Number(value))
    }
}

fn clone_body(body: &[Stmt]) -> Vec<Stmt> {
    // Stmt is deliberately not Clone: the AST is cloned exactly once, when a
    // function declaration captures its body into the heap.
    fn clone_stmt(statement: &Stmt) -> Stmt {
        match statement {
            Stmt::Decl {
                kind,
                name,
                name_span,
                init,
            } => Stmt::Decl {
                kind: *kind,
                name: name.clone(),
                name_span: *name_span,
                init: init.as_ref().map(clone_expr),
            },

            Stmt::Func {
                name,
                name_span,
                params,
                body,
            } => Stmt::Func {
                name: name.clone(),
                name_span: *name_span,
                params: params.clone(),
                body: clone_body(body),
            },

            Stmt::Expr(expression) => Stmt::Expr(clone_expr(expression)),

            Stmt::Return { value } => Stmt::Return {
                value: value.as_ref().map(clone_expr),
            },

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => Stmt::If {
                condition: clone_expr(condition),
                then_branch: clone_body(then_branch),
                else_branch: else_branch.as_deref().map(clone_body),
            },

            Stmt::While { condition, body } => Stmt::While {
                condition: clone_expr(condition),
                body: clone_body(body),
            },

            Stmt::Block(body) => Stmt::Block(clone_body(body)),
        }
    }

    fn clone_expr(expression: &Expr) -> Expr {
        match expression {
            Expr::Number(value, span) => Expr::Number(*value, *span),
            Expr::Str(value, span) => Expr::Str(value.clone(), *span),
            Expr::Bool(value, span) => Expr::Bool(*value, *span),
            Expr::Null(span) => Expr::Null(*span),
            Expr::Undefined(span) => Expr::Undefined(*span),
            Expr::Ident(name, span) => Expr::Ident(name.clone(), *span),
            Expr::This(span) => Expr::This(*span),

            Expr::Array(items, span) => {
                Expr::Array(items.iter().map(clone_expr).collect(), *span)
            }

            Expr::Object(properties, span) => Expr::Object(
                properties
                    .iter()
                    .map(|(key, value)| (key.clone(), clone_expr(value)))
                    .collect(),
                *span,
            ),

            Expr::Member {
                object,
                name,
                name_span,
            } => Expr::Member {
                object: Box::new(clone_expr(object)),
                name: name.clone(),
                name_span: *name_span,
            },

            Expr::Index {
                object,
                index,
                span,
            } => Expr::Index {
                object: Box::new(clone_expr(object)),
                index: Box::new(clone_expr(index)),
                span: *span,
            },

            Expr::Call { callee, args, span } => Expr::Call {
                callee: Box::new(clone_expr(callee)),
                args: args.iter().map(clone_expr).collect(),
                span: *span,
            },

            Expr::Assign {
                target,
                value,
                op_span,
            } => Expr::Assign {
                target: Box::new(clone_expr(target)),
                value: Box::new(clone_expr(value)),
                op_span: *op_span,
            },

            Expr::Binary {
                op,
                lhs,
                rhs,
                op_span,
            } => Expr::Binary {
                op: *op,
                lhs: Box::new(clone_expr(lhs)),
                rhs: Box::new(clone_expr(rhs)),
                op_span: *op_span,
            },

            Expr::Logical { and, lhs, rhs } => Expr::Logical {
                and: *and,
                lhs: Box::new(clone_expr(lhs)),
                rhs: Box::new(clone_expr(rhs)),
            },

            Expr::Unary {
                op,
                operand,
                op_span,
            } => Expr::Unary {
                op: *op,
                operand: Box::new(clone_expr(operand)),
                op_span: *op_span,
            },

            Expr::Delete { target, span } => Expr::Delete {
                target: Box::new(clone_expr(target)),
                span: *span,
            },
        }
    }

    body.iter().map(clone_stmt).collect()
}

fn parse_index(name: &str) -> Option<usize> {
    name.parse::<usize>().ok()
}

fn to_number(value: &ScriptVal) -> Option<f64> {
    match value {
        ScriptVal::Undefined => Some(f64::NAN),
        ScriptVal::Null => Some(0.0),
        ScriptVal::Bool(true) => Some(1.0),
        ScriptVal::Bool(false) => Some(0.0),
        ScriptVal::Number(value) => Some(*value),

        ScriptVal::String(value) => {
            let trimmed = value.trim();

            match trimmed.is_empty() {
                true => Some(0.0),
                false => Some(trimmed.parse::<f64>().unwrap_or(f64::NAN)),
            }
        }

        ScriptVal::Ref(_) => None,
    }
}

pub(crate) fn number_to_string(value: f64) -> CompactString {
    if value.is_nan() {
        return CompactString::from("NaN");
    }

    if value.is_infinite() {
        return CompactString::from(match value > 0.0 {
            true => "Infinity",
            false => "-Infinity",
        });
    }

    if value == 0.0 {
        return CompactString::from("0");
    }

    CompactString::from(format!("{value}"))
}

/// String rendering of a value, used by concatenation and index keys.
pub(crate) fn to_display(value: &ScriptVal, engine: &EngineCore) -> CompactString {
    match value {
        ScriptVal::Undefined => CompactString::from("undefined"),
        ScriptVal::Null => CompactString::from("null"),
        ScriptVal::Bool(true) => CompactString::from("true"),
        ScriptVal::Bool(false) => CompactString::from("false"),
        ScriptVal::Number(number) => number_to_string(*number),
        ScriptVal::String(text) => text.clone(),

        ScriptVal::Ref(slot) => match engine.slot_value(*slot) {
            HeapValue::Array(items) => {
                let mut text = CompactString::default();

                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        text.push(',');
                    }

                    if !matches!(item, ScriptVal::Undefined | ScriptVal::Null) {
                        text.push_str(&to_display(item, engine));
                    }
                }

                text
            }

            HeapValue::Error(error) => {
                CompactString::from(format!("{}: {}", error.name, error.message))
            }

            HeapValue::Symbol(name) => CompactString::from(format!("Symbol({name})")),

            HeapValue::Function(FunctionKind::Script(function)) => {
                CompactString::from(format!("function {}() {{ ... }}", function.name))
            }

            HeapValue::Function(FunctionKind::Host { .. }) => {
                CompactString::from("function () { [native code] }")
            }

            _ => CompactString::from("[object Object]"),
        },
    }
}

fn strict_equals(lhs: &ScriptVal, rhs: &ScriptVal) -> bool {
    match (lhs, rhs) {
        (ScriptVal::Undefined, ScriptVal::Undefined) => true,
        (ScriptVal::Null, ScriptVal::Null) => true,
        (ScriptVal::Bool(left), ScriptVal::Bool(right)) => left == right,
        (ScriptVal::Number(left), ScriptVal::Number(right)) => left == right,
        (ScriptVal::String(left), ScriptVal::String(right)) => left == right,
        (ScriptVal::Ref(left), ScriptVal::Ref(right)) => left == right,
        _ => false,
    }
}

fn loose_equals(lhs: &ScriptVal, rhs: &ScriptVal) -> bool {
    match (lhs, rhs) {
        (ScriptVal::Undefined | ScriptVal::Null, ScriptVal::Undefined | ScriptVal::Null) => true,

        (ScriptVal::Ref(left), ScriptVal::Ref(right)) => left == right,

        (ScriptVal::Ref(_), _) | (_, ScriptVal::Ref(_)) => false,

        _ => match (to_number(lhs), to_number(rhs)) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::engine::{parser::parse, source::SourceText};

    struct TestHost {
        engine: RefCell<EngineCore>,
        terminated: Cell<bool>,
    }

    impl TestHost {
        fn new() -> Self {
            Self {
                engine: RefCell::new(EngineCore::new()),
                terminated: Cell::new(false),
            }
        }
    }

    impl Host for TestHost {
        fn engine(&self) -> RefMut<'_, EngineCore> {
            self.engine.borrow_mut()
        }

        fn call_host(
            &self,
            _context_id: u64,
            _this: ScriptVal,
            _args: Vec<ScriptVal>,
        ) -> Result<ScriptVal, String> {
            Err(String::from("Error: no host callables registered"))
        }

        fn proxy_get(&self, _handler: u64, _name: &str) -> Result<Option<ScriptVal>, String> {
            Ok(None)
        }

        fn proxy_set(
            &self,
            _handler: u64,
            _name: &str,
            _value: ScriptVal,
        ) -> Result<bool, String> {
            Ok(false)
        }

        fn proxy_has(&self, _handler: u64, _name: &str) -> Result<bool, String> {
            Ok(false)
        }

        fn proxy_delete(&self, _handler: u64, _name: &str) -> Result<bool, String> {
            Ok(false)
        }

        fn proxy_call(
            &self,
            _handler: u64,
            _this: ScriptVal,
            _args: Vec<ScriptVal>,
        ) -> Result<ScriptVal, String> {
            Err(String::from("Error: no proxy handlers registered"))
        }

        fn terminated(&self) -> bool {
            self.terminated.get()
        }
    }

    fn run(host: &TestHost, text: &str) -> Result<ScriptVal, EvalError> {
        let source = SourceText::new(text, None);
        let program = parse(&source).unwrap();

        evaluate(host, &program)
    }

    fn run_ok(text: &str) -> ScriptVal {
        match run(&TestHost::new(), text) {
            Ok(value) => value,
            Err(EvalError::Thrown { message, .. }) => panic!("unexpected throw: {message}"),
            Err(EvalError::Terminated) => panic!("unexpected termination"),
        }
    }

    fn run_err(text: &str) -> (String, Span) {
        match run(&TestHost::new(), text) {
            Ok(_) => panic!("expected an error"),
            Err(EvalError::Thrown { message, span }) => (message, span),
            Err(EvalError::Terminated) => panic!("unexpected termination"),
        }
    }

    #[test]
    fn last_expression_is_the_result() {
        assert!(matches!(run_ok("1 + 2;"), ScriptVal::Number(value) if value == 3.0));
        assert!(matches!(run_ok("let a = 5;"), ScriptVal::Undefined));
    }

    #[test]
    fn const_assignment_throws_at_the_assignment_operator() {
        let (message, span) = run_err("const a = 1;\na = 2;");

        assert_eq!(message, "TypeError: Assignment to constant variable.");
        assert_eq!(span.start, 15);
        assert_eq!(span.end, 16);
    }

    #[test]
    fn undeclared_identifier_is_a_reference_error() {
        let (message, _) = run_err("missing + 1;");

        assert_eq!(message, "ReferenceError: missing is not defined");
    }

    #[test]
    fn functions_declare_call_and_return() {
        let result = run_ok(
            "function add(a, b) { return a + b; }\n\
             add(2, 3);",
        );

        assert!(matches!(result, ScriptVal::Number(value) if value == 5.0));
    }

    #[test]
    fn while_loop_terminates_on_request() {
        let host = TestHost::new();

        host.terminated.set(true);

        let result = run(&host, "let i = 0;\nwhile (true) { i = i + 1; }");

        assert!(matches!(result, Err(EvalError::Terminated)));
    }

    #[test]
    fn member_access_on_undefined_is_a_type_error() {
        let (message, _) = run_err("let a = undefined;\na.name;");

        assert_eq!(
            message,
            "TypeError: Cannot read properties of undefined (reading 'name')",
        );
    }

    #[test]
    fn object_and_array_literals_behave_as_references() {
        let result = run_ok(
            "let box = {count: 1, items: [10, 20]};\n\
             box.count = box.count + box.items[1];\n\
             box.count;",
        );

        assert!(matches!(result, ScriptVal::Number(value) if value == 21.0));
    }

    #[test]
    fn string_concatenation_coerces_numbers() {
        let result = run_ok("'n = ' + 42;");

        assert!(matches!(
            result,
            ScriptVal::String(text) if text == "n = 42",
        ));
    }

    #[test]
    fn delete_removes_object_properties() {
        let result = run_ok(
            "let box = {a: 1};\n\
             delete box.a;\n\
             box.a === undefined;",
        );

        assert!(matches!(result, ScriptVal::Bool(true)));
    }

    #[test]
    fn recursion_depth_is_bounded() {
        let (message, _) = run_err("function f() { return f(); }\nf();");

        assert_eq!(message, "RangeError: Maximum call stack size exceeded");
    }

    #[test]
    fn recursion_under_the_bound_completes() {
        let result = run_ok(
            "function count(n) { if (n <= 0) { return 0; } return count(n - 1) + 1; }\n\
             count(20);",
        );

        assert!(matches!(result, ScriptVal::Number(value) if value == 20.0));
    }
}
