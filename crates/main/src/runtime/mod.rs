//! The host-facing runtime: engine ownership, script execution, value
//! wrappers, scopes, locking, pooling, and watchdog termination.

mod guard;
mod locker;
mod pool;
mod scope;
mod stats;
mod value;

use std::{
    cell::{Cell, RefCell, RefMut},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, ThreadId},
};

use ahash::AHashMap;
use compact_str::CompactString;

pub use crate::runtime::{
    guard::Guard,
    locker::Locker,
    pool::{Lease, PoolOptions, RuntimePool},
    scope::Scope,
    stats::{HeapStatistics, SpaceStatistics},
    value::{PromiseKind, PromiseResolver, Value, ValueKind},
};

use crate::{
    bridge::CallbackContext,
    engine::{
        eval::{evaluate, EvalError, Host},
        heap::{EngineCore, ErrorValue, GcOutcome, HeapValue, PromiseState, ScriptVal},
        parser::parse,
        source::SourceText,
    },
    error::{ScriptError, ScriptResult},
    proxy::ProxyHandler,
    report::system_panic,
};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Construction-time runtime configuration.
///
/// An options object is mutable until it is passed to [Runtime::new], which
/// seals it. Mutating a sealed options object is a contract violation and
/// fails fast.
#[derive(Clone, Debug, Default)]
pub struct RuntimeOptions {
    sealed: bool,
    max_heap_slots: Option<usize>,
    default_resource_name: Option<String>,
}

impl RuntimeOptions {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// An upper bound on live engine heap slots. Exceeding it after an
    /// execution reports [ScriptError::OutOfMemory].
    pub fn set_max_heap_slots(&mut self, limit: usize) -> &mut Self {
        self.assert_open();
        self.max_heap_slots = Some(limit);
        self
    }

    /// The resource name reported in diagnostics when the executed source
    /// was not given one explicitly.
    pub fn set_default_resource_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.assert_open();
        self.default_resource_name = Some(name.into());
        self
    }

    #[inline(always)]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn assert_open(&self) {
        if self.sealed {
            system_panic!("Runtime options mutated after sealing.");
        }
    }

    fn seal(&mut self) {
        self.sealed = true;
    }
}

struct Owner {
    thread: Option<ThreadId>,
    depth: u32,
}

#[derive(Default)]
pub(crate) struct ScopeFrame {
    pub(crate) members: Vec<u64>,
}

/// The state shared between a [Runtime], its [Value] wrappers, and its
/// auxiliary objects (pool, guard, inspector).
///
/// All `RefCell` and `Cell` fields are confined to the thread that currently
/// owns the runtime; the owner gate in [RuntimeShared::gate] is what makes
/// the unsafe `Send`/`Sync` implementations below sound. The only fields
/// touched from foreign threads are the atomics, the owner mutex, and the
/// deferred-release queue.
pub(crate) struct RuntimeShared {
    pub(crate) id: u64,
    pub(crate) engine: RefCell<EngineCore>,
    pub(crate) callbacks: RefCell<AHashMap<u64, CallbackContext>>,
    pub(crate) next_callback_id: Cell<u64>,
    pub(crate) proxies: RefCell<AHashMap<u64, std::rc::Rc<dyn ProxyHandler>>>,
    pub(crate) next_proxy_id: Cell<u64>,
    pub(crate) scopes: RefCell<Vec<ScopeFrame>>,
    pub(crate) closed: AtomicBool,
    pub(crate) terminate: AtomicBool,
    owner: Mutex<Owner>,
    deferred: Mutex<Vec<u64>>,
    options: RuntimeOptions,
}

unsafe impl Send for RuntimeShared {}
unsafe impl Sync for RuntimeShared {}

impl RuntimeShared {
    fn owner_state(&self) -> MutexGuard<'_, Owner> {
        match self.owner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Admission check for every runtime operation: the runtime must be open
    /// and the calling thread must own it (an unowned runtime is claimed by
    /// the caller). Also drains releases deferred from foreign threads.
    pub(crate) fn gate(&self) -> ScriptResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScriptError::RuntimeClosed);
        }

        self.claim()?;
        self.drain_deferred();

        Ok(())
    }

    fn claim(&self) -> ScriptResult<()> {
        let current = thread::current().id();
        let mut owner = self.owner_state();

        match owner.thread {
            None => {
                owner.thread = Some(current);
                Ok(())
            }

            Some(thread) if thread == current => Ok(()),

            Some(_) => Err(ScriptError::LockConflict),
        }
    }

    pub(crate) fn lock_enter(&self) -> ScriptResult<()> {
        let current = thread::current().id();
        let mut owner = self.owner_state();

        match owner.thread {
            Some(thread) if thread != current => Err(ScriptError::LockConflict),

            _ => {
                owner.thread = Some(current);
                owner.depth += 1;
                Ok(())
            }
        }
    }

    pub(crate) fn lock_exit(&self) {
        let mut owner = self.owner_state();

        owner.depth = owner.depth.saturating_sub(1);

        if owner.depth == 0 {
            owner.thread = None;
        }
    }

    /// Releases thread ownership if the caller holds it outside of any
    /// locker. Used when parking a runtime into a pool.
    pub(crate) fn unbind(&self) {
        let current = thread::current().id();
        let mut owner = self.owner_state();

        if owner.thread == Some(current) && owner.depth == 0 {
            owner.thread = None;
        }
    }

    pub(crate) fn defer_release(&self, id: u64) {
        let mut deferred = match self.deferred.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        deferred.push(id);
    }

    fn drain_deferred(&self) {
        let ids: Vec<u64> = {
            let mut deferred = match self.deferred.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            std::mem::take(&mut *deferred)
        };

        if ids.is_empty() {
            return;
        }

        // Reentrant drains (a wrapper dropped inside a callback) arrive
        // while the engine is borrowed; postpone them to the next gate pass.
        match self.engine.try_borrow_mut() {
            Ok(mut engine) => {
                for id in ids {
                    engine.release_ref(id);
                }
            }

            Err(_) => {
                let mut deferred = match self.deferred.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };

                deferred.extend(ids);
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn push_scope(&self) {
        self.scopes.borrow_mut().push(ScopeFrame::default());
    }

    pub(crate) fn pop_scope(&self) {
        let frame = self.scopes.borrow_mut().pop();

        let Some(frame) = frame else {
            return;
        };

        let mut engine = self.engine.borrow_mut();

        for id in frame.members {
            engine.release_ref(id);
        }
    }

    pub(crate) fn track_in_scope(&self, id: u64) {
        if let Some(frame) = self.scopes.borrow_mut().last_mut() {
            frame.members.push(id);
        }
    }

    pub(crate) fn retire(&self, outcome: &GcOutcome) {
        let mut callbacks = self.callbacks.borrow_mut();

        for id in &outcome.dead_callbacks {
            callbacks.remove(id);
        }

        drop(callbacks);

        let mut proxies = self.proxies.borrow_mut();

        for id in &outcome.dead_proxies {
            proxies.remove(id);
        }
    }

    pub(crate) fn value_kind_of(&self, slot: u32) -> ValueKind {
        match self.engine.borrow().slot_value(slot) {
            HeapValue::Object(_) => ValueKind::Object,
            HeapValue::Array(_) => ValueKind::Array,
            HeapValue::Bytes(_) => ValueKind::Bytes,
            HeapValue::Function(_) => ValueKind::Function,
            HeapValue::Map(_) => ValueKind::Map,
            HeapValue::Set(_) => ValueKind::Set,
            HeapValue::Date(_) => ValueKind::Date,
            HeapValue::Error(_) => ValueKind::Error,
            HeapValue::Symbol(_) => ValueKind::Symbol,
            HeapValue::Promise(_) => ValueKind::Promise,
            HeapValue::Proxy(_) => ValueKind::Proxy,

            // Accessor slots are engine-internal and never wrapped.
            HeapValue::Accessor { .. } => ValueKind::Object,
        }
    }

    /// Wraps an engine value into a host wrapper, registering a reference
    /// for heap values and tracking it in the active scope, if any.
    pub(crate) fn wrap(self: &Arc<Self>, value: ScriptVal) -> Value {
        let slot = match value {
            ScriptVal::Undefined
            | ScriptVal::Null
            | ScriptVal::Bool(_)
            | ScriptVal::Number(_)
            | ScriptVal::String(_) => return Value::primitive(Arc::clone(self), value),

            ScriptVal::Ref(slot) => slot,
        };

        if slot == self.engine.borrow().global_slot() {
            return Value::global(Arc::clone(self));
        }

        let kind = self.value_kind_of(slot);
        let handle = self.engine.borrow_mut().register_ref(slot);

        self.track_in_scope(handle.id);

        Value::reference(Arc::clone(self), handle, kind)
    }

    /// Unwraps a host wrapper back into an engine value, verifying runtime
    /// affinity and handle liveness.
    pub(crate) fn unwrap_value(&self, value: &Value) -> ScriptResult<ScriptVal> {
        if value.runtime_id() != self.id {
            return Err(ScriptError::CrossRuntimeHandle);
        }

        value.script_val()
    }

    pub(crate) fn alloc_wrapped(self: &Arc<Self>, value: HeapValue) -> ScriptResult<Value> {
        self.gate()?;

        let slot = self.engine.borrow_mut().alloc(value);

        Ok(self.wrap(ScriptVal::Ref(slot)))
    }
}

impl Drop for RuntimeShared {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let outstanding = self.engine.borrow().reference_count();

            if outstanding > 0 {
                log::warn!(
                    "runtime {} dropped without close; {} references outstanding",
                    self.id,
                    outstanding,
                );
            }
        }
    }
}

impl Host for Arc<RuntimeShared> {
    #[inline(always)]
    fn engine(&self) -> RefMut<'_, EngineCore> {
        self.engine.borrow_mut()
    }

    fn call_host(
        &self,
        context_id: u64,
        this: ScriptVal,
        args: Vec<ScriptVal>,
    ) -> Result<ScriptVal, String> {
        crate::bridge::dispatch(self, context_id, this, args)
    }

    fn proxy_get(&self, handler: u64, name: &str) -> Result<Option<ScriptVal>, String> {
        crate::proxy::trap_get(self, handler, name)
    }

    fn proxy_set(&self, handler: u64, name: &str, value: ScriptVal) -> Result<bool, String> {
        crate::proxy::trap_set(self, handler, name, value)
    }

    fn proxy_has(&self, handler: u64, name: &str) -> Result<bool, String> {
        crate::proxy::trap_has(self, handler, name)
    }

    fn proxy_delete(&self, handler: u64, name: &str) -> Result<bool, String> {
        crate::proxy::trap_delete(self, handler, name)
    }

    fn proxy_call(
        &self,
        handler: u64,
        this: ScriptVal,
        args: Vec<ScriptVal>,
    ) -> Result<ScriptVal, String> {
        crate::proxy::trap_invoke(self, handler, this, args)
    }

    #[inline(always)]
    fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }
}

/// An embedded script engine instance.
///
/// A Runtime owns one engine core. All interaction with script values goes
/// through it: executing source, creating values, registering host
/// callables, and reclaiming memory.
///
/// Runtimes are thread-confined: the thread that currently owns the runtime
/// is the only one allowed to use it, and any other thread is turned away
/// with [ScriptError::LockConflict] until ownership is transferred through a
/// [Locker]. Cloning a Runtime clones the shared handle, not the engine.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) shared: Arc<RuntimeShared>,
}

impl Runtime {
    /// Creates a runtime owned by the calling thread. The options object is
    /// sealed by this call.
    pub fn new(mut options: RuntimeOptions) -> ScriptResult<Self> {
        options.seal();

        let shared = Arc::new(RuntimeShared {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            engine: RefCell::new(EngineCore::new()),
            callbacks: RefCell::new(AHashMap::new()),
            next_callback_id: Cell::new(1),
            proxies: RefCell::new(AHashMap::new()),
            next_proxy_id: Cell::new(1),
            scopes: RefCell::new(Vec::new()),
            closed: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            owner: Mutex::new(Owner {
                thread: Some(thread::current().id()),
                depth: 0,
            }),
            deferred: Mutex::new(Vec::new()),
            options,
        });

        log::debug!("runtime {} created", shared.id);

        Ok(Self { shared })
    }

    /// Executes source text and returns the value of its last top-level
    /// expression statement.
    #[inline(always)]
    pub fn execute(&self, code: &str) -> ScriptResult<Value> {
        self.execute_with_resource(code, None)
    }

    /// Executes source text under an explicit resource name for diagnostics.
    pub fn execute_with_resource(
        &self,
        code: &str,
        resource_name: Option<&str>,
    ) -> ScriptResult<Value> {
        self.shared.gate()?;
        self.shared.terminate.store(false, Ordering::Release);

        let resource_name =
            resource_name.or(self.shared.options.default_resource_name.as_deref());

        let source = SourceText::new(code, resource_name);

        let program = match parse(&source) {
            Ok(program) => program,
            Err(details) => return Err(ScriptError::Compilation { details }),
        };

        self.shared.engine.borrow_mut().enter_execution();

        let result = evaluate(&self.shared, &program);

        // The raw result is not a collection root. Wrapping it registers a
        // strong reference before the frame unwinds, so a collection
        // deferred from inside a callback cannot reclaim its slot.
        let result = result.map(|value| self.shared.wrap(value));

        let outcome = self.shared.engine.borrow_mut().leave_execution();

        if let Some(outcome) = outcome {
            self.shared.retire(&outcome);
        }

        let value = match result {
            Ok(value) => value,

            Err(EvalError::Thrown { message, span }) => {
                return Err(ScriptError::Execution {
                    details: source.details(message, span),
                });
            }

            Err(EvalError::Terminated) => {
                self.shared.terminate.store(false, Ordering::Release);

                return Err(ScriptError::Terminated);
            }
        };

        if let Some(limit) = self.shared.options.max_heap_slots {
            if self.shared.engine.borrow().live_slot_count() > limit {
                return Err(ScriptError::OutOfMemory);
            }
        }

        Ok(value)
    }

    /// Parses source text without executing it, reporting compilation errors
    /// with full diagnostics.
    pub fn compile_only(&self, code: &str) -> ScriptResult<()> {
        self.shared.gate()?;

        let source = SourceText::new(code, None);

        match parse(&source) {
            Ok(_) => Ok(()),
            Err(details) => Err(ScriptError::Compilation { details }),
        }
    }

    /// Runs `action` inside a fresh reference scope. Every reference wrapper
    /// created while the scope is active is released when the scope exits,
    /// on both success and error paths, unless it was escaped through
    /// [Scope::escape].
    pub fn scope<T>(
        &self,
        action: impl FnOnce(&Scope<'_>) -> ScriptResult<T>,
    ) -> ScriptResult<T> {
        self.shared.gate()?;
        self.shared.push_scope();

        let result = action(&Scope::new(self));

        self.shared.pop_scope();

        result
    }

    /// Closes the runtime: releases all outstanding references, retires all
    /// callback contexts and proxy handlers, and tears down the engine core.
    /// Closing an already closed runtime is a no-op.
    pub fn close(&self) -> ScriptResult<()> {
        if self.shared.is_closed() {
            return Ok(());
        }

        self.shared.claim()?;
        self.shared.drain_deferred();

        self.shared.scopes.borrow_mut().clear();

        let (dead_callbacks, dead_proxies) = self.shared.engine.borrow_mut().teardown();

        let _ = dead_callbacks;
        let _ = dead_proxies;

        self.shared.callbacks.borrow_mut().clear();
        self.shared.proxies.borrow_mut().clear();

        debug_assert_eq!(self.shared.engine.borrow().reference_count(), 0);
        debug_assert!(self.shared.callbacks.borrow().is_empty());

        self.shared.closed.store(true, Ordering::Release);

        log::debug!("runtime {} closed", self.shared.id);

        Ok(())
    }

    /// Synchronous forced collection pass. This is the sanctioned way to
    /// deterministically reclaim weak references and orphaned callback
    /// contexts.
    pub fn low_memory_notification(&self) -> ScriptResult<()> {
        self.shared.gate()?;

        let outcome = self.shared.engine.borrow_mut().request_gc();

        if let Some(outcome) = outcome {
            log::debug!(
                "runtime {} collected {} slots",
                self.shared.id,
                outcome.freed_slots,
            );

            self.shared.retire(&outcome);
        }

        Ok(())
    }

    /// Drains the engine's microtask queue (promise jobs). Returns `true` if
    /// any task ran.
    pub fn pump_message_loop(&self) -> ScriptResult<bool> {
        self.shared.gate()?;

        Ok(self.shared.engine.borrow_mut().pump_microtasks())
    }

    /// Requests best-effort termination of the running script. The flag is
    /// polled by the evaluator at loop back-edges and call sites; a request
    /// may race with natural completion.
    ///
    /// This is the only runtime operation permitted from a foreign thread.
    pub fn terminate_execution(&self) {
        self.shared.terminate.store(true, Ordering::Release);
    }

    /// The number of live host references into the engine heap.
    pub fn reference_count(&self) -> ScriptResult<usize> {
        self.shared.gate()?;

        Ok(self.shared.engine.borrow().reference_count())
    }

    /// The number of live callback contexts.
    pub fn callback_count(&self) -> ScriptResult<usize> {
        self.shared.gate()?;

        Ok(self.shared.callbacks.borrow().len())
    }

    /// A read-only snapshot of engine heap statistics. Never mutates engine
    /// state.
    pub fn heap_statistics(&self) -> ScriptResult<HeapStatistics> {
        self.shared.gate()?;

        let engine = self.shared.engine.borrow();

        let spaces: Vec<SpaceStatistics> = engine
            .space_sizes()
            .into_iter()
            .map(|(name, size)| SpaceStatistics { name, size })
            .collect();

        let used_heap_size = spaces.iter().map(|space| space.size).sum();

        Ok(HeapStatistics {
            total_heap_size: engine.total_slot_count() * 48 + used_heap_size,
            used_heap_size,
            live_values: engine.live_slot_count(),
            reference_count: engine.reference_count(),
            callback_count: self.shared.callbacks.borrow().len(),
            gc_count: engine.gc_count(),
            spaces,
        })
    }

    /// The wrapper of the engine's global object. Clone and close are no-ops
    /// on it, and it cannot be weakened.
    pub fn global(&self) -> Value {
        Value::global(Arc::clone(&self.shared))
    }

    /// Wraps a host-side primitive. Primitive wrappers never hold registry
    /// references, so closing them is a no-op.
    pub fn create_undefined(&self) -> ScriptResult<Value> {
        self.shared.gate()?;

        Ok(self.shared.wrap(ScriptVal::Undefined))
    }

    pub fn create_null(&self) -> ScriptResult<Value> {
        self.shared.gate()?;

        Ok(self.shared.wrap(ScriptVal::Null))
    }

    pub fn create_boolean(&self, value: bool) -> ScriptResult<Value> {
        self.shared.gate()?;

        Ok(self.shared.wrap(ScriptVal::Bool(value)))
    }

    pub fn create_number(&self, value: f64) -> ScriptResult<Value> {
        self.shared.gate()?;

        Ok(self.shared.wrap(ScriptVal::Number(value)))
    }

    pub fn create_string(&self, value: &str) -> ScriptResult<Value> {
        self.shared.gate()?;

        Ok(self.shared.wrap(ScriptVal::String(CompactString::from(value))))
    }

    pub fn create_object(&self) -> ScriptResult<Value> {
        self.shared
            .alloc_wrapped(HeapValue::Object(indexmap::IndexMap::new()))
    }

    pub fn create_array(&self) -> ScriptResult<Value> {
        self.shared.alloc_wrapped(HeapValue::Array(Vec::new()))
    }

    pub fn create_bytes(&self, bytes: &[u8]) -> ScriptResult<Value> {
        self.shared.alloc_wrapped(HeapValue::Bytes(bytes.to_vec()))
    }

    pub fn create_map(&self) -> ScriptResult<Value> {
        self.shared
            .alloc_wrapped(HeapValue::Map(indexmap::IndexMap::new()))
    }

    pub fn create_set(&self) -> ScriptResult<Value> {
        self.shared
            .alloc_wrapped(HeapValue::Set(indexmap::IndexSet::new()))
    }

    /// Creates a date value from an epoch-millisecond instant.
    pub fn create_date(&self, instant: chrono::DateTime<chrono::Utc>) -> ScriptResult<Value> {
        self.shared
            .alloc_wrapped(HeapValue::Date(instant.timestamp_millis()))
    }

    pub fn create_symbol(&self, description: &str) -> ScriptResult<Value> {
        self.shared
            .alloc_wrapped(HeapValue::Symbol(CompactString::from(description)))
    }

    pub fn create_error(&self, name: &str, message: &str) -> ScriptResult<Value> {
        self.shared.alloc_wrapped(HeapValue::Error(ErrorValue {
            name: CompactString::from(name),
            message: String::from(message),
        }))
    }

    /// Creates a pending promise together with its resolver.
    pub fn create_promise(&self) -> ScriptResult<(Value, PromiseResolver)> {
        let value = self
            .shared
            .alloc_wrapped(HeapValue::Promise(PromiseState::Pending))?;

        let resolver = PromiseResolver::new(value.try_clone()?);

        Ok((value, resolver))
    }

    /// Registers a proxy handler and returns the script-side proxy object
    /// dispatching to it.
    pub fn create_proxy(&self, handler: impl ProxyHandler + 'static) -> ScriptResult<Value> {
        self.shared.gate()?;

        let id = self.shared.next_proxy_id.get();

        self.shared.next_proxy_id.set(id + 1);

        self.shared
            .proxies
            .borrow_mut()
            .insert(id, std::rc::Rc::new(handler));

        self.shared.alloc_wrapped(HeapValue::Proxy(id))
    }

    /// Acquires the runtime lock for the calling thread. Dropping the locker
    /// releases ownership, allowing another thread to claim the runtime.
    pub fn locker(&self) -> ScriptResult<Locker<'_>> {
        Locker::new(self)
    }

    /// Spawns a watchdog that terminates execution after `timeout_millis`
    /// unless the guard is dropped first.
    pub fn guard(&self, timeout_millis: u64) -> Guard {
        Guard::new(self, timeout_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn sealed_options_reject_mutation() {
        let mut options = RuntimeOptions::new();
        let runtime = Runtime::new(options.clone()).unwrap();

        drop(runtime);

        options.seal();
        options.set_max_heap_slots(10);
    }

    #[test]
    fn close_is_idempotent() {
        let runtime = Runtime::new(RuntimeOptions::new()).unwrap();

        runtime.close().unwrap();
        runtime.close().unwrap();

        assert!(matches!(
            runtime.execute("1;"),
            Err(ScriptError::RuntimeClosed),
        ));
    }

    #[test]
    fn foreign_thread_is_turned_away() {
        let runtime = Runtime::new(RuntimeOptions::new()).unwrap();

        runtime.execute("const a = 1;").unwrap();

        let clone = runtime.clone();

        let result = thread::spawn(move || clone.execute("2;")).join().unwrap();

        assert!(matches!(result, Err(ScriptError::LockConflict)));
    }

    #[test]
    fn heap_limit_reports_out_of_memory() {
        let mut options = RuntimeOptions::new();

        options.set_max_heap_slots(2);

        let runtime = Runtime::new(options).unwrap();

        let result = runtime.execute("const a = [{}, {}, {}, {}];");

        assert!(matches!(result, Err(ScriptError::OutOfMemory)));
    }
}
