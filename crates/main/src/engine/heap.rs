use std::{collections::VecDeque, rc::Rc};

use ahash::AHashMap;
use compact_str::CompactString;
use indexmap::{IndexMap, IndexSet};

use crate::{
    engine::parser::Stmt,
    error::{ScriptError, ScriptResult},
    report::{debug_unreachable, system_panic},
};

/// An opaque identifier for a value living in the engine's heap.
///
/// A Handle is unique within its [Runtime](crate::runtime::Runtime) while
/// live. The underlying heap slot is reused only after the handle's host
/// reference has been released and a collection pass has reclaimed the slot;
/// reuse bumps the slot epoch, so a stale Handle is always detectable and
/// never dereferences foreign data.
///
/// Handles are never meaningful across runtimes. Passing a Handle (through a
/// value wrapper) into a different runtime is reported as
/// [ScriptError::CrossRuntimeHandle].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Handle {
    pub(crate) id: u64,
    pub(crate) epoch: u32,
}

/// An engine-side value: either an immediate primitive or a heap reference.
///
/// This is the representation that flows through the evaluator and the heap.
/// Host code never sees it directly; the runtime wraps it into a
/// [Value](crate::runtime::Value) on receipt.
#[derive(Clone, Debug, Default)]
pub(crate) enum ScriptVal {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(CompactString),
    Ref(u32),
}

impl ScriptVal {
    #[inline(always)]
    pub(crate) fn is_truthy(&self, engine: &EngineCore) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(value) => *value,
            Self::Number(value) => *value != 0.0 && !value.is_nan(),
            Self::String(value) => !value.is_empty(),
            Self::Ref(_) => {
                let _ = engine;
                true
            }
        }
    }
}

/// A hashable projection of a [ScriptVal], used as a key in script maps and
/// sets. Numbers are compared by bit pattern, matching strict sameness of
/// the engine dialect.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum HeapKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(CompactString),
    Ref(u32),
}

impl HeapKey {
    #[inline]
    pub(crate) fn from_val(value: &ScriptVal) -> Self {
        match value {
            ScriptVal::Undefined => Self::Undefined,
            ScriptVal::Null => Self::Null,
            ScriptVal::Bool(value) => Self::Bool(*value),
            ScriptVal::Number(value) => Self::Number(value.to_bits()),
            ScriptVal::String(value) => Self::String(value.clone()),
            ScriptVal::Ref(slot) => Self::Ref(*slot),
        }
    }

    #[inline]
    pub(crate) fn to_val(&self) -> ScriptVal {
        match self {
            Self::Undefined => ScriptVal::Undefined,
            Self::Null => ScriptVal::Null,
            Self::Bool(value) => ScriptVal::Bool(*value),
            Self::Number(bits) => ScriptVal::Number(f64::from_bits(*bits)),
            Self::String(value) => ScriptVal::String(value.clone()),
            Self::Ref(slot) => ScriptVal::Ref(*slot),
        }
    }
}

/// A script function body shared between the heap and active call frames.
#[derive(Debug)]
pub(crate) struct ScriptFunction {
    pub(crate) name: CompactString,
    pub(crate) params: Vec<CompactString>,
    pub(crate) body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub(crate) enum FunctionKind {
    Script(Rc<ScriptFunction>),
    Host { context_id: u64 },
}

#[derive(Clone, Debug)]
pub(crate) struct ErrorValue {
    pub(crate) name: CompactString,
    pub(crate) message: String,
}

#[derive(Clone, Debug)]
pub(crate) enum PromiseState {
    Pending,
    Fulfilled(ScriptVal),
    Rejected(ScriptVal),
}

/// A heap-resident value. All reference kinds of the data model live here;
/// primitives are immediates and never allocate a slot.
#[derive(Debug)]
pub(crate) enum HeapValue {
    Object(IndexMap<CompactString, ScriptVal>),
    Array(Vec<ScriptVal>),
    Bytes(Vec<u8>),
    Function(FunctionKind),
    Map(IndexMap<HeapKey, ScriptVal>),
    Set(IndexSet<HeapKey>),
    Date(i64),
    Error(ErrorValue),
    Symbol(CompactString),
    Promise(PromiseState),
    Proxy(u64),

    /// A property accessor slot. Never surfaces to host code; property reads
    /// and writes through it dispatch the underlying functions.
    Accessor {
        getter: Option<u32>,
        setter: Option<u32>,
    },
}

impl HeapValue {
    fn approx_size(&self) -> usize {
        let payload = match self {
            Self::Object(map) => map.len() * 48,
            Self::Array(items) => items.len() * 16,
            Self::Bytes(bytes) => bytes.len(),
            Self::Function(_) => 64,
            Self::Map(map) => map.len() * 64,
            Self::Set(set) => set.len() * 48,
            Self::Date(_) => 8,
            Self::Error(error) => error.message.len() + 16,
            Self::Symbol(name) => name.len(),
            Self::Promise(_) => 24,
            Self::Proxy(_) => 8,
            Self::Accessor { .. } => 16,
        };

        payload + 32
    }
}

enum Slot {
    Free { epoch: u32, next: Option<u32> },
    Live { epoch: u32, marked: bool, value: HeapValue },
}

struct HostRef {
    slot: u32,
    epoch: u32,
    weak: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct Binding {
    pub(crate) value: ScriptVal,
    pub(crate) mutable: bool,
}

#[derive(Debug)]
pub(crate) enum Microtask {
    Settle {
        promise: u32,
        value: ScriptVal,
        fulfilled: bool,
    },
}

/// The outcome of a collection pass.
pub(crate) struct GcOutcome {
    pub(crate) freed_slots: usize,
    pub(crate) dead_callbacks: Vec<u64>,
    pub(crate) dead_proxies: Vec<u64>,
}

/// The engine core: value heap, host reference table, global bindings, and
/// the microtask queue.
///
/// The core is the "native" side of the embedding boundary. It is reachable
/// only through a [Runtime](crate::runtime::Runtime), which serializes all
/// access; the core itself performs no synchronization.
pub(crate) struct EngineCore {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live_slots: usize,
    refs: AHashMap<u64, HostRef>,
    next_ref_id: u64,
    global: u32,
    lexical: IndexMap<CompactString, Binding>,
    microtasks: VecDeque<Microtask>,
    gc_count: u64,
    gc_pending: bool,
    exec_depth: u32,
}

impl EngineCore {
    pub(crate) fn new() -> Self {
        let mut engine = Self {
            slots: Vec::with_capacity(64),
            free_head: None,
            live_slots: 0,
            refs: AHashMap::new(),
            next_ref_id: 1,
            global: 0,
            lexical: IndexMap::new(),
            microtasks: VecDeque::new(),
            gc_count: 0,
            gc_pending: false,
            exec_depth: 0,
        };

        engine.global = engine.alloc(HeapValue::Object(IndexMap::new()));

        engine
    }

    #[inline(always)]
    pub(crate) fn global_slot(&self) -> u32 {
        self.global
    }

    pub(crate) fn alloc(&mut self, value: HeapValue) -> u32 {
        self.live_slots += 1;

        match self.free_head {
            Some(index) => {
                let slot = match self.slots.get_mut(index as usize) {
                    Some(slot) => slot,
                    None => debug_unreachable!("Free list head out of bounds."),
                };

                let (epoch, next) = match slot {
                    Slot::Free { epoch, next } => (*epoch, *next),
                    Slot::Live { .. } => debug_unreachable!("Free list head is a live slot."),
                };

                *slot = Slot::Live {
                    epoch,
                    marked: false,
                    value,
                };

                self.free_head = next;

                index
            }

            None => {
                let index = self.slots.len() as u32;

                self.slots.push(Slot::Live {
                    epoch: 0,
                    marked: false,
                    value,
                });

                index
            }
        }
    }

    #[inline]
    pub(crate) fn slot_value(&self, index: u32) -> &HeapValue {
        match self.slots.get(index as usize) {
            Some(Slot::Live { value, .. }) => value,
            _ => system_panic!("Dereference of a freed heap slot."),
        }
    }

    #[inline]
    pub(crate) fn slot_value_mut(&mut self, index: u32) -> &mut HeapValue {
        match self.slots.get_mut(index as usize) {
            Some(Slot::Live { value, .. }) => value,
            _ => system_panic!("Dereference of a freed heap slot."),
        }
    }

    #[inline]
    fn slot_epoch(&self, index: u32) -> Option<u32> {
        match self.slots.get(index as usize) {
            Some(Slot::Live { epoch, .. }) => Some(*epoch),
            _ => None,
        }
    }

    /// Registers a new host reference against a live slot.
    ///
    /// Every value wrapper owns exactly one such reference; cloning a
    /// wrapper registers another one.
    pub(crate) fn register_ref(&mut self, slot: u32) -> Handle {
        let epoch = match self.slot_epoch(slot) {
            Some(epoch) => epoch,
            None => system_panic!("Host reference to a freed heap slot."),
        };

        let id = self.next_ref_id;

        self.next_ref_id += 1;

        self.refs.insert(
            id,
            HostRef {
                slot,
                epoch,
                weak: false,
            },
        );

        Handle { id, epoch }
    }

    /// Releases a host reference. Releasing an already released reference is
    /// a no-op, which makes wrapper double-close harmless.
    pub(crate) fn release_ref(&mut self, id: u64) -> bool {
        self.refs.remove(&id).is_some()
    }

    /// Resolves a handle to its heap slot, failing with a stale-handle
    /// condition if the reference was released or the slot was reclaimed.
    pub(crate) fn resolve(&self, handle: Handle) -> ScriptResult<u32> {
        let entry = match self.refs.get(&handle.id) {
            Some(entry) => entry,
            None => return Err(ScriptError::StaleHandle),
        };

        if entry.epoch != handle.epoch {
            return Err(ScriptError::StaleHandle);
        }

        match self.slot_epoch(entry.slot) {
            Some(epoch) if epoch == entry.epoch => Ok(entry.slot),
            _ => Err(ScriptError::StaleHandle),
        }
    }

    pub(crate) fn set_weak(&mut self, id: u64, weak: bool) -> ScriptResult<()> {
        match self.refs.get_mut(&id) {
            Some(entry) => {
                entry.weak = weak;
                Ok(())
            }
            None => Err(ScriptError::StaleHandle),
        }
    }

    pub(crate) fn is_weak(&self, id: u64) -> bool {
        self.refs.get(&id).map(|entry| entry.weak).unwrap_or(false)
    }

    #[inline(always)]
    pub(crate) fn reference_count(&self) -> usize {
        self.refs.len()
    }

    pub(crate) fn lexical_declare(
        &mut self,
        name: &str,
        value: ScriptVal,
        mutable: bool,
    ) -> Result<(), String> {
        if self.lexical.contains_key(name) {
            return Err(format!(
                "SyntaxError: Identifier '{name}' has already been declared"
            ));
        }

        self.lexical.insert(
            CompactString::from(name),
            Binding { value, mutable },
        );

        Ok(())
    }

    pub(crate) fn lexical_lookup(&self, name: &str) -> Option<ScriptVal> {
        self.lexical.get(name).map(|binding| binding.value.clone())
    }

    /// Assigns to a global lexical binding.
    ///
    /// `Ok(true)` means assigned, `Ok(false)` means no such binding, and
    /// `Err(())` means the binding is a constant.
    pub(crate) fn lexical_assign(&mut self, name: &str, value: ScriptVal) -> Result<bool, ()> {
        match self.lexical.get_mut(name) {
            None => Ok(false),
            Some(binding) if !binding.mutable => Err(()),
            Some(binding) => {
                binding.value = value;
                Ok(true)
            }
        }
    }

    pub(crate) fn enqueue_microtask(&mut self, task: Microtask) {
        self.microtasks.push_back(task);
    }

    /// Drains the microtask queue. Returns `true` if any task ran.
    pub(crate) fn pump_microtasks(&mut self) -> bool {
        let mut pumped = false;

        while let Some(task) = self.microtasks.pop_front() {
            pumped = true;

            match task {
                Microtask::Settle {
                    promise,
                    value,
                    fulfilled,
                } => {
                    if let HeapValue::Promise(state) = self.slot_value_mut(promise) {
                        if matches!(state, PromiseState::Pending) {
                            *state = match fulfilled {
                                true => PromiseState::Fulfilled(value),
                                false => PromiseState::Rejected(value),
                            };
                        }
                    }
                }
            }
        }

        pumped
    }

    #[inline(always)]
    pub(crate) fn enter_execution(&mut self) {
        self.exec_depth += 1;
    }

    /// Leaves an execution frame. If a collection was requested while the
    /// engine was executing, it runs once the outermost frame unwinds.
    pub(crate) fn leave_execution(&mut self) -> Option<GcOutcome> {
        if self.exec_depth == 0 {
            system_panic!("Unbalanced execution frame.");
        }

        self.exec_depth -= 1;

        if self.exec_depth == 0 && self.gc_pending {
            self.gc_pending = false;

            return Some(self.collect_garbage());
        }

        None
    }

    #[inline(always)]
    pub(crate) fn in_execution(&self) -> bool {
        self.exec_depth > 0
    }

    /// Requests a collection pass. While the evaluator is running, the pass
    /// is deferred to the end of the outermost execution frame; the caller
    /// receives `None` in that case.
    pub(crate) fn request_gc(&mut self) -> Option<GcOutcome> {
        if self.in_execution() {
            self.gc_pending = true;

            return None;
        }

        Some(self.collect_garbage())
    }

    /// Mark-and-sweep collection over the heap.
    ///
    /// Roots: the global object, global lexical bindings, strong host
    /// references, and pending microtasks. Weak host references are not
    /// roots; a weak reference whose slot is reclaimed becomes stale.
    /// Host callback functions that die in the sweep are reported so the
    /// bridge can retire their contexts.
    fn collect_garbage(&mut self) -> GcOutcome {
        self.gc_count += 1;

        let mut work: Vec<u32> = Vec::with_capacity(self.refs.len() + 8);

        work.push(self.global);

        for binding in self.lexical.values() {
            if let ScriptVal::Ref(slot) = &binding.value {
                work.push(*slot);
            }
        }

        for entry in self.refs.values() {
            if entry.weak {
                continue;
            }

            if self.slot_epoch(entry.slot) == Some(entry.epoch) {
                work.push(entry.slot);
            }
        }

        for task in &self.microtasks {
            match task {
                Microtask::Settle { promise, value, .. } => {
                    work.push(*promise);

                    if let ScriptVal::Ref(slot) = value {
                        work.push(*slot);
                    }
                }
            }
        }

        while let Some(index) = work.pop() {
            let slot = match self.slots.get_mut(index as usize) {
                Some(slot) => slot,
                None => debug_unreachable!("Marked slot out of bounds."),
            };

            let value = match slot {
                Slot::Live { marked, value, .. } => {
                    if *marked {
                        continue;
                    }

                    *marked = true;

                    value
                }

                // A child edge may point at a slot freed by an earlier pass
                // only through a dangling weak reference, which resolve()
                // already rejects.
                Slot::Free { .. } => continue,
            };

            mark_children(value, &mut work);
        }

        let mut freed_slots = 0;
        let mut dead_callbacks = Vec::new();
        let mut dead_proxies = Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Slot::Free { .. } => (),

                Slot::Live { marked: true, .. } => {
                    if let Slot::Live { marked, .. } = slot {
                        *marked = false;
                    }
                }

                Slot::Live { epoch, value, .. } => {
                    match value {
                        HeapValue::Function(FunctionKind::Host { context_id }) => {
                            dead_callbacks.push(*context_id);
                        }

                        HeapValue::Proxy(handler) => dead_proxies.push(*handler),

                        _ => (),
                    }

                    let epoch = epoch.wrapping_add(1);

                    *slot = Slot::Free {
                        epoch,
                        next: self.free_head,
                    };

                    self.free_head = Some(index as u32);

                    freed_slots += 1;
                }
            }
        }

        self.live_slots -= freed_slots;

        GcOutcome {
            freed_slots,
            dead_callbacks,
            dead_proxies,
        }
    }

    /// Force-releases everything at runtime teardown and reports every host
    /// callback function and proxy handler still resident so the bridge can
    /// retire them.
    pub(crate) fn teardown(&mut self) -> (Vec<u64>, Vec<u64>) {
        self.refs.clear();
        self.lexical.clear();
        self.microtasks.clear();

        let mut dead_callbacks = Vec::new();
        let mut dead_proxies = Vec::new();

        for slot in &self.slots {
            let value = match slot {
                Slot::Live { value, .. } => value,
                Slot::Free { .. } => continue,
            };

            match value {
                HeapValue::Function(FunctionKind::Host { context_id }) => {
                    dead_callbacks.push(*context_id);
                }

                HeapValue::Proxy(handler) => dead_proxies.push(*handler),

                _ => (),
            }
        }

        self.slots.clear();
        self.free_head = None;
        self.live_slots = 0;

        (dead_callbacks, dead_proxies)
    }

    #[inline(always)]
    pub(crate) fn gc_count(&self) -> u64 {
        self.gc_count
    }

    #[inline(always)]
    pub(crate) fn live_slot_count(&self) -> usize {
        self.live_slots
    }

    #[inline(always)]
    pub(crate) fn total_slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Approximate number of heap bytes held by live values, grouped by
    /// space. Read-only; never mutates engine state.
    pub(crate) fn space_sizes(&self) -> Vec<(&'static str, usize)> {
        let mut objects = 0;
        let mut arrays = 0;
        let mut strings = 0;
        let mut code = 0;
        let mut other = 0;

        for slot in &self.slots {
            let value = match slot {
                Slot::Live { value, .. } => value,
                Slot::Free { .. } => continue,
            };

            let size = value.approx_size();

            match value {
                HeapValue::Object(_) | HeapValue::Map(_) | HeapValue::Set(_) => objects += size,
                HeapValue::Array(_) | HeapValue::Bytes(_) => arrays += size,
                HeapValue::Symbol(_) => strings += size,
                HeapValue::Function(_) => code += size,
                _ => other += size,
            }
        }

        vec![
            ("objects", objects),
            ("arrays", arrays),
            ("strings", strings),
            ("code", code),
            ("other", other),
        ]
    }
}

fn push_child(work: &mut Vec<u32>, child: &ScriptVal) {
    if let ScriptVal::Ref(slot) = child {
        work.push(*slot);
    }
}

fn mark_children(value: &HeapValue, work: &mut Vec<u32>) {
    match value {
        HeapValue::Object(map) => {
            for child in map.values() {
                push_child(work, child);
            }
        }

        HeapValue::Array(items) => {
            for child in items {
                push_child(work, child);
            }
        }

        HeapValue::Map(map) => {
            for (key, child) in map {
                if let HeapKey::Ref(slot) = key {
                    work.push(*slot);
                }

                push_child(work, child);
            }
        }

        HeapValue::Set(set) => {
            for key in set {
                if let HeapKey::Ref(slot) = key {
                    work.push(*slot);
                }
            }
        }

        HeapValue::Promise(PromiseState::Fulfilled(child))
        | HeapValue::Promise(PromiseState::Rejected(child)) => push_child(work, child),

        HeapValue::Accessor { getter, setter } => {
            if let Some(slot) = getter {
                work.push(*slot);
            }

            if let Some(slot) = setter {
                work.push(*slot);
            }
        }

        HeapValue::Bytes(_)
        | HeapValue::Function(_)
        | HeapValue::Date(_)
        | HeapValue::Error(_)
        | HeapValue::Symbol(_)
        | HeapValue::Promise(PromiseState::Pending)
        | HeapValue::Proxy(_) => (),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_reference_survives_collection() {
        let mut engine = EngineCore::new();

        let slot = engine.alloc(HeapValue::Array(vec![ScriptVal::Number(1.0)]));
        let handle = engine.register_ref(slot);

        let outcome = engine.request_gc().unwrap();

        assert_eq!(outcome.freed_slots, 0);
        assert_eq!(engine.resolve(handle).unwrap(), slot);
    }

    #[test]
    fn weak_reference_goes_stale_after_collection() {
        let mut engine = EngineCore::new();

        let slot = engine.alloc(HeapValue::Object(IndexMap::new()));
        let handle = engine.register_ref(slot);

        engine.set_weak(handle.id, true).unwrap();

        let outcome = engine.request_gc().unwrap();

        assert_eq!(outcome.freed_slots, 1);
        assert!(matches!(
            engine.resolve(handle),
            Err(ScriptError::StaleHandle),
        ));
    }

    #[test]
    fn slot_reuse_bumps_epoch() {
        let mut engine = EngineCore::new();

        let slot = engine.alloc(HeapValue::Date(0));
        let handle = engine.register_ref(slot);

        engine.release_ref(handle.id);
        engine.request_gc().unwrap();

        let reused = engine.alloc(HeapValue::Date(1));

        assert_eq!(reused, slot);
        assert!(matches!(
            engine.resolve(handle),
            Err(ScriptError::StaleHandle),
        ));
    }

    #[test]
    fn release_is_idempotent() {
        let mut engine = EngineCore::new();

        let slot = engine.alloc(HeapValue::Symbol(CompactString::from("tag")));
        let handle = engine.register_ref(slot);

        assert!(engine.release_ref(handle.id));
        assert!(!engine.release_ref(handle.id));
    }

    #[test]
    fn collection_reports_dead_host_callbacks() {
        let mut engine = EngineCore::new();

        let slot = engine.alloc(HeapValue::Function(FunctionKind::Host { context_id: 7 }));
        let handle = engine.register_ref(slot);

        engine.release_ref(handle.id);

        let outcome = engine.request_gc().unwrap();

        assert_eq!(outcome.dead_callbacks, vec![7]);
    }
}
