//! # Astrolabe Main Crate
//!
//! Astrolabe is an embeddable scripting platform with a host-facing handle
//! lifecycle model and a bidirectional callback bridge.
//!
//! The central object is the [Runtime]: it owns one engine core, executes
//! source text, and hands script values back to the host as [Value]
//! wrappers. Wrappers are reference-counted handles into the engine heap
//! with stale-handle detection; they can be grouped into [Scope]s for bulk
//! release, weakened to let the collector reclaim their targets, and moved
//! between threads only through the runtime's ownership gate.
//!
//! Host functionality enters script through the [bridge] (callables with
//! calling-convention descriptors), the [proxy] interception protocol, and
//! the [interceptor] batch binder. Aggregate data crosses the boundary
//! through the [convert] module.
//!
//! ## Crate Features
//!
//! - `inspect` (default): the JSON debugger-protocol endpoint in the
//!   [inspect] module.

pub mod bridge;
pub mod convert;
pub mod error;
pub mod interceptor;
pub mod proxy;
pub mod runtime;
pub mod store;

#[cfg(feature = "inspect")]
pub mod inspect;

mod engine;
mod report;

pub use crate::{
    bridge::{AccessorCallable, Arity, CallbackSignature, Invocation},
    convert::{Converter, Native, ObjectConverter},
    engine::Handle,
    error::{ScriptError, ScriptResult, ScriptingDetails},
    interceptor::{FunctionBinder, Interceptor},
    proxy::{ProxyHandler, VirtualProperties},
    runtime::{
        Guard,
        HeapStatistics,
        Lease,
        Locker,
        PoolOptions,
        PromiseKind,
        PromiseResolver,
        Runtime,
        RuntimeOptions,
        RuntimePool,
        Scope,
        SpaceStatistics,
        Value,
        ValueKind,
    },
    store::ObjectStore,
};

#[cfg(feature = "inspect")]
pub use crate::inspect::Inspector;
