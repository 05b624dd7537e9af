//! The embedded script engine: source text management, lexer, parser, value
//! heap, and the evaluator.
//!
//! Nothing in this module is public API except the [Handle] identifier. The
//! [Runtime](crate::runtime::Runtime) wraps the engine entirely and
//! serializes all access to it.

pub(crate) mod eval;
pub(crate) mod heap;
pub(crate) mod lexer;
pub(crate) mod parser;
pub(crate) mod source;

pub use crate::engine::heap::Handle;
