use std::{
    error::Error as StdError,
    fmt::{Debug, Display, Formatter},
    result::Result as StdResult,
};

use compact_str::CompactString;

/// A result of a runtime API call, which can either be a normal value or a
/// [ScriptError].
pub type ScriptResult<T> = StdResult<T, ScriptError>;

/// Represents any error that may occur while working with a
/// [Runtime](crate::runtime::Runtime).
///
/// The error taxonomy distinguishes four families:
///
///  - *Compilation* errors: the source text was rejected before execution.
///  - *Execution* errors: an exception was raised while running valid code.
///  - *System* errors: handle and lifecycle contract violations (stale
///    handle, cross-runtime handle, lock conflict, closed runtime,
///    terminated execution, callback signature mismatch).
///  - *Conversion* errors: a value cannot be represented in the target type.
///
/// Compilation and execution errors always carry full structured detail in
/// the form of a [ScriptingDetails] record and are never swallowed by the
/// runtime. Conversion errors are recoverable and reported per value.
/// Internal lifecycle corruption does not surface through this enum at all;
/// it fails fast through the crate's invariant macros.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ScriptError {
    /// The source text was rejected by the engine's parser before execution.
    Compilation {
        /// Structured description of the offending source range.
        details: ScriptingDetails,
    },

    /// An exception was raised while executing valid code.
    Execution {
        /// Structured description of the throw site.
        details: ScriptingDetails,
    },

    /// A value wrapper was accessed after its handle was released, or after
    /// the engine's collector invalidated a weak handle.
    StaleHandle,

    /// A value wrapper that belongs to one runtime was passed to an
    /// operation of another runtime.
    CrossRuntimeHandle,

    /// The runtime was used from a thread that does not currently hold its
    /// lock.
    LockConflict,

    /// The runtime has already been closed.
    RuntimeClosed,

    /// Script execution was interrupted by a termination request (for
    /// example, by a [Guard](crate::runtime::Guard) timeout).
    Terminated,

    /// A host callable was registered or invoked in a way that contradicts
    /// its calling-convention descriptor.
    SignatureMismatch {
        /// Human-readable description of the mismatch.
        message: CompactString,
    },

    /// A value cannot be represented in the requested target shape.
    Conversion {
        /// Human-readable description of the unsupported conversion.
        message: CompactString,
    },

    /// The engine heap exceeded the limit set in
    /// [RuntimeOptions](crate::runtime::RuntimeOptions).
    OutOfMemory,
}

impl Display for ScriptError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compilation { details } => {
                formatter.write_fmt(format_args!("compilation error: {}", details.message))
            }

            Self::Execution { details } => {
                formatter.write_fmt(format_args!("execution error: {}", details.message))
            }

            Self::StaleHandle => formatter.write_str("stale handle"),

            Self::CrossRuntimeHandle => {
                formatter.write_str("value wrapper belongs to another runtime")
            }

            Self::LockConflict => {
                formatter.write_str("runtime lock is held by another thread")
            }

            Self::RuntimeClosed => formatter.write_str("runtime is closed"),

            Self::Terminated => formatter.write_str("script execution terminated"),

            Self::SignatureMismatch { message } => {
                formatter.write_fmt(format_args!("callback signature mismatch: {message}"))
            }

            Self::Conversion { message } => {
                formatter.write_fmt(format_args!("conversion error: {message}"))
            }

            Self::OutOfMemory => formatter.write_str("engine heap limit exceeded"),
        }
    }
}

impl StdError for ScriptError {}

impl ScriptError {
    /// Returns the structured scripting details if this is a compilation or
    /// execution error, and `None` otherwise.
    #[inline(always)]
    pub fn details(&self) -> Option<&ScriptingDetails> {
        match self {
            Self::Compilation { details } | Self::Execution { details } => Some(details),
            _ => None,
        }
    }

    /// Returns the bare error message.
    ///
    /// For compilation and execution errors this is the script-level message
    /// (e.g. `"SyntaxError: Unexpected token '='"`); for other errors it is
    /// the [Display] rendering.
    #[inline]
    pub fn message(&self) -> String {
        match self.details() {
            Some(details) => details.message.to_string(),
            None => self.to_string(),
        }
    }
}

/// Structured detail of a compilation or execution error.
///
/// Line numbers are 1-based; columns and absolute positions are 0-based,
/// following the surface of the embedded engine. The resource name defaults
/// to `"undefined"` when the executed source was not given a name.
///
/// The [Display] implementation renders the stable multi-line layout:
///
/// ```text
/// Error: <message>
/// Resource: <name>
/// Source Code: <line>
/// Line Number: <n>
/// Column: <start>, <end>
/// Position: <start>, <end>
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ScriptingDetails {
    /// The script-level error message, including the error kind prefix.
    pub message: String,

    /// The name of the executed resource.
    pub resource_name: String,

    /// The full text of the offending source line.
    pub source_line: String,

    /// 1-based line number of the offending range.
    pub line_number: usize,

    /// 0-based column where the offending range starts.
    pub start_column: usize,

    /// 0-based column just past the offending range.
    pub end_column: usize,

    /// 0-based absolute position where the offending range starts.
    pub start_position: usize,

    /// 0-based absolute position just past the offending range.
    pub end_position: usize,
}

impl Debug for ScriptingDetails {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, formatter)
    }
}

impl Display for ScriptingDetails {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_fmt(format_args!("Error: {}\n", self.message))?;
        formatter.write_fmt(format_args!("Resource: {}\n", self.resource_name))?;
        formatter.write_fmt(format_args!("Source Code: {}\n", self.source_line))?;
        formatter.write_fmt(format_args!("Line Number: {}\n", self.line_number))?;
        formatter.write_fmt(format_args!(
            "Column: {}, {}\n",
            self.start_column, self.end_column,
        ))?;
        formatter.write_fmt(format_args!(
            "Position: {}, {}",
            self.start_position, self.end_position,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_render_stable_layout() {
        let details = ScriptingDetails {
            message: String::from("SyntaxError: Unexpected token '='"),
            resource_name: String::from("undefined"),
            source_line: String::from("a ==== 2;"),
            line_number: 2,
            start_column: 5,
            end_column: 6,
            start_position: 18,
            end_position: 19,
        };

        assert_eq!(
            details.to_string(),
            "Error: SyntaxError: Unexpected token '='\n\
             Resource: undefined\n\
             Source Code: a ==== 2;\n\
             Line Number: 2\n\
             Column: 5, 6\n\
             Position: 18, 19",
        );
    }
}
