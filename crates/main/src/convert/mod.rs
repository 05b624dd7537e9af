//! Bidirectional conversion between host-native aggregates and script
//! values.

use chrono::{DateTime, TimeZone, Utc};
use compact_str::CompactString;
use indexmap::{IndexMap, IndexSet};

use crate::{
    engine::heap::{EngineCore, HeapKey, HeapValue, ScriptVal},
    error::{ScriptError, ScriptResult},
    runtime::{Runtime, Value},
};

/// A host-side model of a script-representable value.
///
/// Integers and floats are distinct on the host side; both surface as
/// script numbers, and a script number converts back to [Native::Int] when
/// it is exactly integral. Maps and sets preserve entry order.
#[derive(Clone, PartialEq, Debug)]
pub enum Native {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Native>),
    Map(Vec<(Native, Native)>),
    Set(Vec<Native>),

    /// An epoch-millisecond instant. Round-trips exactly.
    Instant(DateTime<Utc>),
}

/// A pluggable converter between [Native] aggregates and [Value] wrappers.
pub trait Converter {
    fn to_script(&self, runtime: &Runtime, native: &Native) -> ScriptResult<Value>;

    fn from_script(&self, value: &Value) -> ScriptResult<Native>;
}

/// The default converter.
///
/// Recursion is bounded by a depth limit; structures nested deeper than the
/// limit are rejected with a conversion error instead of overflowing the
/// stack.
pub struct ObjectConverter {
    max_depth: usize,
}

impl Default for ObjectConverter {
    #[inline(always)]
    fn default() -> Self {
        Self { max_depth: 20 }
    }
}

impl ObjectConverter {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Converter for ObjectConverter {
    fn to_script(&self, runtime: &Runtime, native: &Native) -> ScriptResult<Value> {
        runtime.shared.gate()?;

        let value = {
            let mut engine = runtime.shared.engine.borrow_mut();

            to_script_val(&mut engine, native, self.max_depth, 0)?
        };

        Ok(runtime.shared.wrap(value))
    }

    fn from_script(&self, value: &Value) -> ScriptResult<Native> {
        value.shared().gate()?;

        let script_val = value.script_val()?;
        let engine = value.shared().engine.borrow();

        from_script_val(&engine, &script_val, self.max_depth, 0)
    }
}

fn depth_guard(max_depth: usize, depth: usize) -> ScriptResult<()> {
    match depth > max_depth {
        true => Err(ScriptError::Conversion {
            message: CompactString::from("maximum conversion depth exceeded"),
        }),

        false => Ok(()),
    }
}

fn to_script_val(
    engine: &mut EngineCore,
    native: &Native,
    max_depth: usize,
    depth: usize,
) -> ScriptResult<ScriptVal> {
    depth_guard(max_depth, depth)?;

    Ok(match native {
        Native::Unit => ScriptVal::Null,
        Native::Bool(value) => ScriptVal::Bool(*value),
        Native::Int(value) => ScriptVal::Number(*value as f64),
        Native::Float(value) => ScriptVal::Number(*value),
        Native::Str(value) => ScriptVal::String(CompactString::from(value.as_str())),

        Native::Bytes(bytes) => {
            ScriptVal::Ref(engine.alloc(HeapValue::Bytes(bytes.clone())))
        }

        Native::List(items) => {
            let mut values = Vec::with_capacity(items.len());

            for item in items {
                values.push(to_script_val(engine, item, max_depth, depth + 1)?);
            }

            ScriptVal::Ref(engine.alloc(HeapValue::Array(values)))
        }

        Native::Map(entries) => {
            let mut map = IndexMap::with_capacity(entries.len());

            for (key, value) in entries {
                let key = to_heap_key(engine, key, max_depth, depth + 1)?;
                let value = to_script_val(engine, value, max_depth, depth + 1)?;

                map.insert(key, value);
            }

            ScriptVal::Ref(engine.alloc(HeapValue::Map(map)))
        }

        Native::Set(items) => {
            let mut set = IndexSet::with_capacity(items.len());

            for item in items {
                set.insert(to_heap_key(engine, item, max_depth, depth + 1)?);
            }

            ScriptVal::Ref(engine.alloc(HeapValue::Set(set)))
        }

        Native::Instant(instant) => {
            ScriptVal::Ref(engine.alloc(HeapValue::Date(instant.timestamp_millis())))
        }
    })
}

/// Maps a primitive native into a hashable script key. Aggregates are not
/// valid keys.
fn to_heap_key(
    engine: &mut EngineCore,
    native: &Native,
    max_depth: usize,
    depth: usize,
) -> ScriptResult<HeapKey> {
    let value = to_script_val(engine, native, max_depth, depth)?;

    match value {
        ScriptVal::Ref(_) => Err(ScriptError::Conversion {
            message: CompactString::from("aggregate values cannot be used as map or set keys"),
        }),

        value => Ok(HeapKey::from_val(&value)),
    }
}

fn from_script_val(
    engine: &EngineCore,
    value: &ScriptVal,
    max_depth: usize,
    depth: usize,
) -> ScriptResult<Native> {
    depth_guard(max_depth, depth)?;

    let slot = match value {
        ScriptVal::Undefined | ScriptVal::Null => return Ok(Native::Unit),
        ScriptVal::Bool(value) => return Ok(Native::Bool(*value)),
        ScriptVal::Number(value) => return Ok(number_to_native(*value)),
        ScriptVal::String(value) => return Ok(Native::Str(value.to_string())),
        ScriptVal::Ref(slot) => *slot,
    };

    match engine.slot_value(slot) {
        HeapValue::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());

            for (key, value) in map {
                entries.push((
                    Native::Str(key.to_string()),
                    from_script_val(engine, value, max_depth, depth + 1)?,
                ));
            }

            Ok(Native::Map(entries))
        }

        HeapValue::Array(items) => {
            let mut list = Vec::with_capacity(items.len());

            for item in items {
                list.push(from_script_val(engine, item, max_depth, depth + 1)?);
            }

            Ok(Native::List(list))
        }

        HeapValue::Bytes(bytes) => Ok(Native::Bytes(bytes.clone())),

        HeapValue::Map(map) => {
            let mut entries = Vec::with_capacity(map.len());

            for (key, value) in map {
                entries.push((
                    from_script_val(engine, &key.to_val(), max_depth, depth + 1)?,
                    from_script_val(engine, value, max_depth, depth + 1)?,
                ));
            }

            Ok(Native::Map(entries))
        }

        HeapValue::Set(set) => {
            let mut items = Vec::with_capacity(set.len());

            for key in set {
                items.push(from_script_val(engine, &key.to_val(), max_depth, depth + 1)?);
            }

            Ok(Native::Set(items))
        }

        HeapValue::Date(millis) => match Utc.timestamp_millis_opt(*millis) {
            chrono::LocalResult::Single(instant) => Ok(Native::Instant(instant)),

            _ => Err(ScriptError::Conversion {
                message: CompactString::from("date value is outside the representable range"),
            }),
        },

        other => Err(ScriptError::Conversion {
            message: CompactString::from(format!(
                "unsupported conversion source: {}",
                heap_kind_name(other),
            )),
        }),
    }
}

/// Script numbers come back as integers when exactly integral and
/// representable, and as floats otherwise.
fn number_to_native(value: f64) -> Native {
    if value.fract() == 0.0 {
        if let Ok(int) = cast::i64(value) {
            return Native::Int(int);
        }
    }

    Native::Float(value)
}

fn heap_kind_name(value: &HeapValue) -> &'static str {
    match value {
        HeapValue::Object(_) => "object",
        HeapValue::Array(_) => "array",
        HeapValue::Bytes(_) => "bytes",
        HeapValue::Function(_) => "function",
        HeapValue::Map(_) => "map",
        HeapValue::Set(_) => "set",
        HeapValue::Date(_) => "date",
        HeapValue::Error(_) => "error",
        HeapValue::Symbol(_) => "symbol",
        HeapValue::Promise(_) => "promise",
        HeapValue::Proxy(_) => "proxy",
        HeapValue::Accessor { .. } => "accessor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_come_back_as_integers() {
        assert_eq!(number_to_native(42.0), Native::Int(42));
        assert_eq!(number_to_native(-1.0), Native::Int(-1));
    }

    #[test]
    fn fractional_and_unrepresentable_numbers_stay_floats() {
        assert_eq!(number_to_native(0.5), Native::Float(0.5));
        assert!(matches!(number_to_native(1e300), Native::Float(_)));
        assert!(matches!(number_to_native(f64::NAN), Native::Float(_)));
    }
}
