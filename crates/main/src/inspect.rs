//! A minimal debugger-protocol endpoint over JSON messages.
//!
//! The inspector speaks a request/response protocol: [Inspector::send]
//! handles one request and returns the response, and out-of-band events
//! (thrown exceptions) are delivered to an optional notification listener.

use std::cell::{Cell, RefCell};

use serde_json::{json, Value as Json};

use crate::{
    error::{ScriptError, ScriptResult},
    runtime::{Runtime, Value, ValueKind},
};

type Listener = Box<dyn Fn(Json)>;

/// A protocol session attached to one runtime.
pub struct Inspector {
    runtime: Runtime,
    next_id: Cell<u64>,
    listener: RefCell<Option<Listener>>,
}

impl Inspector {
    #[inline(always)]
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            next_id: Cell::new(1),
            listener: RefCell::new(None),
        }
    }

    /// Installs the notification listener. Notifications are JSON objects
    /// with a `method` field and no `id`.
    pub fn on_notification(&self, listener: impl Fn(Json) + 'static) {
        *self.listener.borrow_mut() = Some(Box::new(listener));
    }

    /// Handles one protocol request and returns its response. Unknown
    /// methods produce a response carrying an `error` field rather than a
    /// hard failure.
    pub fn send(&self, method: &str, params: &Json) -> ScriptResult<Json> {
        let id = self.next_id.get();

        self.next_id.set(id + 1);

        let result = match method {
            "Runtime.evaluate" => self.evaluate(params)?,

            "HeapProfiler.collectGarbage" => {
                self.runtime.low_memory_notification()?;

                json!({})
            }

            "Runtime.getHeapUsage" => {
                let statistics = self.runtime.heap_statistics()?;

                serde_json::to_value(&statistics).unwrap_or(Json::Null)
            }

            unknown => {
                return Ok(json!({
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("method not found: {unknown}"),
                    },
                }));
            }
        };

        Ok(json!({ "id": id, "result": result }))
    }

    fn evaluate(&self, params: &Json) -> ScriptResult<Json> {
        let Some(expression) = params.get("expression").and_then(Json::as_str) else {
            return Ok(json!({
                "exceptionDetails": { "text": "missing expression parameter" },
            }));
        };

        match self.runtime.execute(expression) {
            Ok(value) => Ok(json!({ "result": remote_object(&value)? })),

            Err(error) => {
                self.notify_exception(&error);

                Ok(json!({
                    "exceptionDetails": { "text": error.to_string() },
                }))
            }
        }
    }

    fn notify_exception(&self, error: &ScriptError) {
        let listener = self.listener.borrow();

        let Some(listener) = listener.as_ref() else {
            return;
        };

        let details = match error.details() {
            Some(details) => json!({
                "text": details.message.clone(),
                "url": details.resource_name.clone(),
                "lineNumber": details.line_number,
                "columnNumber": details.start_column,
            }),

            None => json!({ "text": error.to_string() }),
        };

        listener(json!({
            "method": "Runtime.exceptionThrown",
            "params": { "exceptionDetails": details },
        }));
    }
}

/// Renders a value in the protocol's remote-object shape.
fn remote_object(value: &Value) -> ScriptResult<Json> {
    Ok(match value.kind() {
        ValueKind::Undefined => json!({ "type": "undefined" }),

        ValueKind::Null => json!({ "type": "object", "subtype": "null", "value": null }),

        ValueKind::Boolean => json!({
            "type": "boolean",
            "value": value.as_bool(),
        }),

        ValueKind::Number => json!({
            "type": "number",
            "value": value.as_f64(),
        }),

        ValueKind::String => json!({
            "type": "string",
            "value": value.as_str(),
        }),

        kind => json!({
            "type": "object",
            "subtype": format!("{kind:?}").to_lowercase(),
            "description": value.to_text()?.as_str(),
        }),
    })
}
