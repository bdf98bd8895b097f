//! Host-side values
//!
//! Everything the module can hold a handle to. Views into module memory carry
//! the buffer generation they were created under so a stale one is detectable.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::gl::{GlRef, GraphicsContext};

/// A host error object (`name`, `message`, `stack`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    pub name: String,
    pub message: String,
    pub stack: String,
}

impl HostError {
    pub fn new(name: &str, message: impl Into<String>) -> Self {
        HostError {
            name: name.to_string(),
            message: message.into(),
            stack: String::new(),
        }
    }

    /// A plain `Error`
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for HostError {}

/// A typed window into module memory held by the host (`new Uint8Array(memory.buffer, off, len)`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWindow {
    pub generation: u64,
    pub byte_offset: u32,
    /// Length in elements
    pub len: u32,
}

/// Any value that can sit in the handle table
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<HostValue>),
    /// Host-owned `Int32Array`
    Int32Array(Vec<i32>),
    /// The module's memory object
    Memory,
    /// `memory.buffer` as of a given generation
    ArrayBuffer { generation: u64 },
    Uint8View(MemoryWindow),
    Int32View(MemoryWindow),
    /// Buffer, program, shader or uniform location
    Gl(GlRef),
    Extension(String),
    Context(Rc<dyn GraphicsContext>),
    Error(HostError),
    /// Any other plain object
    Object(serde_json::Value),
}

impl HostValue {
    /// Constructor-style tag, as `Object.prototype.toString` would report it
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Array(_) => "Array",
            HostValue::Int32Array(_) | HostValue::Int32View(_) => "Int32Array",
            HostValue::Memory => "Memory",
            HostValue::ArrayBuffer { .. } => "ArrayBuffer",
            HostValue::Uint8View(_) => "Uint8Array",
            HostValue::Gl(r) => r.object().type_name(),
            HostValue::Extension(_) => "WebGLExtension",
            HostValue::Context(_) => "WebGL2RenderingContext",
            HostValue::Error(_) => "Error",
            HostValue::Object(_) => "Object",
        }
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<HostError> for HostValue {
    fn from(e: HostError) -> Self {
        HostValue::Error(e)
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&debug_string(self))
    }
}

/// Format a number the way JS string conversion does for the common cases
fn js_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Describe any host value for diagnostics
pub fn debug_string(value: &HostValue) -> String {
    match value {
        HostValue::Undefined => "undefined".to_string(),
        HostValue::Null => "null".to_string(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Number(n) => js_number(*n),
        HostValue::String(s) => format!("\"{}\"", s),
        HostValue::Array(items) => {
            let inner: Vec<String> = items.iter().map(debug_string).collect();
            format!("[{}]", inner.join(", "))
        }
        HostValue::Error(e) => format!("{}: {}\n{}", e.name, e.message, e.stack),
        HostValue::Object(json) => format!("Object({})", json),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{GlBuffer, GlObject, RecordingContext};

    #[test]
    fn test_debug_string_primitives() {
        assert_eq!(debug_string(&HostValue::Undefined), "undefined");
        assert_eq!(debug_string(&HostValue::Null), "null");
        assert_eq!(debug_string(&HostValue::Bool(true)), "true");
        assert_eq!(debug_string(&HostValue::Number(3.0)), "3");
        assert_eq!(debug_string(&HostValue::Number(16.6)), "16.6");
        assert_eq!(debug_string(&HostValue::Number(f64::NAN)), "NaN");
        assert_eq!(debug_string(&"circle".into()), "\"circle\"");
    }

    #[test]
    fn test_debug_string_nested_array() {
        let value = HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Array(vec!["a".into(), HostValue::Null]),
        ]);
        assert_eq!(debug_string(&value), "[1, [\"a\", null]]");
        assert_eq!(debug_string(&HostValue::Array(vec![])), "[]");
    }

    #[test]
    fn test_debug_string_error_and_objects() {
        let err = HostError::type_error("bad handle").with_stack("at getParameter");
        assert_eq!(
            debug_string(&err.into()),
            "TypeError: bad handle\nat getParameter"
        );
        let obj = HostValue::Object(serde_json::json!({ "width": 800 }));
        assert_eq!(debug_string(&obj), "Object({\"width\":800})");
        let ctx: Rc<dyn GraphicsContext> = Rc::new(RecordingContext::new(1, 1));
        let buffer = HostValue::Gl(GlRef::new(&ctx, GlObject::Buffer(GlBuffer(3))));
        assert_eq!(debug_string(&buffer), "WebGLBuffer");
    }
}
