use std::error::Error;
use std::fmt;
use tracing::Level;

/// A single log call as handed over by the logging façade.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    /// Logical subsystem; becomes an indexed tag, keep it low-cardinality.
    pub scope: String,
    /// Empty when caller capture is disabled.
    pub caller: String,
    /// Frames, innermost first. Empty when not captured.
    pub stack: Vec<String>,
    pub message: MessageSource,
    /// Alternating keys and values.
    pub key_values: Vec<Value>,
}

impl LogRecord {
    pub fn new(level: Level, scope: impl Into<String>, message: MessageSource) -> Self {
        Self {
            level,
            scope: scope.into(),
            caller: String::new(),
            stack: Vec::new(),
            message,
            key_values: Vec::new(),
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = caller.into();
        self
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_key_values(mut self, key_values: Vec<Value>) -> Self {
        self.key_values = key_values;
        self
    }
}

/// The three shapes a log message can arrive in.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageSource {
    /// Variadic operands, rendered and concatenated.
    Parts(Vec<Value>),
    /// Already rendered text.
    Text(String),
    /// printf-style format string and its arguments.
    Format { format: String, args: Vec<Value> },
}

impl MessageSource {
    pub fn text(s: impl Into<String>) -> Self {
        MessageSource::Text(s.into())
    }

    pub fn format(format: impl Into<String>, args: Vec<Value>) -> Self {
        MessageSource::Format {
            format: format.into(),
            args,
        }
    }
}

impl From<&str> for MessageSource {
    fn from(s: &str) -> Self {
        MessageSource::Text(s.to_string())
    }
}

impl From<String> for MessageSource {
    fn from(s: String) -> Self {
        MessageSource::Text(s)
    }
}

/// An arbitrary value attached to a log call.
///
/// Everything that is not a primitive is captured as text up front, so
/// records are `Send + 'static` and never hold borrowed or opaque data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    /// An error, captured as its message text.
    Error(String),
    /// Any other type, captured through its `Debug` rendering.
    Debug(String),
}

impl Value {
    pub fn error(err: &(dyn Error + 'static)) -> Self {
        Value::Error(err.to_string())
    }

    pub fn debug(value: &dyn fmt::Debug) -> Self {
        Value::Debug(format!("{:?}", value))
    }

    pub fn is_str(&self) -> bool {
        matches!(self, Value::Str(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) | Value::Error(s) | Value::Debug(s) => f.write_str(s),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F64(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::I64(v as i64)
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::U64(v as u64)
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64, isize);
impl_from_unsigned!(u8, u16, u32, u64, usize);

impl From<&(dyn Error + 'static)> for Value {
    fn from(err: &(dyn Error + 'static)) -> Self {
        Value::error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("a").to_string(), "a");
        assert_eq!(Value::from(-3i32).to_string(), "-3");
        assert_eq!(Value::from(7usize).to_string(), "7");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(Value::from(true).to_string(), "true");
    }

    #[test]
    fn test_value_from_error_captures_message() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let v = Value::error(&err);
        assert_eq!(v, Value::Error("disk full".to_string()));
        assert_eq!(v.to_string(), "disk full");
    }

    #[test]
    fn test_value_debug() {
        let v = Value::debug(&vec![1, 2]);
        assert_eq!(v.to_string(), "[1, 2]");
    }
}
