use std::fmt;

use crate::lua_value::{LuaValue, TableError};

/// Unrecoverable interpreter failure. Kills the thread it happens on and
/// cannot be caught by `pcall`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// A single resume executed more instructions than allowed.
    InstructionFuse(u64),
    /// The program counter left the function's code.
    BadProgramCounter(usize),
    /// An instruction word carried an opcode outside the instruction set.
    InvalidOpcode(u8),
    /// Frame bookkeeping no longer matches the call stack.
    CorruptedStack(&'static str),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::InstructionFuse(n) => {
                write!(f, "instruction limit exceeded ({} instructions)", n)
            }
            FatalError::BadProgramCounter(pc) => write!(f, "program counter out of range ({})", pc),
            FatalError::InvalidOpcode(op) => write!(f, "invalid opcode {}", op),
            FatalError::CorruptedStack(what) => write!(f, "corrupted call stack: {}", what),
        }
    }
}

/// A script-level error: the raised value plus where it happened.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub value: LuaValue,
    /// Call-stack trace captured when the error was raised.
    pub traceback: Option<String>,
    /// Id of the thread the error was raised on.
    pub thread_id: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum LuaError {
    Runtime(Box<RuntimeError>),
    /// Control signal: the running coroutine yields. Never surfaces to hosts.
    Yield,
    Fatal(FatalError),
}

pub type LuaResult<T> = Result<T, LuaError>;

impl LuaError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::from_value(LuaValue::from(message.into()))
    }

    /// Error carrying an arbitrary Lua value (as raised by `error(v)`).
    pub fn from_value(value: LuaValue) -> Self {
        LuaError::Runtime(Box::new(RuntimeError {
            value,
            traceback: None,
            thread_id: None,
        }))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, LuaError::Fatal(_))
    }

    /// The raised value; a string describing the failure for fatal errors.
    pub fn value(&self) -> LuaValue {
        match self {
            LuaError::Runtime(e) => e.value.clone(),
            LuaError::Yield => LuaValue::from("attempt to yield"),
            LuaError::Fatal(f) => LuaValue::from(f.to_string()),
        }
    }

    pub fn traceback(&self) -> Option<&str> {
        match self {
            LuaError::Runtime(e) => e.traceback.as_deref(),
            _ => None,
        }
    }

    pub fn thread_id(&self) -> Option<usize> {
        match self {
            LuaError::Runtime(e) => e.thread_id,
            _ => None,
        }
    }

    /// Message plus traceback, as printed by the default error reporters.
    pub fn full_message(&self) -> String {
        match self.traceback() {
            Some(tb) => format!("{}\n{}", self, tb),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaError::Runtime(e) => match &e.value {
                LuaValue::String(s) => f.write_str(s),
                LuaValue::Nil => f.write_str("nil"),
                v => write!(f, "(error object is a {} value)", v.type_name()),
            },
            LuaError::Yield => f.write_str("attempt to yield"),
            LuaError::Fatal(e) => write!(f, "fatal: {}", e),
        }
    }
}

impl std::error::Error for LuaError {}

impl From<FatalError> for LuaError {
    fn from(e: FatalError) -> Self {
        LuaError::Fatal(e)
    }
}

impl From<TableError> for LuaError {
    fn from(e: TableError) -> Self {
        LuaError::runtime(e.to_string())
    }
}
