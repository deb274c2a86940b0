// Lua 5.1 virtual machine core
// Values, tables, a stackless bytecode interpreter and cooperative threads
// ticked by a scheduler

#[cfg(test)]
mod test;

pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod persist;
pub mod scheduler;
pub mod stdlib;

#[cfg(feature = "serde")]
pub mod serde;

pub use lib_registry::LibraryRegistry;
pub use lua_value::chunk_serializer::{dump, undump};
pub use lua_value::{LuaFunction, LuaTable, LuaValue, MultiValue, Prototype};
pub use lua_vm::{
    Instruction, LuaError, LuaResult, LuaThread, LuaVM, OpCode, ResumeOutcome, SafeOption,
    ThreadStatus,
};
pub use scheduler::{RunState, ThreadGroup};
pub use stdlib::Stdlib;
