// Library registration system for the VM intrinsics
// Provides a clean way to register Rust functions as Lua libraries

use crate::lua_value::{CFunction, LuaFunction, LuaTable, LuaValue, MultiValue, TableRef, ThreadRef};
use crate::lua_vm::{LuaResult, LuaThread, LuaVM};
use crate::stdlib;
pub use crate::stdlib::Stdlib;

/// Type for value initializers - functions that create values when the module loads
pub type ValueInitializer = fn(&LuaVM) -> LuaValue;

/// Entry in a library module - can be a function or a value
pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

/// A library module containing multiple functions and values
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, func: CFunction) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, value_init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(value_init)));
        self
    }
}

/// Builder for creating library modules with functions
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

/// Registry for the VM libraries
#[derive(Default)]
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn load_all(&self, vm: &LuaVM) -> LuaResult<()> {
        for module in &self.modules {
            self.load_module(vm, module)?;
        }
        Ok(())
    }

    /// `_G` entries become globals; other modules become a global table.
    pub fn load_module(&self, vm: &LuaVM, module: &LibraryModule) -> LuaResult<()> {
        let make = |name: &str, entry: &LibraryEntry| match entry {
            LibraryEntry::Function(func) => LuaValue::Function(LuaFunction::host(name, *func)),
            LibraryEntry::Value(value_init) => value_init(vm),
        };

        if module.name == "_G" {
            for (name, entry) in &module.entries {
                vm.set_global(name, make(name, entry));
            }
            return Ok(());
        }

        let mut lib_table = LuaTable::new(0, module.entries.len());
        for (name, entry) in &module.entries {
            let qualified = format!("{}.{}", module.name, name);
            lib_table.set_str(name, make(&qualified, entry));
        }
        vm.set_global(module.name, LuaValue::table(lib_table));
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Option<&LibraryModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

pub fn create_standard_registry(lib: Stdlib) -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    if matches!(lib, Stdlib::Basic | Stdlib::All) {
        registry.register(stdlib::basic::create_basic_lib());
    }
    if matches!(lib, Stdlib::Coroutine | Stdlib::All) {
        registry.register(stdlib::coroutine::create_coroutine_lib());
    }
    registry
}

/// Argument `index` (1-based) or a "bad argument" error naming `func_name`.
pub fn require_arg(l: &LuaThread, args: &MultiValue, index: usize, func_name: &str) -> LuaResult<LuaValue> {
    match args.get(index - 1) {
        Some(v) => Ok(v.clone()),
        None => Err(l.error(format!(
            "bad argument #{} to '{}' (value expected)",
            index, func_name
        ))),
    }
}

/// "bad argument #n to 'f' (<expected> expected, got <type>)"
pub fn arg_type_error(l: &LuaThread, index: usize, func_name: &str, expected: &str, got: &LuaValue) -> crate::lua_vm::LuaError {
    let got = if got.is_nil() { "no value" } else { got.type_name() };
    l.error(format!(
        "bad argument #{} to '{}' ({} expected, got {})",
        index, func_name, expected, got
    ))
}

/// Optional integer argument, `default` when absent or nil.
pub fn opt_integer(l: &LuaThread, args: &MultiValue, index: usize, func_name: &str, default: i64) -> LuaResult<i64> {
    match args.get(index - 1) {
        None | Some(LuaValue::Nil) => Ok(default),
        Some(v) => v
            .to_integer()
            .or_else(|| v.to_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
            .ok_or_else(|| arg_type_error(l, index, func_name, "number", v)),
    }
}

pub fn check_table(l: &LuaThread, args: &MultiValue, index: usize, func_name: &str) -> LuaResult<TableRef> {
    match args.get(index - 1) {
        Some(LuaValue::Table(t)) => Ok(t.clone()),
        other => Err(arg_type_error(l, index, func_name, "table", other.unwrap_or(&LuaValue::Nil))),
    }
}

pub fn check_thread(l: &LuaThread, args: &MultiValue, index: usize, func_name: &str) -> LuaResult<ThreadRef> {
    match args.get(index - 1) {
        Some(LuaValue::Thread(t)) => Ok(t.clone()),
        other => Err(arg_type_error(l, index, func_name, "coroutine", other.unwrap_or(&LuaValue::Nil))),
    }
}
