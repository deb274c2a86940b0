// Lua virtual machine: shared state plus the interpreter
mod debug_info;
pub(crate) mod execute;
pub mod lua_error;
pub mod lua_limits;
mod lua_thread;
pub mod opcode;
mod safe_option;
mod stack_frame;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashSet;

pub use execute::TmKind;
pub use execute::arith::ArithOp;
pub use lua_error::{FatalError, LuaError, LuaResult, RuntimeError};
pub use lua_thread::{LuaThread, ResumeOutcome, ThreadStatus};
pub use opcode::{Instruction, OpCode, OpMode};
pub use safe_option::SafeOption;
pub use stack_frame::StackFrame;

use crate::lib_registry::{self, Stdlib};
use crate::persist::{ObjectId, references};
use crate::lua_value::{
    CFunction, LuaClosure, LuaFunction, LuaTable, LuaValue, MultiValue, Prototype, TableRef,
    ThreadRef,
};

/// State shared by every thread of one VM: globals, registry, the string
/// metatable and the safety options.
pub struct LuaVM {
    globals: TableRef,
    registry: TableRef,
    string_metatable: RefCell<Option<TableRef>>,
    options: SafeOption,
    next_thread_id: Cell<usize>,
}

impl LuaVM {
    pub fn new(options: SafeOption) -> Rc<Self> {
        Rc::new(LuaVM {
            globals: Rc::new(RefCell::new(LuaTable::new(0, 32))),
            registry: Rc::new(RefCell::new(LuaTable::new(0, 4))),
            string_metatable: RefCell::new(None),
            options,
            next_thread_id: Cell::new(1),
        })
    }

    pub fn options(&self) -> &SafeOption {
        &self.options
    }

    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    pub fn registry(&self) -> TableRef {
        self.registry.clone()
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().get_str(name)
    }

    pub fn set_global(&self, name: &str, value: LuaValue) {
        self.globals.borrow_mut().set_str(name, value);
    }

    /// Register a host function as a global.
    pub fn register_function(&self, name: &str, func: CFunction) {
        self.set_global(name, LuaValue::Function(LuaFunction::host(name, func)));
    }

    pub fn string_metatable(&self) -> Option<TableRef> {
        self.string_metatable.borrow().clone()
    }

    pub fn set_string_metatable(&self, mt: Option<TableRef>) {
        *self.string_metatable.borrow_mut() = mt;
    }

    /// Open the VM intrinsics into the globals table.
    pub fn open_stdlib(&self, lib: Stdlib) -> LuaResult<()> {
        lib_registry::create_standard_registry(lib).load_all(self)
    }

    pub(crate) fn alloc_thread_id(&self) -> usize {
        let id = self.next_thread_id.get();
        self.next_thread_id.set(id + 1);
        id
    }

    /// Bind a main-chunk prototype to the globals table.
    pub fn load(&self, proto: Rc<Prototype>) -> LuaFunction {
        LuaFunction::Lua(Rc::new(LuaClosure::new(proto, Vec::new(), self.globals())))
    }

    /// A thread that will call `func(args...)` on its first resume.
    pub fn new_thread(self: &Rc<Self>, func: LuaValue, args: MultiValue) -> ThreadRef {
        let thread = LuaThread::new_ref(self.clone());
        thread.borrow_mut().start(func, args);
        thread
    }

    /// Tear down the object graph reachable from the globals, the registry
    /// and the string metatable. Values stored in globals commonly point
    /// back at them (every closure keeps the globals as its environment), so
    /// reference counting alone never frees that graph. Reachable threads
    /// are destroyed, closure upvalues reset to nil and tables emptied.
    pub fn close(&self) {
        let mut pending = vec![
            LuaValue::Table(self.globals.clone()),
            LuaValue::Table(self.registry.clone()),
        ];
        if let Some(mt) = self.string_metatable.borrow_mut().take() {
            pending.push(LuaValue::Table(mt));
        }

        let mut seen = AHashSet::new();
        let mut tables = Vec::new();
        let mut closures = Vec::new();
        let mut threads = Vec::new();
        while let Some(value) = pending.pop() {
            let Some(id) = ObjectId::of(&value) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            pending.extend(references(&value));
            match value {
                LuaValue::Table(t) => tables.push(t),
                LuaValue::Function(LuaFunction::Lua(c)) => closures.push(c),
                LuaValue::Thread(t) => threads.push(t),
                _ => {}
            }
        }

        for thread in &threads {
            if let Ok(mut t) = thread.try_borrow_mut() {
                t.destroy();
            }
        }
        for closure in &closures {
            for upvalue in &closure.upvalues {
                upvalue.set(LuaValue::Nil);
            }
        }
        for table in &tables {
            // contents are dropped after the borrow ends
            let contents = match table.try_borrow_mut() {
                Ok(mut t) => std::mem::take(&mut *t),
                Err(_) => continue,
            };
            drop(contents);
        }
    }

    /// Run `func` to completion on a fresh thread. Yielding is an error.
    pub fn call_function(self: &Rc<Self>, func: &LuaValue, args: MultiValue) -> LuaResult<MultiValue> {
        let thread = LuaThread::new_ref(self.clone());
        let mut l = thread.borrow_mut();
        l.call(func, args)
    }
}
