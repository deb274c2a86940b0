// Function prototypes, closures, upvalues and host functions

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::lua_value::{LuaValue, MultiValue, TableRef};
use crate::lua_vm::lua_limits::LUA_IDSIZE;
use crate::lua_vm::{Instruction, LuaResult, LuaThread};

/// Register storage of one activation. Shared with open upvalues.
pub type RegisterFile = Rc<RefCell<Vec<LuaValue>>>;

/// Plain host function signature used by the library tables.
pub type CFunction = fn(&mut LuaThread, MultiValue) -> LuaResult<MultiValue>;

pub const VARARG_HASARG: u8 = 1;
pub const VARARG_ISVARARG: u8 = 2;
pub const VARARG_NEEDSARG: u8 = 4;

#[derive(Debug, Clone, Default)]
pub struct LocalVar {
    pub name: SmolStr,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Immutable compiled function.
#[derive(Debug, Clone, Default)]
pub struct Prototype {
    pub source: SmolStr,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_upvalues: u8,
    pub num_params: u8,
    pub vararg_flags: u8,
    pub max_stack_size: u8,
    pub code: Vec<Instruction>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<Rc<Prototype>>,
    pub line_info: Vec<u32>,
    pub locals: Vec<LocalVar>,
    pub upvalue_names: Vec<SmolStr>,
}

impl Prototype {
    pub fn is_vararg(&self) -> bool {
        self.vararg_flags & VARARG_ISVARARG != 0
    }

    pub fn needs_arg_table(&self) -> bool {
        self.vararg_flags & VARARG_NEEDSARG != 0
    }

    /// Source line of the instruction at `pc`, if line info was kept.
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }

    /// Name of the `n`-th (1-based) active local at `pc`.
    pub fn local_name(&self, mut n: usize, pc: usize) -> Option<&str> {
        if n == 0 {
            return None;
        }
        for local in &self.locals {
            if local.start_pc as usize > pc {
                break;
            }
            if pc < local.end_pc as usize {
                n -= 1;
                if n == 0 {
                    return Some(local.name.as_str());
                }
            }
        }
        None
    }

    /// Short source name as used in error positions.
    pub fn chunk_id(&self) -> String {
        let src = self.source.as_str();
        let budget = LUA_IDSIZE - 1;
        if let Some(rest) = src.strip_prefix('=') {
            rest.chars().take(budget).collect()
        } else if let Some(path) = src.strip_prefix('@') {
            // keep the tail of long file names
            let len = path.chars().count();
            if len <= budget {
                path.to_string()
            } else {
                let tail: String = path.chars().skip(len - (budget - 3)).collect();
                format!("...{}", tail)
            }
        } else if src.is_empty() {
            "?".to_string()
        } else {
            let first = src.lines().next().unwrap_or("");
            let room = budget - "[string \"...\"]".len();
            if first.len() < src.len() || first.chars().count() > room {
                let cut: String = first.chars().take(room).collect();
                format!("[string \"{}...\"]", cut)
            } else {
                format!("[string \"{}\"]", first)
            }
        }
    }
}

pub enum UpvalueState {
    Open { registers: RegisterFile, index: usize },
    Closed(LuaValue),
}

/// A captured variable. Open while its defining frame is live, closed once
/// the frame ends.
pub struct LuaUpvalue {
    state: RefCell<UpvalueState>,
}

pub type UpvalueRef = Rc<LuaUpvalue>;

impl LuaUpvalue {
    pub fn new_open(registers: RegisterFile, index: usize) -> UpvalueRef {
        Rc::new(LuaUpvalue {
            state: RefCell::new(UpvalueState::Open { registers, index }),
        })
    }

    pub fn new_closed(value: LuaValue) -> UpvalueRef {
        Rc::new(LuaUpvalue {
            state: RefCell::new(UpvalueState::Closed(value)),
        })
    }

    pub fn get(&self) -> LuaValue {
        match &*self.state.borrow() {
            UpvalueState::Open { registers, index } => {
                registers.borrow().get(*index).cloned().unwrap_or_default()
            }
            UpvalueState::Closed(v) => v.clone(),
        }
    }

    pub fn set(&self, value: LuaValue) {
        match &mut *self.state.borrow_mut() {
            UpvalueState::Open { registers, index } => {
                let mut regs = registers.borrow_mut();
                if *index >= regs.len() {
                    regs.resize(*index + 1, LuaValue::Nil);
                }
                regs[*index] = value;
            }
            UpvalueState::Closed(v) => *v = value,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.state.borrow(), UpvalueState::Open { .. })
    }

    /// Register index this upvalue aliases while open.
    pub fn open_index(&self) -> Option<usize> {
        match &*self.state.borrow() {
            UpvalueState::Open { index, .. } => Some(*index),
            UpvalueState::Closed(_) => None,
        }
    }

    /// Copy the register's current value into the upvalue and detach it.
    pub fn close(&self) {
        let value = match &*self.state.borrow() {
            UpvalueState::Open { registers, index } => {
                registers.borrow().get(*index).cloned().unwrap_or_default()
            }
            UpvalueState::Closed(_) => return,
        };
        *self.state.borrow_mut() = UpvalueState::Closed(value);
    }
}

/// A prototype bound to its captured upvalues and environment.
pub struct LuaClosure {
    pub proto: Rc<Prototype>,
    pub upvalues: Vec<UpvalueRef>,
    pub env: TableRef,
}

impl LuaClosure {
    pub fn new(proto: Rc<Prototype>, upvalues: Vec<UpvalueRef>, env: TableRef) -> Self {
        LuaClosure {
            proto,
            upvalues,
            env,
        }
    }
}

/// A function implemented by the host.
pub struct HostFunction {
    pub name: SmolStr,
    func: Box<dyn Fn(&mut LuaThread, MultiValue) -> LuaResult<MultiValue>>,
}

impl HostFunction {
    pub fn new(
        name: impl Into<SmolStr>,
        func: impl Fn(&mut LuaThread, MultiValue) -> LuaResult<MultiValue> + 'static,
    ) -> Self {
        HostFunction {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn call(&self, l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
        (self.func)(l, args)
    }
}

#[derive(Clone)]
pub enum LuaFunction {
    Lua(Rc<LuaClosure>),
    Host(Rc<HostFunction>),
}

impl LuaFunction {
    pub fn host(name: &str, func: CFunction) -> Self {
        LuaFunction::Host(Rc::new(HostFunction::new(name, func)))
    }

    pub fn host_closure(
        name: &str,
        func: impl Fn(&mut LuaThread, MultiValue) -> LuaResult<MultiValue> + 'static,
    ) -> Self {
        LuaFunction::Host(Rc::new(HostFunction::new(name, func)))
    }

    pub fn ptr_eq(&self, other: &LuaFunction) -> bool {
        match (self, other) {
            (LuaFunction::Lua(a), LuaFunction::Lua(b)) => Rc::ptr_eq(a, b),
            (LuaFunction::Host(a), LuaFunction::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn address(&self) -> usize {
        match self {
            LuaFunction::Lua(c) => Rc::as_ptr(c) as *const () as usize,
            LuaFunction::Host(h) => Rc::as_ptr(h) as *const () as usize,
        }
    }

    pub fn as_closure(&self) -> Option<&Rc<LuaClosure>> {
        match self {
            LuaFunction::Lua(c) => Some(c),
            LuaFunction::Host(_) => None,
        }
    }
}

impl fmt::Debug for LuaFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaFunction::Lua(c) => write!(f, "function <{}:{}>", c.proto.chunk_id(), c.proto.line_defined),
            LuaFunction::Host(h) => write!(f, "function [host {}]", h.name),
        }
    }
}
