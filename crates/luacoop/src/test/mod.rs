pub mod test_coroutine;
pub mod test_stdlib;
pub mod test_thread_group;
pub mod test_value;


use std::rc::Rc;

use crate::lua_value::{LuaFunction, LuaValue, MultiValue, Prototype, VARARG_ISVARARG};
use crate::lua_vm::{Instruction, LuaResult, LuaVM, OpCode, SafeOption};
use crate::stdlib::Stdlib;

/// Assembles prototypes for tests. Instruction `i` is given source line
/// `i + 1`, so error positions read `test:<pc + 1>:`.
pub struct ProtoBuilder {
    proto: Prototype,
}

impl ProtoBuilder {
    pub fn new() -> Self {
        ProtoBuilder {
            proto: Prototype {
                source: "=test".into(),
                max_stack_size: 16,
                ..Default::default()
            },
        }
    }

    pub fn params(&mut self, n: u8) -> &mut Self {
        self.proto.num_params = n;
        self
    }

    pub fn vararg(&mut self) -> &mut Self {
        self.proto.vararg_flags = VARARG_ISVARARG;
        self
    }

    pub fn upvalues(&mut self, n: u8) -> &mut Self {
        self.proto.num_upvalues = n;
        self
    }

    pub fn line_defined(&mut self, line: u32) -> &mut Self {
        self.proto.line_defined = line;
        self
    }

    /// Index of constant `v`, added if not present yet.
    pub fn k(&mut self, v: impl Into<LuaValue>) -> u32 {
        let v = v.into();
        if let Some(i) = self.proto.constants.iter().position(|c| c.raw_equal(&v) && c.kind() == v.kind()) {
            return i as u32;
        }
        self.proto.constants.push(v);
        (self.proto.constants.len() - 1) as u32
    }

    /// Constant `v` as an RK operand.
    pub fn rk(&mut self, v: impl Into<LuaValue>) -> u32 {
        Instruction::rk_const(self.k(v))
    }

    pub fn child(&mut self, proto: Prototype) -> u32 {
        self.proto.protos.push(Rc::new(proto));
        (self.proto.protos.len() - 1) as u32
    }

    fn push(&mut self, instr: Instruction) -> &mut Self {
        self.proto.code.push(instr);
        self.proto.line_info.push(self.proto.code.len() as u32);
        self
    }

    pub fn abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> &mut Self {
        self.push(Instruction::create_abc(op, a, b, c))
    }

    pub fn abx(&mut self, op: OpCode, a: u32, bx: u32) -> &mut Self {
        self.push(Instruction::create_abx(op, a, bx))
    }

    pub fn asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> &mut Self {
        self.push(Instruction::create_asbx(op, a, sbx))
    }

    /// A raw code word (SETLIST's extended count).
    pub fn word(&mut self, w: u32) -> &mut Self {
        self.push(Instruction::from_u32(w))
    }

    pub fn local(&mut self, name: &str, start_pc: u32, end_pc: u32) -> &mut Self {
        self.proto.locals.push(crate::lua_value::LocalVar {
            name: name.into(),
            start_pc,
            end_pc,
        });
        self
    }

    pub fn into_proto(&self) -> Prototype {
        self.proto.clone()
    }

    pub fn build(&self) -> Rc<Prototype> {
        Rc::new(self.proto.clone())
    }
}

pub fn new_vm() -> Rc<LuaVM> {
    let vm = LuaVM::new(SafeOption::default());
    vm.open_stdlib(Stdlib::All).unwrap();
    vm
}

pub fn load(vm: &LuaVM, proto: Rc<Prototype>) -> LuaValue {
    LuaValue::Function(vm.load(proto))
}

/// Run a main chunk to completion.
pub fn run(vm: &Rc<LuaVM>, proto: Rc<Prototype>) -> LuaResult<MultiValue> {
    let main = load(vm, proto);
    vm.call_function(&main, MultiValue::empty())
}

pub fn host(name: &str, f: crate::lua_value::CFunction) -> LuaValue {
    LuaValue::Function(LuaFunction::host(name, f))
}
