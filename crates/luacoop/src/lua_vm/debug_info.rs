// Variable names for error messages ("global 'x'", "field 'y'", ...),
// recovered from the bytecode around the failing instruction.

use crate::lua_value::{LuaValue, Prototype};
use crate::lua_vm::{Instruction, LuaThread, OpCode};

/// Describe the value the current instruction failed on, if it came from
/// a register the bytecode lets us name.
pub(crate) fn describe_value(l: &LuaThread, value: &LuaValue) -> Option<(&'static str, String)> {
    let frame = l.top_frame()?;
    let proto = &frame.closure.proto;
    let pc = frame.pc.checked_sub(1)?;
    let instr = *proto.code.get(pc)?;
    let op = instr.get_opcode()?;
    let (a, b, c) = (instr.get_a(), instr.get_b(), instr.get_c());

    let mut candidates: Vec<u32> = Vec::with_capacity(2);
    match op {
        OpCode::GetTable | OpCode::Self_ | OpCode::Unm | OpCode::Len => candidates.push(b),
        OpCode::SetTable | OpCode::Call | OpCode::TailCall => candidates.push(a),
        OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
            for rk in [b, c] {
                if !Instruction::is_k(rk) {
                    candidates.push(rk);
                }
            }
        }
        OpCode::Concat => candidates.extend(b..=c),
        _ => return None,
    }

    let regs = frame.registers.borrow();
    candidates
        .into_iter()
        .find(|r| regs.get(*r as usize).is_some_and(|v| v.raw_equal(value)))
        .and_then(|r| describe_register(proto, pc, r))
}

fn constant_name(proto: &Prototype, index: usize) -> Option<String> {
    match proto.constants.get(index)? {
        LuaValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

/// Name of register `reg` just before instruction `pc` executes.
pub(crate) fn describe_register(proto: &Prototype, pc: usize, reg: u32) -> Option<(&'static str, String)> {
    if let Some(name) = proto.local_name(reg as usize + 1, pc) {
        return Some(("local", name.to_string()));
    }

    for at in (0..pc).rev() {
        let instr = proto.code[at];
        let Some(op) = instr.get_opcode() else {
            return None;
        };
        let a = instr.get_a();
        match op {
            OpCode::GetGlobal if a == reg => {
                return constant_name(proto, instr.get_bx() as usize).map(|n| ("global", n));
            }
            OpCode::GetTable if a == reg => {
                let key = instr.get_c();
                if Instruction::is_k(key) {
                    return constant_name(proto, Instruction::index_k(key)).map(|n| ("field", n));
                }
                return None;
            }
            OpCode::Self_ if a == reg => {
                let key = instr.get_c();
                if Instruction::is_k(key) {
                    return constant_name(proto, Instruction::index_k(key)).map(|n| ("method", n));
                }
                return None;
            }
            OpCode::GetUpval if a == reg => {
                return proto
                    .upvalue_names
                    .get(instr.get_b() as usize)
                    .map(|n| ("upvalue", n.to_string()));
            }
            OpCode::Move if a == reg => {
                let from = instr.get_b();
                if from < a {
                    return describe_register(proto, at, from);
                }
                return None;
            }
            OpCode::LoadNil if a <= reg && reg <= instr.get_b() => return None,
            OpCode::Call | OpCode::TailCall | OpCode::TForLoop | OpCode::VarArg if reg >= a => {
                return None;
            }
            OpCode::Jmp
            | OpCode::SetGlobal
            | OpCode::SetUpval
            | OpCode::SetTable
            | OpCode::SetList
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Test
            | OpCode::Return
            | OpCode::Close
            | OpCode::LoadNil
            | OpCode::Call
            | OpCode::TailCall
            | OpCode::TForLoop
            | OpCode::VarArg => {}
            _ if a == reg => return None,
            _ => {}
        }
    }
    None
}
