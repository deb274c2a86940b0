/*----------------------------------------------------------------------
  Lua 5.1 bytecode interpreter

  Calls between Lua functions never recurse on the native stack: CALL
  pushes a frame and restarts the dispatch loop on it, RETURN pops the
  frame and resumes the caller. TAILCALL rebinds the current frame.

  `execute` runs until the frame stack drops back to `target_depth`
  (the callee returned to its host), a host function yields, or a CALL
  would push past `frame_limit`.
----------------------------------------------------------------------*/

pub mod arith;
mod call;
mod concat;
mod metamethod;

use std::mem;
use std::rc::Rc;

use crate::lua_value::{
    LuaClosure, LuaFunction, LuaTable, LuaUpvalue, LuaValue, MultiValue, RegisterFile,
};
use crate::lua_vm::lua_limits::LFIELDS_PER_FLUSH;
use crate::lua_vm::opcode::fb2int;
use crate::lua_vm::stack_frame::{Continuation, PendingCall, ReturnTarget, StackFrame};
use crate::lua_vm::{FatalError, Instruction, LuaError, LuaResult, LuaThread, OpCode};

use arith::{ArithOp, arith_raw};
pub(crate) use call::Callee;
pub use metamethod::TmKind;

pub(crate) enum ExecOutcome {
    /// The frame at `target_depth + 1` returned these values.
    Returned(MultiValue),
    /// A host function yielded; the top frame holds the pending call.
    Yielded(MultiValue),
    /// A call would exceed the frame limit; the CALL will be re-executed.
    FrameLimit,
}

pub(crate) fn execute(
    l: &mut LuaThread,
    target_depth: usize,
    frame_limit: usize,
) -> LuaResult<ExecOutcome> {
    run(l, target_depth, frame_limit).map_err(|e| l.attach_traceback(e))
}

#[inline(always)]
fn get_reg(registers: &RegisterFile, index: usize) -> LuaValue {
    registers.borrow().get(index).cloned().unwrap_or_default()
}

#[inline(always)]
fn set_reg(registers: &RegisterFile, index: usize, value: LuaValue) {
    let mut regs = registers.borrow_mut();
    if index >= regs.len() {
        regs.resize(index + 1, LuaValue::Nil);
    }
    regs[index] = value;
}

/// Registers `start..start + count - 1`, or up to the frame top when
/// `count` is 0 (multiple results of the previous instruction).
#[inline]
fn collect(l: &LuaThread, registers: &RegisterFile, start: usize, count: usize) -> LuaResult<MultiValue> {
    let end = if count == 0 {
        l.frame()?.top.max(start)
    } else {
        start + count - 1
    };
    let regs = registers.borrow();
    Ok((start..end)
        .map(|i| regs.get(i).cloned().unwrap_or_default())
        .collect())
}

#[inline]
fn jump(pc: usize, offset: i32) -> LuaResult<usize> {
    let target = pc as i64 + offset as i64;
    if target < 0 {
        return Err(LuaError::Fatal(FatalError::BadProgramCounter(pc)));
    }
    Ok(target as usize)
}

/// One FORLOOP step: the incremented index and whether the loop goes on.
fn for_step(idx: &LuaValue, limit: &LuaValue, step: &LuaValue) -> (LuaValue, bool) {
    if let (LuaValue::Integer(i), LuaValue::Integer(lim), LuaValue::Integer(s)) = (idx, limit, step) {
        if let Some(next) = i.checked_add(*s) {
            let go_on = if *s > 0 { next <= *lim } else { next >= *lim };
            return (LuaValue::Integer(next), go_on);
        }
    }
    let i = idx.to_f64().unwrap_or(f64::NAN);
    let lim = limit.to_f64().unwrap_or(f64::NAN);
    let s = step.to_f64().unwrap_or(f64::NAN);
    let next = i + s;
    let go_on = if 0.0 < s { next <= lim } else { lim <= next };
    (LuaValue::number(next), go_on)
}

fn arith_op(op: OpCode) -> ArithOp {
    match op {
        OpCode::Add => ArithOp::Add,
        OpCode::Sub => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Div => ArithOp::Div,
        OpCode::Mod => ArithOp::Mod,
        _ => ArithOp::Pow,
    }
}

fn run(l: &mut LuaThread, target_depth: usize, frame_limit: usize) -> LuaResult<ExecOutcome> {
    let fuse = l.vm().options().instruction_fuse.unwrap_or(u64::MAX);

    'startfunc: loop {
        let (closure, registers, mut pc) = {
            let frame = l.frame()?;
            (frame.closure.clone(), frame.registers.clone(), frame.pc)
        };
        let proto = closure.proto.clone();
        let code = &proto.code;
        let constants = &proto.constants;

        macro_rules! kst {
            ($idx:expr) => {
                constants.get($idx as usize).cloned().unwrap_or_default()
            };
        }
        macro_rules! rk {
            ($x:expr) => {
                if Instruction::is_k($x) {
                    kst!(Instruction::index_k($x))
                } else {
                    get_reg(&registers, $x as usize)
                }
            };
        }

        loop {
            l.instructions += 1;
            if l.instructions > fuse {
                return Err(LuaError::Fatal(FatalError::InstructionFuse(fuse)));
            }
            let instr = *code
                .get(pc)
                .ok_or(LuaError::Fatal(FatalError::BadProgramCounter(pc)))?;
            pc += 1;
            l.frame_mut()?.pc = pc;

            let op = instr
                .get_opcode()
                .ok_or(LuaError::Fatal(FatalError::InvalidOpcode(instr.opcode_byte())))?;
            let a = instr.get_a() as usize;

            match op {
                OpCode::Move => {
                    let v = get_reg(&registers, instr.get_b() as usize);
                    set_reg(&registers, a, v);
                }
                OpCode::LoadK => {
                    set_reg(&registers, a, kst!(instr.get_bx()));
                }
                OpCode::LoadBool => {
                    set_reg(&registers, a, LuaValue::Boolean(instr.get_b() != 0));
                    if instr.get_c() != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    let b = instr.get_b() as usize;
                    let mut regs = registers.borrow_mut();
                    for i in a..=b {
                        if let Some(slot) = regs.get_mut(i) {
                            *slot = LuaValue::Nil;
                        }
                    }
                }
                OpCode::GetUpval => {
                    let v = closure
                        .upvalues
                        .get(instr.get_b() as usize)
                        .map(|uv| uv.get())
                        .unwrap_or_default();
                    set_reg(&registers, a, v);
                }
                OpCode::GetGlobal => {
                    let env = LuaValue::Table(closure.env.clone());
                    let v = l.index(&env, &kst!(instr.get_bx()))?;
                    set_reg(&registers, a, v);
                }
                OpCode::GetTable => {
                    let t = get_reg(&registers, instr.get_b() as usize);
                    let v = l.index(&t, &rk!(instr.get_c()))?;
                    set_reg(&registers, a, v);
                }
                OpCode::SetGlobal => {
                    let env = LuaValue::Table(closure.env.clone());
                    let v = get_reg(&registers, a);
                    l.set_index(&env, &kst!(instr.get_bx()), v)?;
                }
                OpCode::SetUpval => {
                    let v = get_reg(&registers, a);
                    if let Some(uv) = closure.upvalues.get(instr.get_b() as usize) {
                        uv.set(v);
                    }
                }
                OpCode::SetTable => {
                    let t = get_reg(&registers, a);
                    let (key, v) = (rk!(instr.get_b()), rk!(instr.get_c()));
                    l.set_index(&t, &key, v)?;
                }
                OpCode::NewTable => {
                    let table = LuaTable::new(fb2int(instr.get_b()), fb2int(instr.get_c()));
                    set_reg(&registers, a, LuaValue::table(table));
                }
                OpCode::Self_ => {
                    let obj = get_reg(&registers, instr.get_b() as usize);
                    set_reg(&registers, a + 1, obj.clone());
                    let v = l.index(&obj, &rk!(instr.get_c()))?;
                    set_reg(&registers, a, v);
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
                    let (x, y) = (rk!(instr.get_b()), rk!(instr.get_c()));
                    let v = match arith_raw(arith_op(op), &x, &y) {
                        Some(v) => v,
                        None => l.arith(arith_op(op), &x, &y)?,
                    };
                    set_reg(&registers, a, v);
                }
                OpCode::Unm => {
                    let x = get_reg(&registers, instr.get_b() as usize);
                    let v = l.arith(ArithOp::Unm, &x, &x)?;
                    set_reg(&registers, a, v);
                }
                OpCode::Not => {
                    let v = get_reg(&registers, instr.get_b() as usize);
                    set_reg(&registers, a, LuaValue::Boolean(!v.is_truthy()));
                }
                OpCode::Len => {
                    let x = get_reg(&registers, instr.get_b() as usize);
                    let v = l.len(&x)?;
                    set_reg(&registers, a, v);
                }
                OpCode::Concat => {
                    let (b, c) = (instr.get_b() as usize, instr.get_c() as usize);
                    let values: Vec<LuaValue> = (b..=c).map(|i| get_reg(&registers, i)).collect();
                    let v = l.concat(values)?;
                    set_reg(&registers, a, v);
                }
                OpCode::Jmp => {
                    pc = jump(pc, instr.get_sbx())?;
                }
                OpCode::Eq => {
                    let (x, y) = (rk!(instr.get_b()), rk!(instr.get_c()));
                    if l.equals(&x, &y)? != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Lt => {
                    let (x, y) = (rk!(instr.get_b()), rk!(instr.get_c()));
                    if l.less_than(&x, &y)? != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Le => {
                    let (x, y) = (rk!(instr.get_b()), rk!(instr.get_c()));
                    if l.less_equal(&x, &y)? != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Test => {
                    if get_reg(&registers, a).is_truthy() != (instr.get_c() != 0) {
                        pc += 1;
                    }
                }
                OpCode::TestSet => {
                    let v = get_reg(&registers, instr.get_b() as usize);
                    if v.is_truthy() == (instr.get_c() != 0) {
                        set_reg(&registers, a, v);
                    } else {
                        pc += 1;
                    }
                }
                OpCode::Call => {
                    let func = get_reg(&registers, a);
                    let args = collect(l, &registers, a + 1, instr.get_b() as usize)?;
                    let target = ReturnTarget {
                        base: a,
                        count: instr.get_c() as i32 - 1,
                        continuation: Continuation::Store,
                    };
                    let Some((callee, args)) = l.resolve_callee(func.clone(), args) else {
                        return Err(l.type_error(&func, "call"));
                    };
                    match callee {
                        Callee::Lua(callee) => {
                            if l.depth >= frame_limit {
                                l.frame_mut()?.pc = pc - 1;
                                return Ok(ExecOutcome::FrameLimit);
                            }
                            l.push_frame(StackFrame::new(callee, args, target))?;
                            continue 'startfunc;
                        }
                        Callee::Host(host) => match host.call(l, args) {
                            Ok(results) => l.store_results(target, results)?,
                            Err(LuaError::Yield) => {
                                l.frame_mut()?.pending = Some(PendingCall { target, tail: false });
                                return Ok(ExecOutcome::Yielded(mem::take(&mut l.yield_values)));
                            }
                            Err(e) => return Err(e),
                        },
                    }
                }
                OpCode::TailCall => {
                    let func = get_reg(&registers, a);
                    let args = collect(l, &registers, a + 1, instr.get_b() as usize)?;
                    let Some((callee, args)) = l.resolve_callee(func.clone(), args) else {
                        return Err(l.type_error(&func, "call"));
                    };
                    match callee {
                        Callee::Lua(callee) => {
                            l.frame_mut()?.reset_for_tail_call(callee, args);
                            continue 'startfunc;
                        }
                        Callee::Host(host) => match host.call(l, args) {
                            Ok(results) => {
                                if let Some(values) = l.finish_return(results, target_depth)? {
                                    return Ok(ExecOutcome::Returned(values));
                                }
                                continue 'startfunc;
                            }
                            Err(LuaError::Yield) => {
                                let frame = l.frame_mut()?;
                                frame.pending = Some(PendingCall {
                                    target: frame.ret,
                                    tail: true,
                                });
                                return Ok(ExecOutcome::Yielded(mem::take(&mut l.yield_values)));
                            }
                            Err(e) => return Err(e),
                        },
                    }
                }
                OpCode::Return => {
                    let values = collect(l, &registers, a, instr.get_b() as usize)?;
                    if let Some(values) = l.finish_return(values, target_depth)? {
                        return Ok(ExecOutcome::Returned(values));
                    }
                    continue 'startfunc;
                }
                OpCode::ForLoop => {
                    let idx = get_reg(&registers, a);
                    let limit = get_reg(&registers, a + 1);
                    let step = get_reg(&registers, a + 2);
                    let (next, go_on) = for_step(&idx, &limit, &step);
                    if go_on {
                        pc = jump(pc, instr.get_sbx())?;
                        set_reg(&registers, a, next.clone());
                        set_reg(&registers, a + 3, next);
                    }
                }
                OpCode::ForPrep => {
                    let init = get_reg(&registers, a)
                        .to_number()
                        .ok_or_else(|| l.error("'for' initial value must be a number"))?;
                    let limit = get_reg(&registers, a + 1)
                        .to_number()
                        .ok_or_else(|| l.error("'for' limit must be a number"))?;
                    let step = get_reg(&registers, a + 2)
                        .to_number()
                        .ok_or_else(|| l.error("'for' step must be a number"))?;
                    let start = arith_raw(ArithOp::Sub, &init, &step).unwrap_or_default();
                    set_reg(&registers, a, start);
                    set_reg(&registers, a + 1, limit);
                    set_reg(&registers, a + 2, step);
                    pc = jump(pc, instr.get_sbx())?;
                }
                OpCode::TForLoop => {
                    let func = get_reg(&registers, a);
                    let args = MultiValue::two(get_reg(&registers, a + 1), get_reg(&registers, a + 2));
                    let target = ReturnTarget {
                        base: a + 3,
                        count: instr.get_c() as i32,
                        continuation: Continuation::ForIterator,
                    };
                    let Some((callee, args)) = l.resolve_callee(func.clone(), args) else {
                        return Err(l.type_error(&func, "call"));
                    };
                    match callee {
                        Callee::Lua(callee) => {
                            if l.depth >= frame_limit {
                                l.frame_mut()?.pc = pc - 1;
                                return Ok(ExecOutcome::FrameLimit);
                            }
                            l.push_frame(StackFrame::new(callee, args, target))?;
                            continue 'startfunc;
                        }
                        Callee::Host(host) => match host.call(l, args) {
                            Ok(results) => {
                                l.store_results(target, results)?;
                                l.for_iterator_step(a)?;
                                pc = l.frame()?.pc;
                            }
                            Err(LuaError::Yield) => {
                                l.frame_mut()?.pending = Some(PendingCall { target, tail: false });
                                return Ok(ExecOutcome::Yielded(mem::take(&mut l.yield_values)));
                            }
                            Err(e) => return Err(e),
                        },
                    }
                }
                OpCode::SetList => {
                    let b = instr.get_b() as usize;
                    let mut c = instr.get_c() as usize;
                    if c == 0 {
                        c = code
                            .get(pc)
                            .ok_or(LuaError::Fatal(FatalError::BadProgramCounter(pc)))?
                            .as_u32() as usize;
                        pc += 1;
                        l.frame_mut()?.pc = pc;
                    }
                    let n = if b == 0 {
                        l.frame()?.top.saturating_sub(a + 1)
                    } else {
                        b
                    };
                    let LuaValue::Table(table) = get_reg(&registers, a) else {
                        return Err(l.error("SETLIST target is not a table"));
                    };
                    let offset = c.saturating_sub(1) * LFIELDS_PER_FLUSH;
                    let regs = registers.borrow();
                    let mut table = table.borrow_mut();
                    for i in 1..=n {
                        let v = regs.get(a + i).cloned().unwrap_or_default();
                        table.set_int((offset + i) as i64, v);
                    }
                }
                OpCode::Close => {
                    l.frame_mut()?.close_upvalues(a);
                }
                OpCode::Closure => {
                    let Some(child) = proto.protos.get(instr.get_bx() as usize).cloned() else {
                        return Err(l.error("invalid function prototype index"));
                    };
                    let mut upvalues = Vec::with_capacity(child.num_upvalues as usize);
                    for _ in 0..child.num_upvalues {
                        let pseudo = *code
                            .get(pc)
                            .ok_or(LuaError::Fatal(FatalError::BadProgramCounter(pc)))?;
                        pc += 1;
                        match pseudo.get_opcode() {
                            Some(OpCode::GetUpval) => upvalues.push(
                                closure
                                    .upvalues
                                    .get(pseudo.get_b() as usize)
                                    .cloned()
                                    .unwrap_or_else(|| LuaUpvalue::new_closed(LuaValue::Nil)),
                            ),
                            Some(OpCode::Move) => {
                                upvalues.push(l.frame_mut()?.find_upvalue(pseudo.get_b() as usize))
                            }
                            _ => {
                                return Err(LuaError::Fatal(FatalError::InvalidOpcode(
                                    pseudo.opcode_byte(),
                                )));
                            }
                        }
                    }
                    l.frame_mut()?.pc = pc;
                    let new_closure = LuaClosure::new(child, upvalues, closure.env.clone());
                    set_reg(
                        &registers,
                        a,
                        LuaValue::Function(LuaFunction::Lua(Rc::new(new_closure))),
                    );
                }
                OpCode::VarArg => {
                    let b = instr.get_b() as usize;
                    let frame = l.frame_mut()?;
                    let mut regs = frame.registers.borrow_mut();
                    let n = if b == 0 {
                        frame.varargs.len()
                    } else {
                        b - 1
                    };
                    if regs.len() < a + n {
                        regs.resize(a + n, LuaValue::Nil);
                    }
                    for i in 0..n {
                        regs[a + i] = frame.varargs.get(i).cloned().unwrap_or_default();
                    }
                    if b == 0 {
                        frame.top = a + n;
                    }
                }
            }
        }
    }
}
