// StackFrame - one activation of a Lua closure
//
// Frames form a singly linked list through `parent`; the thread owns the
// top frame. Registers live in a shared `RegisterFile` so open upvalues can
// alias them until the frame goes away.

use std::cell::RefCell;
use std::rc::Rc;

use crate::lua_value::{
    LuaClosure, LuaTable, LuaUpvalue, LuaValue, MultiValue, RegisterFile, UpvalueRef,
};

/// What the caller does with the values a frame returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Continuation {
    /// Copy the results into the caller's registers.
    Store,
    /// Generic `for` iterator call: store, then test the control variable.
    ForIterator,
    /// Hand the results back to the host that started the call.
    Host,
}

/// Where a call's results go in the caller's frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReturnTarget {
    pub base: usize,
    /// Number of results wanted, `-1` for all of them.
    pub count: i32,
    pub continuation: Continuation,
}

impl ReturnTarget {
    pub fn host() -> Self {
        ReturnTarget {
            base: 0,
            count: -1,
            continuation: Continuation::Host,
        }
    }
}

/// A host call that yielded; the values of the next resume complete it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingCall {
    pub target: ReturnTarget,
    /// The call was a tail call: its results return from this frame.
    pub tail: bool,
}

pub struct StackFrame {
    pub(crate) closure: Rc<LuaClosure>,
    pub(crate) registers: RegisterFile,
    pub(crate) varargs: Vec<LuaValue>,
    pub(crate) open_upvalues: Vec<UpvalueRef>,
    /// Index of the next instruction.
    pub(crate) pc: usize,
    /// End of the values left by the last multi-result instruction.
    pub(crate) top: usize,
    pub(crate) ret: ReturnTarget,
    pub(crate) pending: Option<PendingCall>,
    pub(crate) finished: bool,
    pub(crate) tail_calls: usize,
    pub(crate) parent: Option<Box<StackFrame>>,
}

impl StackFrame {
    pub(crate) fn new(closure: Rc<LuaClosure>, args: MultiValue, ret: ReturnTarget) -> Box<StackFrame> {
        let (registers, varargs) = Self::bind_args(&closure, args);
        Box::new(StackFrame {
            closure,
            registers: Rc::new(RefCell::new(registers)),
            varargs,
            open_upvalues: Vec::new(),
            pc: 0,
            top: 0,
            ret,
            pending: None,
            finished: false,
            tail_calls: 0,
            parent: None,
        })
    }

    /// Lay out fixed parameters in registers; surplus arguments become
    /// varargs when the prototype accepts them.
    fn bind_args(closure: &LuaClosure, args: MultiValue) -> (Vec<LuaValue>, Vec<LuaValue>) {
        let proto = &closure.proto;
        let num_params = proto.num_params as usize;
        let size = (proto.max_stack_size as usize).max(num_params + 1);
        let mut registers = vec![LuaValue::Nil; size];
        let mut args = args.all_values();

        let extra = if args.len() > num_params {
            args.split_off(num_params)
        } else {
            Vec::new()
        };
        for (slot, value) in registers.iter_mut().zip(args) {
            *slot = value;
        }

        if !proto.is_vararg() {
            return (registers, Vec::new());
        }
        if proto.needs_arg_table() {
            let mut arg = LuaTable::new(extra.len(), 1);
            for (i, v) in extra.iter().enumerate() {
                arg.set_int(i as i64 + 1, v.clone());
            }
            arg.set_str("n", LuaValue::Integer(extra.len() as i64));
            registers[num_params] = LuaValue::table(arg);
        }
        (registers, extra)
    }

    /// Rebind this frame to a new closure for a tail call, reusing its storage.
    pub(crate) fn reset_for_tail_call(&mut self, closure: Rc<LuaClosure>, args: MultiValue) {
        self.close_upvalues(0);
        let (registers, varargs) = Self::bind_args(&closure, args);
        {
            let mut regs = self.registers.borrow_mut();
            regs.clear();
            regs.extend(registers);
        }
        self.closure = closure;
        self.varargs = varargs;
        self.pc = 0;
        self.top = 0;
        self.pending = None;
        self.tail_calls += 1;
    }

    /// The open upvalue aliasing register `index`, created on first capture.
    pub(crate) fn find_upvalue(&mut self, index: usize) -> UpvalueRef {
        if let Some(uv) = self
            .open_upvalues
            .iter()
            .find(|uv| uv.open_index() == Some(index))
        {
            return uv.clone();
        }
        let uv = LuaUpvalue::new_open(self.registers.clone(), index);
        self.open_upvalues.push(uv.clone());
        uv
    }

    /// Close every open upvalue at or above register `from`.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        self.open_upvalues.retain(|uv| match uv.open_index() {
            Some(index) if index >= from => {
                uv.close();
                false
            }
            Some(_) => true,
            None => false,
        });
    }

    pub fn closure(&self) -> &Rc<LuaClosure> {
        &self.closure
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Source line of the instruction being executed.
    pub fn current_line(&self) -> Option<u32> {
        self.closure.proto.line_at(self.pc.saturating_sub(1))
    }

    pub fn parent(&self) -> Option<&StackFrame> {
        self.parent.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        self.close_upvalues(0);
        // unlink iteratively so host stack use does not grow with call depth
        let mut next = self.parent.take();
        while let Some(mut frame) = next {
            next = frame.parent.take();
        }
    }
}
