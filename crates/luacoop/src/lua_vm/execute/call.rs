// Call and return plumbing shared by the interpreter loop, resume and host
// calls into Lua.

use std::rc::Rc;

use crate::lua_value::{HostFunction, LuaClosure, LuaFunction, LuaValue, MultiValue};
use crate::lua_vm::execute::{ExecOutcome, TmKind, execute};
use crate::lua_vm::stack_frame::{Continuation, ReturnTarget, StackFrame};
use crate::lua_vm::{FatalError, LuaError, LuaResult, LuaThread, ThreadStatus};

pub(crate) enum Callee {
    Lua(Rc<LuaClosure>),
    Host(Rc<HostFunction>),
}

impl LuaThread {
    /// Resolve what calling `func` means, going through `__call` for
    /// non-functions. `None` if the value is not callable.
    pub(crate) fn resolve_callee(&self, func: LuaValue, args: MultiValue) -> Option<(Callee, MultiValue)> {
        match func {
            LuaValue::Function(LuaFunction::Lua(c)) => Some((Callee::Lua(c), args)),
            LuaValue::Function(LuaFunction::Host(h)) => Some((Callee::Host(h), args)),
            other => match self.metamethod(&other, TmKind::Call) {
                LuaValue::Function(LuaFunction::Lua(c)) => Some((Callee::Lua(c), args.prepend(other))),
                LuaValue::Function(LuaFunction::Host(h)) => Some((Callee::Host(h), args.prepend(other))),
                _ => None,
            },
        }
    }

    /// Call `func` from host code and run it to completion on this thread.
    /// Lua code reached this way cannot yield.
    pub fn call(&mut self, func: &LuaValue, args: MultiValue) -> LuaResult<MultiValue> {
        if self.native_depth >= self.vm().options().max_native_depth {
            return Err(self.error("C stack overflow"));
        }
        let (callee, args) = self
            .resolve_callee(func.clone(), args)
            .ok_or_else(|| self.error(format!("attempt to call a {} value", func.type_name())))?;

        let previous = self.status;
        let idle = !matches!(previous, ThreadStatus::Running | ThreadStatus::Normal);
        if idle {
            self.status = ThreadStatus::Running;
            self.instructions = 0;
        }
        self.native_depth += 1;

        let result = match callee {
            Callee::Host(host) => host.call(self, args),
            Callee::Lua(closure) => {
                let floor = self.depth;
                let result = self
                    .push_frame(StackFrame::new(closure, args, ReturnTarget::host()))
                    .and_then(|()| execute(self, floor, usize::MAX))
                    .and_then(|outcome| match outcome {
                        ExecOutcome::Returned(values) => Ok(values),
                        _ => Err(LuaError::Fatal(FatalError::CorruptedStack(
                            "nested call suspended",
                        ))),
                    });
                if result.is_err() {
                    self.unwind_to(floor);
                }
                result
            }
        };

        self.native_depth -= 1;
        if idle {
            self.status = previous;
        }
        result
    }

    /// Copy call results into the top frame's registers.
    pub(crate) fn store_results(&mut self, target: ReturnTarget, values: MultiValue) -> LuaResult<()> {
        let frame = self.frame_mut()?;
        let mut regs = frame.registers.borrow_mut();
        let base = target.base;
        if target.count < 0 {
            let n = values.len();
            if regs.len() < base + n {
                regs.resize(base + n, LuaValue::Nil);
            }
            for (i, v) in values.into_iter().enumerate() {
                regs[base + i] = v;
            }
            frame.top = base + n;
        } else {
            let count = target.count as usize;
            if regs.len() < base + count {
                regs.resize(base + count, LuaValue::Nil);
            }
            let mut values = values.into_iter();
            for slot in regs[base..base + count].iter_mut() {
                *slot = values.next().unwrap_or_default();
            }
        }
        Ok(())
    }

    /// Hand results to the frame that made the call, running its
    /// continuation.
    pub(crate) fn deliver(&mut self, target: ReturnTarget, values: MultiValue) -> LuaResult<()> {
        match target.continuation {
            Continuation::Store => self.store_results(target, values),
            Continuation::ForIterator => {
                self.store_results(target, values)?;
                self.for_iterator_step(target.base - 3)
            }
            Continuation::Host => Err(LuaError::Fatal(FatalError::CorruptedStack(
                "host return delivered to a frame",
            ))),
        }
    }

    /// Second half of TFORLOOP once the iterator has returned:
    /// `if R(A+3) ~= nil then R(A+2) = R(A+3) else pc++`.
    pub(crate) fn for_iterator_step(&mut self, a: usize) -> LuaResult<()> {
        let frame = self.frame_mut()?;
        let control = frame.registers.borrow().get(a + 3).cloned().unwrap_or_default();
        if control.is_nil() {
            frame.pc += 1;
        } else if let Some(slot) = frame.registers.borrow_mut().get_mut(a + 2) {
            *slot = control;
        }
        Ok(())
    }

    /// Pop the top frame and pass `values` to its caller. Returns the values
    /// when the frame belonged to the host (or the stack reached
    /// `target_depth`), so the interpreter loop must stop.
    pub(crate) fn finish_return(
        &mut self,
        values: MultiValue,
        target_depth: usize,
    ) -> LuaResult<Option<MultiValue>> {
        let target = self.pop_frame()?.ret;
        if self.depth <= target_depth || target.continuation == Continuation::Host {
            return Ok(Some(values));
        }
        self.deliver(target, values)?;
        Ok(None)
    }

    /// Complete the host call the top frame was suspended in, with the
    /// values passed to resume.
    pub(crate) fn complete_pending(
        &mut self,
        values: MultiValue,
        target_depth: usize,
    ) -> LuaResult<Option<MultiValue>> {
        let pending = self.frame_mut()?.pending.take().ok_or(LuaError::Fatal(
            FatalError::CorruptedStack("no pending call to complete"),
        ))?;
        if pending.tail {
            return self.finish_return(values, target_depth);
        }
        self.deliver(pending.target, values)?;
        Ok(None)
    }
}
