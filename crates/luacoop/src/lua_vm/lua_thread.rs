// LuaThread - a coroutine: one call stack plus its scheduling state
//
// Status transitions:
//   Initial --resume--> Running --yield/frame limit--> Suspended --resume--> Running
//   Running --return--> Dead
//   Running --error, frames left below the resume floor--> EndCall
//   Running --error, no frames left / fatal--> Dead
//   Running --resumes another thread--> Normal --that resume ends--> Running

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::lua_value::{LuaValue, MultiValue, ThreadRef};
use crate::lua_vm::execute::{Callee, ExecOutcome, execute};
use crate::lua_vm::lua_limits::MAX_TRACEBACK_LEVELS;
use crate::lua_vm::stack_frame::{ReturnTarget, StackFrame};
use crate::lua_vm::{FatalError, LuaError, LuaResult, LuaVM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created, its start function not yet called.
    Initial,
    Running,
    /// Yielded or stopped at its frame limit; resumable.
    Suspended,
    /// Active but currently resuming another thread.
    Normal,
    /// An error unwound the frames of the last resume; frames below it remain.
    EndCall,
    Dead,
}

impl ThreadStatus {
    /// Name reported by `coroutine.status`.
    pub fn name(self) -> &'static str {
        match self {
            ThreadStatus::Initial | ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::EndCall | ThreadStatus::Dead => "dead",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    /// The thread yielded these values and is suspended.
    Yielded(MultiValue),
    /// The start function returned; the thread is dead.
    Returned(MultiValue),
    /// The thread was sleeping; one tick of its sleep was consumed.
    Sleeping,
    /// The resume pushed as many frames as allowed and suspended.
    FrameLimit,
}

pub struct LuaThread {
    id: usize,
    vm: Rc<LuaVM>,
    self_ref: Weak<RefCell<LuaThread>>,
    pub(crate) status: ThreadStatus,
    pub(crate) top: Option<Box<StackFrame>>,
    pub(crate) depth: usize,
    sleep: u32,
    start: Option<(LuaValue, MultiValue)>,
    /// The start function was a host function that yielded; the next resume
    /// returns its arguments as the thread's results.
    pending_host_return: bool,
    pub(crate) yield_values: MultiValue,
    /// Host-to-Lua re-entries currently on the native stack.
    pub(crate) native_depth: usize,
    /// Instructions executed during the current resume.
    pub(crate) instructions: u64,
}

impl LuaThread {
    pub(crate) fn new_ref(vm: Rc<LuaVM>) -> ThreadRef {
        let id = vm.alloc_thread_id();
        Rc::new_cyclic(|weak| {
            RefCell::new(LuaThread {
                id,
                vm,
                self_ref: weak.clone(),
                status: ThreadStatus::Initial,
                top: None,
                depth: 0,
                sleep: 0,
                start: None,
                pending_host_return: false,
                yield_values: MultiValue::empty(),
                native_depth: 0,
                instructions: 0,
            })
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn vm(&self) -> &Rc<LuaVM> {
        &self.vm
    }

    /// The shared handle of this thread, as seen by scripts.
    pub fn handle(&self) -> Option<ThreadRef> {
        self.self_ref.upgrade()
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub fn is_dead(&self) -> bool {
        self.status == ThreadStatus::Dead
    }

    /// Number of Lua frames on the call stack.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.top.as_deref()
    }

    /// Skip the next `ticks` resumes.
    pub fn sleep(&mut self, ticks: u32) {
        self.sleep = ticks;
    }

    pub fn sleep_ticks(&self) -> u32 {
        self.sleep
    }

    /// Arrange for `func(args...)` to be called on the next resume.
    pub fn start(&mut self, func: LuaValue, args: MultiValue) {
        self.start = Some((func, args));
        self.status = ThreadStatus::Initial;
    }

    /// Function and arguments the next resume will start with, if any.
    pub fn start_function(&self) -> Option<&(LuaValue, MultiValue)> {
        self.start.as_ref()
    }

    pub(crate) fn frame(&self) -> LuaResult<&StackFrame> {
        self.top
            .as_deref()
            .ok_or(LuaError::Fatal(FatalError::CorruptedStack("no active frame")))
    }

    pub(crate) fn frame_mut(&mut self) -> LuaResult<&mut StackFrame> {
        self.top
            .as_deref_mut()
            .ok_or(LuaError::Fatal(FatalError::CorruptedStack("no active frame")))
    }

    pub(crate) fn push_frame(&mut self, mut frame: Box<StackFrame>) -> LuaResult<()> {
        if self.depth >= self.vm.options().max_call_depth {
            return Err(self.error("stack overflow"));
        }
        frame.parent = self.top.take();
        self.top = Some(frame);
        self.depth += 1;
        Ok(())
    }

    /// Detach the top frame, closing its upvalues.
    pub(crate) fn pop_frame(&mut self) -> LuaResult<Box<StackFrame>> {
        let mut frame = self
            .top
            .take()
            .ok_or(LuaError::Fatal(FatalError::CorruptedStack("pop on empty call stack")))?;
        self.top = frame.parent.take();
        self.depth -= 1;
        frame.close_upvalues(0);
        frame.finished = true;
        Ok(frame)
    }

    /// Discard frames until only `depth` remain.
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        while self.depth > depth {
            if self.pop_frame().is_err() {
                self.depth = 0;
                break;
            }
        }
    }

    /// Continue this thread. Returns once it yields, returns, hits its frame
    /// limit (`max_new_frames` frames above the current depth) or errors.
    pub fn resume(&mut self, max_new_frames: usize, args: MultiValue) -> LuaResult<ResumeOutcome> {
        if self.sleep > 0 {
            self.sleep -= 1;
            return Ok(ResumeOutcome::Sleeping);
        }
        match self.status {
            ThreadStatus::Initial | ThreadStatus::Suspended => {}
            ThreadStatus::Dead | ThreadStatus::EndCall => {
                return Err(LuaError::runtime("cannot resume dead coroutine"));
            }
            ThreadStatus::Running | ThreadStatus::Normal => {
                return Err(LuaError::runtime("cannot resume non-suspended coroutine"));
            }
        }

        let floor = self.depth;
        let frame_limit = floor.saturating_add(max_new_frames.max(1));
        self.status = ThreadStatus::Running;
        self.instructions = 0;

        match self.resume_inner(frame_limit, args) {
            Ok(outcome) => {
                self.status = match outcome {
                    ResumeOutcome::Returned(_) => ThreadStatus::Dead,
                    _ => ThreadStatus::Suspended,
                };
                Ok(outcome)
            }
            Err(LuaError::Yield) => {
                self.unwind_to(0);
                self.status = ThreadStatus::Dead;
                Err(LuaError::Fatal(FatalError::CorruptedStack("yield escaped the interpreter")))
            }
            Err(e @ LuaError::Fatal(_)) => {
                self.unwind_to(0);
                self.status = ThreadStatus::Dead;
                Err(e)
            }
            Err(e) => {
                self.unwind_to(floor);
                self.status = if self.depth == 0 {
                    ThreadStatus::Dead
                } else {
                    ThreadStatus::EndCall
                };
                Err(e)
            }
        }
    }

    fn resume_inner(&mut self, frame_limit: usize, args: MultiValue) -> LuaResult<ResumeOutcome> {
        if let Some((func, mut start_args)) = self.start.take() {
            start_args.extend(args);
            let (callee, call_args) = self.resolve_callee(func.clone(), start_args).ok_or_else(|| {
                LuaError::runtime(format!("attempt to call a {} value", func.type_name()))
            })?;
            match callee {
                Callee::Lua(closure) => {
                    self.push_frame(StackFrame::new(closure, call_args, ReturnTarget::host()))?;
                }
                Callee::Host(host) => {
                    return match host.call(self, call_args) {
                        Ok(values) => Ok(ResumeOutcome::Returned(values)),
                        Err(LuaError::Yield) => {
                            self.pending_host_return = true;
                            Ok(ResumeOutcome::Yielded(std::mem::take(&mut self.yield_values)))
                        }
                        Err(e) => Err(self.attach_traceback(e)),
                    };
                }
            }
        } else if self.pending_host_return {
            self.pending_host_return = false;
            return Ok(ResumeOutcome::Returned(args));
        } else if self.frame()?.pending.is_some() {
            if let Some(values) = self.complete_pending(args, 0)? {
                return Ok(ResumeOutcome::Returned(values));
            }
        }

        Ok(match execute(self, 0, frame_limit)? {
            ExecOutcome::Returned(values) => ResumeOutcome::Returned(values),
            ExecOutcome::Yielded(values) => ResumeOutcome::Yielded(values),
            ExecOutcome::FrameLimit => ResumeOutcome::FrameLimit,
        })
    }

    /// Suspend the running thread, handing `values` to its resumer. Host
    /// functions return the result directly: `return l.yield_now(args)`.
    pub fn yield_now(&mut self, values: MultiValue) -> LuaResult<MultiValue> {
        if self.status != ThreadStatus::Running {
            return Err(self.error("attempt to yield from outside a coroutine"));
        }
        if self.native_depth > 0 {
            return Err(self.error("attempt to yield across metamethod/C-call boundary"));
        }
        self.yield_values = values;
        Err(LuaError::Yield)
    }

    /// Drop the whole call stack and start over with `func(args...)`.
    pub fn jump(&mut self, func: LuaValue, args: MultiValue) -> LuaResult<()> {
        if matches!(self.status, ThreadStatus::Running | ThreadStatus::Normal) {
            return Err(LuaError::runtime("cannot jump an active coroutine"));
        }
        self.unwind_to(0);
        self.pending_host_return = false;
        self.yield_values = MultiValue::empty();
        self.start(func, args);
        Ok(())
    }

    /// Kill the thread: unwind every frame and close its upvalues.
    pub fn destroy(&mut self) {
        self.unwind_to(0);
        self.start = None;
        self.pending_host_return = false;
        self.yield_values = MultiValue::empty();
        self.sleep = 0;
        self.status = ThreadStatus::Dead;
    }

    /// Runtime error tagged with the position of the running Lua function.
    pub fn error(&self, message: impl Into<String>) -> LuaError {
        LuaError::runtime(format!("{}{}", self.where_(1), message.into()))
    }

    /// `"chunk:line: "` for the frame `level` steps down the stack (1 = top),
    /// empty if there is no such frame or it has no line info.
    pub fn where_(&self, level: usize) -> String {
        if level == 0 {
            return String::new();
        }
        let mut frame = self.top.as_deref();
        for _ in 1..level {
            frame = frame.and_then(|f| f.parent.as_deref());
        }
        match frame {
            Some(f) => match f.current_line() {
                Some(line) => format!("{}:{}: ", f.closure.proto.chunk_id(), line),
                None => String::new(),
            },
            None => String::new(),
        }
    }

    /// Human-readable call stack, innermost frame first.
    pub fn traceback(&self) -> String {
        let mut out = String::from("stack traceback:");
        let mut frames = Vec::with_capacity(self.depth);
        let mut frame = self.top.as_deref();
        while let Some(f) = frame {
            frames.push(f);
            frame = f.parent.as_deref();
        }

        let half = MAX_TRACEBACK_LEVELS / 2;
        let elide = frames.len() > MAX_TRACEBACK_LEVELS;
        for (i, f) in frames.iter().enumerate() {
            if elide && i == half {
                out.push_str("\n\t...");
            }
            if elide && i >= half && i < frames.len() - half {
                continue;
            }
            let proto = &f.closure.proto;
            let chunk = proto.chunk_id();
            match f.current_line() {
                Some(line) => out.push_str(&format!("\n\t{}:{}: in ", chunk, line)),
                None => out.push_str(&format!("\n\t{}: in ", chunk)),
            }
            if proto.line_defined == 0 {
                out.push_str("main chunk");
            } else {
                out.push_str(&format!("function <{}:{}>", chunk, proto.line_defined));
            }
            if f.tail_calls > 0 {
                out.push_str("\n\t(tail call): ?");
            }
        }
        out
    }

    /// Record where a runtime error happened. An error arriving from another
    /// thread gets this thread's trace prefixed to its own.
    pub(crate) fn attach_traceback(&self, error: LuaError) -> LuaError {
        match error {
            LuaError::Runtime(mut e) => {
                match (&e.traceback, e.thread_id) {
                    (None, _) => {
                        e.traceback = Some(self.traceback());
                        e.thread_id = Some(self.id);
                    }
                    (Some(inner), Some(origin)) if origin != self.id => {
                        e.traceback = Some(format!("{}\n{}", self.traceback(), inner));
                        e.thread_id = Some(self.id);
                    }
                    _ => {}
                }
                LuaError::Runtime(e)
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for LuaThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaThread")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("depth", &self.depth)
            .field("sleep", &self.sleep)
            .finish()
    }
}
