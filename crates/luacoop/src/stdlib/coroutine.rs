// Coroutine library
// Implements: create, resume, yield, status, wrap, running, wait

use std::rc::Rc;

use crate::lib_registry::{LibraryModule, arg_type_error, check_thread, opt_integer, require_arg};
use crate::lua_value::{LuaFunction, LuaValue, MultiValue, ThreadRef};
use crate::lua_vm::{LuaError, LuaResult, LuaThread, ResumeOutcome, ThreadStatus};

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "yield" => coroutine_yield,
        "status" => coroutine_status,
        "wrap" => coroutine_wrap,
        "running" => coroutine_running,
        "wait" => coroutine_wait,
    })
}

fn check_function(l: &LuaThread, args: &MultiValue, func_name: &str) -> LuaResult<LuaValue> {
    let func = require_arg(l, args, 1, func_name)?;
    if !func.is_function() {
        return Err(arg_type_error(l, 1, func_name, "function", &func));
    }
    Ok(func)
}

/// coroutine.create(f) - Create a new coroutine
fn coroutine_create(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let func = check_function(l, &args, "coroutine.create")?;
    let thread = l.vm().new_thread(func, MultiValue::empty());
    Ok(MultiValue::single(LuaValue::Thread(thread)))
}

/// Resume `co` from the running thread `l`. Script-level failures come back
/// as `Err(message)`; fatal errors propagate.
fn resume_from(l: &mut LuaThread, co: &ThreadRef, args: MultiValue) -> LuaResult<Result<MultiValue, LuaError>> {
    if l.handle().is_some_and(|me| Rc::ptr_eq(&me, co)) {
        return Ok(Err(LuaError::runtime("cannot resume non-suspended coroutine")));
    }
    let Ok(mut target) = co.try_borrow_mut() else {
        return Ok(Err(LuaError::runtime("cannot resume non-suspended coroutine")));
    };

    let previous = l.status;
    l.status = ThreadStatus::Normal;
    let outcome = target.resume(usize::MAX, args);
    l.status = previous;

    match outcome {
        Ok(ResumeOutcome::Yielded(values)) | Ok(ResumeOutcome::Returned(values)) => Ok(Ok(values)),
        Ok(ResumeOutcome::Sleeping) | Ok(ResumeOutcome::FrameLimit) => Ok(Ok(MultiValue::empty())),
        Err(e @ LuaError::Fatal(_)) => Err(e),
        Err(e) => Ok(Err(e)),
    }
}

/// coroutine.resume(co, ...) - Resume a coroutine
fn coroutine_resume(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let co = check_thread(l, &args, 1, "coroutine.resume")?;
    match resume_from(l, &co, args.skip(1))? {
        Ok(values) => Ok(values.prepend(LuaValue::Boolean(true))),
        Err(e) => Ok(MultiValue::two(LuaValue::Boolean(false), e.value())),
    }
}

/// coroutine.yield(...) - Yield from current coroutine
fn coroutine_yield(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    l.yield_now(args)
}

/// coroutine.status(co) - "suspended", "running", "normal" or "dead"
fn coroutine_status(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let co = check_thread(l, &args, 1, "coroutine.status")?;
    let status = if l.handle().is_some_and(|me| Rc::ptr_eq(&me, &co)) {
        "running"
    } else {
        // a thread we cannot borrow is busy resuming someone further up
        co.try_borrow().map(|t| t.status().name()).unwrap_or("normal")
    };
    Ok(MultiValue::single(LuaValue::from(status)))
}

/// coroutine.wrap(f) - A function that resumes a new coroutine on each call
fn coroutine_wrap(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let func = check_function(l, &args, "coroutine.wrap")?;
    let co = l.vm().new_thread(func, MultiValue::empty());
    let wrapper = LuaFunction::host_closure("coroutine.wrap", move |l, args| {
        match resume_from(l, &co, args)? {
            Ok(values) => Ok(values),
            Err(LuaError::Runtime(mut e)) => {
                if let LuaValue::String(s) = &e.value {
                    e.value = LuaValue::from(format!("{}{}", l.where_(1), s));
                }
                Err(LuaError::Runtime(e))
            }
            Err(e) => Err(e),
        }
    });
    Ok(MultiValue::single(LuaValue::Function(wrapper)))
}

/// coroutine.running() - The running coroutine
fn coroutine_running(l: &mut LuaThread, _args: MultiValue) -> LuaResult<MultiValue> {
    Ok(MultiValue::single(
        l.handle().map(LuaValue::Thread).unwrap_or_default(),
    ))
}

/// coroutine.wait([n]) - Yield and skip the next n resumes
fn coroutine_wait(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let ticks = opt_integer(l, &args, 1, "coroutine.wait", 1)?.clamp(0, u32::MAX as i64) as u32;
    let result = l.yield_now(MultiValue::empty());
    if matches!(result, Err(LuaError::Yield)) {
        l.sleep(ticks);
    }
    result
}
