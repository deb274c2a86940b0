// Tests for coroutines: host-driven resume, the coroutine library,
// frame-limited resumes, sleeping and jumping
use std::rc::Rc;

use crate::lua_value::{LuaValue, MultiValue};
use crate::lua_vm::{LuaResult, LuaVM, OpCode, ResumeOutcome, SafeOption, ThreadStatus};
use crate::stdlib::Stdlib;
use crate::test::{ProtoBuilder, load, new_vm, run};

fn yielded(outcome: LuaResult<ResumeOutcome>) -> Vec<LuaValue> {
    match outcome {
        Ok(ResumeOutcome::Yielded(values)) => values.all_values(),
        other => panic!("expected a yield, got {:?}", other),
    }
}

fn returned(outcome: LuaResult<ResumeOutcome>) -> Vec<LuaValue> {
    match outcome {
        Ok(ResumeOutcome::Returned(values)) => values.all_values(),
        other => panic!("expected a return, got {:?}", other),
    }
}

/// `R(reg) = coroutine.<name>`
fn get_coroutine_fn(b: &mut ProtoBuilder, reg: u32, name: &str) {
    let lib = b.k("coroutine");
    let field = b.rk(name);
    b.abx(OpCode::GetGlobal, reg, lib)
        .abc(OpCode::GetTable, reg, reg, field);
}

/// function(a) local r = coroutine.yield(a + 1); return r + 10 end
fn yield_once() -> ProtoBuilder {
    let mut b = ProtoBuilder::new();
    b.params(1).line_defined(1);
    get_coroutine_fn(&mut b, 1, "yield");
    let (one, ten) = (b.rk(1i64), b.rk(10i64));
    b.abc(OpCode::Add, 2, 0, one)
        .abc(OpCode::Call, 1, 2, 2)
        .abc(OpCode::Add, 1, 1, ten)
        .abc(OpCode::Return, 1, 2, 0);
    b
}

#[test]
fn test_resume_and_yield_from_host() {
    let vm = new_vm();
    let body = load(&vm, yield_once().build());
    let co = vm.new_thread(body, MultiValue::empty());
    assert_eq!(co.borrow().status(), ThreadStatus::Initial);

    let first = co.borrow_mut().resume(usize::MAX, MultiValue::single(LuaValue::Integer(1)));
    assert_eq!(yielded(first), vec![LuaValue::Integer(2)]);
    assert_eq!(co.borrow().status(), ThreadStatus::Suspended);
    assert_eq!(co.borrow().depth(), 1);

    let second = co.borrow_mut().resume(usize::MAX, MultiValue::single(LuaValue::Integer(5)));
    assert_eq!(returned(second), vec![LuaValue::Integer(15)]);
    assert!(co.borrow().is_dead());
    assert_eq!(co.borrow().depth(), 0);

    let err = co.borrow_mut().resume(usize::MAX, MultiValue::empty()).unwrap_err();
    assert_eq!(err.to_string(), "cannot resume dead coroutine");
}

#[test]
fn test_yield_inside_nested_call() {
    let vm = new_vm();

    // local x = coroutine.yield("a"); local y = coroutine.yield("b"); return x .. y
    let mut inner = ProtoBuilder::new();
    inner.line_defined(3);
    get_coroutine_fn(&mut inner, 0, "yield");
    let (ka, kb) = (inner.k("a"), inner.k("b"));
    inner.abx(OpCode::LoadK, 1, ka).abc(OpCode::Call, 0, 2, 2);
    get_coroutine_fn(&mut inner, 1, "yield");
    inner
        .abx(OpCode::LoadK, 2, kb)
        .abc(OpCode::Call, 1, 2, 2)
        .abc(OpCode::Concat, 0, 0, 1)
        .abc(OpCode::Return, 0, 2, 0);

    // return inner() .. "!"
    let mut outer = ProtoBuilder::new();
    let child = outer.child(inner.into_proto());
    let bang = outer.k("!");
    outer
        .abx(OpCode::Closure, 0, child)
        .abc(OpCode::Call, 0, 1, 2)
        .abx(OpCode::LoadK, 1, bang)
        .abc(OpCode::Concat, 0, 0, 1)
        .abc(OpCode::Return, 0, 2, 0);

    let co = vm.new_thread(load(&vm, outer.build()), MultiValue::empty());
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(yielded(r), vec![LuaValue::from("a")]);
    assert_eq!(co.borrow().depth(), 2);

    let r = co.borrow_mut().resume(usize::MAX, MultiValue::single(LuaValue::from("x")));
    assert_eq!(yielded(r), vec![LuaValue::from("b")]);

    let r = co.borrow_mut().resume(usize::MAX, MultiValue::single(LuaValue::from("y")));
    assert_eq!(returned(r), vec![LuaValue::from("xy!")]);
}

#[test]
fn test_coroutine_library_from_lua() {
    let vm = new_vm();
    let mut main = ProtoBuilder::new();
    let body = main.child(yield_once().into_proto());
    let lib = main.k("coroutine");
    let (create, resume, status) = (main.rk("create"), main.rk("resume"), main.rk("status"));
    let (one, five) = (main.k(1i64), main.k(5i64));
    main.abx(OpCode::GetGlobal, 0, lib)
        .abc(OpCode::GetTable, 1, 0, create)
        .abx(OpCode::Closure, 2, body)
        .abc(OpCode::Call, 1, 2, 2)
        .abc(OpCode::GetTable, 2, 0, resume)
        .abc(OpCode::Move, 3, 1, 0)
        .abx(OpCode::LoadK, 4, one)
        .abc(OpCode::Call, 2, 3, 3)
        .abc(OpCode::GetTable, 4, 0, resume)
        .abc(OpCode::Move, 5, 1, 0)
        .abx(OpCode::LoadK, 6, five)
        .abc(OpCode::Call, 4, 3, 3)
        .abc(OpCode::GetTable, 6, 0, status)
        .abc(OpCode::Move, 7, 1, 0)
        .abc(OpCode::Call, 6, 2, 2)
        .abc(OpCode::GetTable, 7, 0, resume)
        .abc(OpCode::Move, 8, 1, 0)
        .abc(OpCode::Call, 7, 2, 3)
        .abc(OpCode::Return, 2, 8, 0);

    let r = run(&vm, main.build()).unwrap().all_values();
    assert_eq!(
        r,
        vec![
            LuaValue::Boolean(true),
            LuaValue::Integer(2),
            LuaValue::Boolean(true),
            LuaValue::Integer(15),
            LuaValue::from("dead"),
            LuaValue::Boolean(false),
            LuaValue::from("cannot resume dead coroutine"),
        ]
    );
}

#[test]
fn test_status_names() {
    let vm = new_vm();

    // return coroutine.status(coroutine.running())
    let mut b = ProtoBuilder::new();
    get_coroutine_fn(&mut b, 0, "status");
    get_coroutine_fn(&mut b, 1, "running");
    b.abc(OpCode::Call, 1, 1, 2)
        .abc(OpCode::Call, 0, 2, 2)
        .abc(OpCode::Return, 0, 2, 0);
    let co = vm.new_thread(load(&vm, b.build()), MultiValue::empty());
    assert_eq!(co.borrow().status().name(), "suspended");
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(returned(r), vec![LuaValue::from("running")]);
    assert_eq!(co.borrow().status().name(), "dead");
}

#[test]
fn test_resume_error_kills_coroutine() {
    let vm = new_vm();

    // error("boom")
    let mut b = ProtoBuilder::new();
    let (error, boom) = (b.k("error"), b.k("boom"));
    b.abx(OpCode::GetGlobal, 0, error)
        .abx(OpCode::LoadK, 1, boom)
        .abc(OpCode::Call, 0, 2, 1)
        .abc(OpCode::Return, 0, 1, 0);
    let co = vm.new_thread(load(&vm, b.build()), MultiValue::empty());
    let err = co.borrow_mut().resume(usize::MAX, MultiValue::empty()).unwrap_err();
    assert_eq!(err.to_string(), "test:3: boom");
    assert!(err.traceback().is_some_and(|tb| tb.contains("test:3: in main chunk")));
    assert_eq!(co.borrow().status(), ThreadStatus::Dead);
}

#[test]
fn test_wrap() {
    let vm = new_vm();

    // coroutine.yield(1); coroutine.yield(2); return 3
    let mut gen_fn = ProtoBuilder::new();
    let (one, two, three) = (gen_fn.k(1i64), gen_fn.k(2i64), gen_fn.k(3i64));
    get_coroutine_fn(&mut gen_fn, 0, "yield");
    gen_fn.abx(OpCode::LoadK, 1, one).abc(OpCode::Call, 0, 2, 1);
    get_coroutine_fn(&mut gen_fn, 0, "yield");
    gen_fn
        .abx(OpCode::LoadK, 1, two)
        .abc(OpCode::Call, 0, 2, 1)
        .abx(OpCode::LoadK, 0, three)
        .abc(OpCode::Return, 0, 2, 0);

    // local f = coroutine.wrap(gen); return f(), f(), f(), f
    let mut main = ProtoBuilder::new();
    get_coroutine_fn(&mut main, 0, "wrap");
    let child = main.child(gen_fn.into_proto());
    main.abx(OpCode::Closure, 1, child)
        .abc(OpCode::Call, 0, 2, 2)
        .abc(OpCode::Move, 1, 0, 0)
        .abc(OpCode::Call, 1, 1, 2)
        .abc(OpCode::Move, 2, 0, 0)
        .abc(OpCode::Call, 2, 1, 2)
        .abc(OpCode::Move, 3, 0, 0)
        .abc(OpCode::Call, 3, 1, 2)
        .abc(OpCode::Move, 4, 0, 0)
        .abc(OpCode::Return, 1, 5, 0);

    let r = run(&vm, main.build()).unwrap().all_values();
    assert_eq!(&r[..3], &[LuaValue::Integer(1), LuaValue::Integer(2), LuaValue::Integer(3)]);

    // a finished generator raises instead of returning false
    let err = vm.call_function(&r[3], MultiValue::empty()).unwrap_err();
    assert!(err.to_string().contains("cannot resume dead coroutine"));
}

#[test]
fn test_yield_across_pcall_is_an_error() {
    let vm = new_vm();

    // return pcall(coroutine.yield, 1)
    let mut b = ProtoBuilder::new();
    let (pcall, one) = (b.k("pcall"), b.k(1i64));
    b.abx(OpCode::GetGlobal, 0, pcall);
    get_coroutine_fn(&mut b, 1, "yield");
    b.abx(OpCode::LoadK, 2, one)
        .abc(OpCode::Call, 0, 3, 0)
        .abc(OpCode::Return, 0, 0, 0);

    let co = vm.new_thread(load(&vm, b.build()), MultiValue::empty());
    let r = returned(co.borrow_mut().resume(usize::MAX, MultiValue::empty()));
    assert_eq!(r[0], LuaValue::Boolean(false));
    assert!(
        r[1].as_str()
            .is_some_and(|m| m.contains("attempt to yield across metamethod/C-call boundary"))
    );
}

/// function() local f = function() return 42 end; return f() end
fn calls_child() -> ProtoBuilder {
    let mut child = ProtoBuilder::new();
    let answer = child.k(42i64);
    child
        .line_defined(2)
        .abx(OpCode::LoadK, 0, answer)
        .abc(OpCode::Return, 0, 2, 0);

    let mut b = ProtoBuilder::new();
    let proto = b.child(child.into_proto());
    b.abx(OpCode::Closure, 0, proto)
        .abc(OpCode::Call, 0, 1, 2)
        .abc(OpCode::Return, 0, 2, 0);
    b
}

#[test]
fn test_frame_limited_resume() {
    let vm = new_vm();
    let co = vm.new_thread(load(&vm, calls_child().build()), MultiValue::empty());

    let r = co.borrow_mut().resume(1, MultiValue::empty());
    assert!(matches!(r, Ok(ResumeOutcome::FrameLimit)));
    assert_eq!(co.borrow().status(), ThreadStatus::Suspended);
    assert_eq!(co.borrow().depth(), 1);
    // stopped in front of the CALL, which runs again on the next resume
    assert_eq!(co.borrow().top_frame().map(|f| f.pc()), Some(1));

    let r = co.borrow_mut().resume(1, MultiValue::empty());
    assert_eq!(returned(r), vec![LuaValue::Integer(42)]);
}

#[test]
fn test_error_after_frame_limit_leaves_end_call() {
    let vm = new_vm();

    // function() error("boom") end, called from a one-frame resume
    let mut child = ProtoBuilder::new();
    let (error, boom) = (child.k("error"), child.k("boom"));
    child
        .line_defined(2)
        .abx(OpCode::GetGlobal, 0, error)
        .abx(OpCode::LoadK, 1, boom)
        .abc(OpCode::Call, 0, 2, 1)
        .abc(OpCode::Return, 0, 1, 0);
    let mut b = ProtoBuilder::new();
    let proto = b.child(child.into_proto());
    b.abx(OpCode::Closure, 0, proto)
        .abc(OpCode::Call, 0, 1, 1)
        .abc(OpCode::Return, 0, 1, 0);

    let co = vm.new_thread(load(&vm, b.build()), MultiValue::empty());
    assert!(matches!(
        co.borrow_mut().resume(1, MultiValue::empty()),
        Ok(ResumeOutcome::FrameLimit)
    ));
    let err = co.borrow_mut().resume(1, MultiValue::empty()).unwrap_err();
    assert_eq!(err.to_string(), "test:3: boom");
    assert_eq!(co.borrow().status(), ThreadStatus::EndCall);
    assert_eq!(co.borrow().status().name(), "dead");
    assert_eq!(co.borrow().depth(), 1);

    // a jump discards the leftover frame and starts over
    let restart = load(&vm, calls_child().build());
    co.borrow_mut().jump(restart, MultiValue::empty()).unwrap();
    assert_eq!(co.borrow().depth(), 0);
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(returned(r), vec![LuaValue::Integer(42)]);
}

#[test]
fn test_sleep_skips_resumes() {
    let vm = new_vm();
    let co = vm.new_thread(load(&vm, calls_child().build()), MultiValue::empty());
    co.borrow_mut().sleep(2);

    assert!(matches!(
        co.borrow_mut().resume(usize::MAX, MultiValue::empty()),
        Ok(ResumeOutcome::Sleeping)
    ));
    assert_eq!(co.borrow().sleep_ticks(), 1);
    assert!(matches!(
        co.borrow_mut().resume(usize::MAX, MultiValue::empty()),
        Ok(ResumeOutcome::Sleeping)
    ));
    assert_eq!(co.borrow().status(), ThreadStatus::Initial);

    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(returned(r), vec![LuaValue::Integer(42)]);
}

#[test]
fn test_wait_yields_then_sleeps() {
    let vm = new_vm();

    // coroutine.wait(2); return "woke"
    let mut b = ProtoBuilder::new();
    get_coroutine_fn(&mut b, 0, "wait");
    let (two, woke) = (b.k(2i64), b.k("woke"));
    b.abx(OpCode::LoadK, 1, two)
        .abc(OpCode::Call, 0, 2, 1)
        .abx(OpCode::LoadK, 0, woke)
        .abc(OpCode::Return, 0, 2, 0);
    let co = vm.new_thread(load(&vm, b.build()), MultiValue::empty());

    assert!(yielded(co.borrow_mut().resume(usize::MAX, MultiValue::empty())).is_empty());
    assert_eq!(co.borrow().sleep_ticks(), 2);
    for _ in 0..2 {
        assert!(matches!(
            co.borrow_mut().resume(usize::MAX, MultiValue::empty()),
            Ok(ResumeOutcome::Sleeping)
        ));
    }
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(returned(r), vec![LuaValue::from("woke")]);
}

#[test]
fn test_jump_replaces_suspended_stack() {
    let vm = new_vm();
    let co = vm.new_thread(load(&vm, yield_once().build()), MultiValue::empty());
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::single(LuaValue::Integer(1)));
    assert_eq!(yielded(r), vec![LuaValue::Integer(2)]);

    // the new function starts fresh with its own arguments
    let again = load(&vm, yield_once().build());
    co.borrow_mut()
        .jump(again, MultiValue::single(LuaValue::Integer(100)))
        .unwrap();
    assert_eq!(co.borrow().status(), ThreadStatus::Initial);
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(yielded(r), vec![LuaValue::Integer(101)]);
}

#[test]
fn test_destroy_closes_upvalues() {
    let vm = new_vm();

    // local n = 7; getter = function() return n end; coroutine.yield()
    let mut getter = ProtoBuilder::new();
    getter
        .upvalues(1)
        .abc(OpCode::GetUpval, 0, 0, 0)
        .abc(OpCode::Return, 0, 2, 0);
    let mut b = ProtoBuilder::new();
    let seven = b.k(7i64);
    let name = b.k("getter");
    let child = b.child(getter.into_proto());
    b.abx(OpCode::LoadK, 0, seven)
        .abx(OpCode::Closure, 1, child)
        .abc(OpCode::Move, 0, 0, 0)
        .abx(OpCode::SetGlobal, 1, name);
    get_coroutine_fn(&mut b, 2, "yield");
    b.abc(OpCode::Call, 2, 1, 1).abc(OpCode::Return, 0, 1, 0);

    let co = vm.new_thread(load(&vm, b.build()), MultiValue::empty());
    yielded(co.borrow_mut().resume(usize::MAX, MultiValue::empty()));
    co.borrow_mut().destroy();
    assert!(co.borrow().is_dead());
    assert_eq!(co.borrow().depth(), 0);

    let getter = vm.get_global("getter");
    let r = vm.call_function(&getter, MultiValue::empty()).unwrap();
    assert_eq!(r.all_values(), vec![LuaValue::Integer(7)]);
}

#[test]
fn test_host_start_function_can_yield() {
    let vm = new_vm();
    let yield_fn = {
        let lib = vm.get_global("coroutine");
        let LuaValue::Table(t) = lib else {
            panic!("coroutine library missing");
        };
        let f = t.borrow().get_str("yield");
        f
    };
    let co = vm.new_thread(yield_fn, MultiValue::single(LuaValue::Integer(9)));
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(yielded(r), vec![LuaValue::Integer(9)]);
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::single(LuaValue::from("back")));
    assert_eq!(returned(r), vec![LuaValue::from("back")]);
    assert!(co.borrow().is_dead());
}

/// Main chunk that defines global
/// `f(n)`: `if n == 0 then coroutine.yield(); return 0 end; return f(n - 1) + 1`
/// and returns `f`. The recursive call is not a tail call, so a yield at
/// the bottom suspends `n + 1` frames.
fn define_countdown() -> Rc<crate::lua_value::Prototype> {
    let mut f = ProtoBuilder::new();
    f.params(1).line_defined(1);
    let (kzero, zero, one) = (f.k(0i64), f.rk(0i64), f.rk(1i64));
    let (lib, field, name) = (f.k("coroutine"), f.rk("yield"), f.k("f"));
    f.abc(OpCode::Eq, 0, 0, zero)
        .asbx(OpCode::Jmp, 0, 5)
        .abx(OpCode::GetGlobal, 1, lib)
        .abc(OpCode::GetTable, 1, 1, field)
        .abc(OpCode::Call, 1, 1, 1)
        .abx(OpCode::LoadK, 1, kzero)
        .abc(OpCode::Return, 1, 2, 0)
        .abx(OpCode::GetGlobal, 1, name)
        .abc(OpCode::Sub, 2, 0, one)
        .abc(OpCode::Call, 1, 2, 2)
        .abc(OpCode::Add, 1, 1, one)
        .abc(OpCode::Return, 1, 2, 0);
    let mut proto = f.into_proto();
    proto.max_stack_size = 3;

    let mut main = ProtoBuilder::new();
    let child = main.child(proto);
    let name = main.k("f");
    main.abx(OpCode::Closure, 0, child)
        .abx(OpCode::SetGlobal, 0, name)
        .abc(OpCode::Return, 0, 2, 0);
    main.build()
}

#[test]
fn test_yield_through_non_tail_calls() {
    let vm = new_vm();
    let f = run(&vm, define_countdown()).unwrap().all_values().remove(0);
    let co = vm.new_thread(f, MultiValue::single(LuaValue::Integer(3)));

    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert!(yielded(r).is_empty());
    assert_eq!(co.borrow().status(), ThreadStatus::Suspended);
    assert_eq!(co.borrow().depth(), 4);

    // every pending frame finishes its addition on the way out
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(returned(r), vec![LuaValue::Integer(3)]);
    assert_eq!(co.borrow().depth(), 0);
    assert!(co.borrow().is_dead());
}

#[test]
fn test_drop_deeply_suspended_thread() {
    const DEPTH: i64 = 100_000;
    let vm = LuaVM::new(SafeOption {
        max_call_depth: 1_000_000,
        ..Default::default()
    });
    vm.open_stdlib(Stdlib::All).unwrap();
    let f = run(&vm, define_countdown()).unwrap().all_values().remove(0);
    let co = vm.new_thread(f, MultiValue::single(LuaValue::Integer(DEPTH)));

    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert!(yielded(r).is_empty());
    assert_eq!(co.borrow().depth(), DEPTH as usize + 1);

    // releasing the whole frame chain must not recurse per frame
    drop(co);

    // the VM is still usable afterwards
    let f = vm.get_global("f");
    let co = vm.new_thread(f, MultiValue::single(LuaValue::Integer(2)));
    yielded(co.borrow_mut().resume(usize::MAX, MultiValue::empty()));
    let r = co.borrow_mut().resume(usize::MAX, MultiValue::empty());
    assert_eq!(returned(r), vec![LuaValue::Integer(2)]);
}
