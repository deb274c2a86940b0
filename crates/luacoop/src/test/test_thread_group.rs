// Tests for thread groups and the run state
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::lua_value::{LuaValue, MultiValue};
use crate::lua_vm::{LuaError, LuaResult, OpCode, SafeOption, ThreadStatus};
use crate::scheduler::{RunState, Schedulable, ThreadGroup, ThreadHandle};
use crate::stdlib::Stdlib;
use crate::test::{ProtoBuilder, load};

struct StubThread {
    id: usize,
    ticks: usize,
    lifetime: usize,
    fail_on: Option<usize>,
    destroyed: bool,
}

impl StubThread {
    fn new(id: usize, lifetime: usize) -> Rc<RefCell<StubThread>> {
        Rc::new(RefCell::new(StubThread {
            id,
            ticks: 0,
            lifetime,
            fail_on: None,
            destroyed: false,
        }))
    }
}

impl Schedulable for StubThread {
    fn id(&self) -> usize {
        self.id
    }

    fn tick(&mut self, _max_frames: usize) -> LuaResult<()> {
        self.ticks += 1;
        if self.fail_on == Some(self.ticks) {
            return Err(LuaError::runtime(format!("stub {} failed", self.id)));
        }
        Ok(())
    }

    fn is_dead(&self) -> bool {
        self.destroyed || self.ticks >= self.lifetime
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}

/// Adds `child` to its group on the first tick, then dies.
struct Spawner {
    group: Weak<ThreadGroup>,
    child: ThreadHandle,
    done: bool,
}

impl Schedulable for Spawner {
    fn id(&self) -> usize {
        0
    }

    fn tick(&mut self, _max_frames: usize) -> LuaResult<()> {
        if let Some(group) = self.group.upgrade() {
            group.add(self.child.clone());
        }
        self.done = true;
        Ok(())
    }

    fn is_dead(&self) -> bool {
        self.done
    }

    fn destroy(&mut self) {
        self.done = true;
    }
}

fn ticks(stubs: &[Rc<RefCell<StubThread>>]) -> Vec<usize> {
    stubs.iter().map(|s| s.borrow().ticks).collect()
}

#[test]
fn test_update_ticks_each_thread_once() {
    let group = ThreadGroup::default();
    let stubs: Vec<_> = (1..=3).map(|id| StubThread::new(id, 10)).collect();
    for s in &stubs {
        group.add(s.clone());
    }
    assert_eq!(group.len(), 3);

    group.update();
    assert_eq!(ticks(&stubs), vec![1, 1, 1]);
    group.update();
    assert_eq!(ticks(&stubs), vec![2, 2, 2]);
    assert!(!group.is_idle());
}

#[test]
fn test_suspended_group_does_nothing() {
    let group = ThreadGroup::default();
    let stub = StubThread::new(1, 10);
    group.add(stub.clone());

    group.suspend();
    assert!(group.is_suspended());
    group.update();
    group.update();
    assert_eq!(stub.borrow().ticks, 0);

    group.resume();
    group.update();
    assert_eq!(stub.borrow().ticks, 1);
}

#[test]
fn test_dead_threads_are_pruned() {
    let group = ThreadGroup::default();
    let short = StubThread::new(1, 1);
    let long = StubThread::new(2, 3);
    group.add(short.clone());
    group.add(long.clone());

    group.update();
    assert_eq!(group.len(), 1);
    group.update();
    group.update();
    assert!(group.is_empty());
    assert!(group.is_idle());

    // pruned threads are no longer ticked
    group.update();
    assert_eq!(short.borrow().ticks, 1);
    assert_eq!(long.borrow().ticks, 3);
}

#[test]
fn test_errors_go_to_the_handler() {
    let group = ThreadGroup::default();
    let failures: Rc<RefCell<Vec<(usize, String)>>> = Rc::default();
    let sink = failures.clone();
    group.set_exception_handler(move |id, e| sink.borrow_mut().push((id, e.to_string())));

    let stubs: Vec<_> = (1..=3).map(|id| StubThread::new(id, 10)).collect();
    stubs[1].borrow_mut().fail_on = Some(1);
    for s in &stubs {
        group.add(s.clone());
    }

    group.update();
    assert_eq!(*failures.borrow(), vec![(2, "stub 2 failed".to_string())]);
    // the failure does not stop the rest of the tick
    assert_eq!(ticks(&stubs), vec![1, 1, 1]);

    group.update();
    assert_eq!(failures.borrow().len(), 1);
}

#[test]
fn test_threads_added_during_update_wait_for_the_next_tick() {
    let group = Rc::new(ThreadGroup::default());
    let child = StubThread::new(7, 10);
    let spawner = Rc::new(RefCell::new(Spawner {
        group: Rc::downgrade(&group),
        child: child.clone(),
        done: false,
    }));
    group.add(spawner);

    group.update();
    assert_eq!(child.borrow().ticks, 0);
    // the spawner died and was pruned, the child stays
    assert_eq!(group.len(), 1);

    group.update();
    assert_eq!(child.borrow().ticks, 1);
}

#[test]
fn test_snapshot_is_not_affected_by_add() {
    let group = ThreadGroup::default();
    let first = StubThread::new(1, 10);
    group.add(first.clone());
    let snapshot = group.threads();
    group.add(StubThread::new(2, 10));
    assert_eq!(snapshot.len(), 1);
    assert_eq!(group.len(), 2);
}

#[test]
fn test_destroy() {
    let group = ThreadGroup::default();
    let stubs: Vec<_> = (1..=2).map(|id| StubThread::new(id, 10)).collect();
    for s in &stubs {
        group.add(s.clone());
    }

    group.destroy();
    assert!(group.is_destroyed());
    assert!(group.is_empty());
    assert!(stubs.iter().all(|s| s.borrow().destroyed));

    let late = StubThread::new(3, 10);
    group.add(late.clone());
    assert!(late.borrow().destroyed);
    assert!(group.is_empty());
    group.update();
    assert_eq!(late.borrow().ticks, 0);
}

fn run_state(options: SafeOption) -> RunState {
    let rs = RunState::new(options);
    rs.vm().open_stdlib(Stdlib::All).unwrap();
    rs
}

// coroutine.yield(); done = true
fn yield_then_mark() -> Rc<crate::lua_value::Prototype> {
    let mut b = ProtoBuilder::new();
    let (co, y, done) = (b.k("coroutine"), b.rk("yield"), b.k("done"));
    b.abx(OpCode::GetGlobal, 0, co)
        .abc(OpCode::GetTable, 0, 0, y)
        .abc(OpCode::Call, 0, 1, 1)
        .abc(OpCode::LoadBool, 0, 1, 0)
        .abx(OpCode::SetGlobal, 0, done)
        .abc(OpCode::Return, 0, 1, 0);
    b.build()
}

#[test]
fn test_lua_thread_in_group() {
    let rs = run_state(SafeOption::default());
    let main = load(rs.vm(), yield_then_mark());
    let thread = rs.spawn(main, MultiValue::empty());
    assert!(!rs.is_idle());

    rs.update();
    assert_eq!(thread.borrow().status().name(), "suspended");
    assert!(rs.vm().get_global("done").is_nil());

    rs.update();
    assert_eq!(rs.vm().get_global("done"), LuaValue::Boolean(true));
    assert!(thread.borrow().is_dead());
    assert!(rs.default_group().is_empty());
    assert!(rs.is_idle());
}

#[test]
fn test_sleeping_thread_in_group() {
    let rs = run_state(SafeOption::default());
    let main = load(rs.vm(), yield_then_mark());
    let thread = rs.spawn(main, MultiValue::empty());
    rs.update();
    thread.borrow_mut().sleep(2);

    rs.update();
    rs.update();
    assert!(rs.vm().get_global("done").is_nil());
    assert_eq!(thread.borrow().sleep_ticks(), 0);

    // a suspended group leaves the sleep counter alone
    thread.borrow_mut().sleep(1);
    rs.default_group().suspend();
    rs.update();
    assert_eq!(thread.borrow().sleep_ticks(), 1);
    rs.default_group().resume();

    rs.update();
    rs.update();
    assert_eq!(rs.vm().get_global("done"), LuaValue::Boolean(true));
}

#[test]
fn test_frames_per_tick() {
    let rs = run_state(SafeOption {
        max_frames_per_tick: 1,
        ..Default::default()
    });

    // result = (function() return 42 end)()
    let mut f = ProtoBuilder::new();
    let answer = f.k(42i64);
    f.line_defined(1)
        .abx(OpCode::LoadK, 0, answer)
        .abc(OpCode::Return, 0, 2, 0);
    let mut main = ProtoBuilder::new();
    let child = main.child(f.into_proto());
    let result = main.k("result");
    main.abx(OpCode::Closure, 0, child)
        .abc(OpCode::Call, 0, 1, 2)
        .abx(OpCode::SetGlobal, 0, result)
        .abc(OpCode::Return, 0, 1, 0);

    let main = load(rs.vm(), main.build());
    rs.spawn(main, MultiValue::empty());
    rs.update();
    assert!(rs.vm().get_global("result").is_nil());
    rs.update();
    assert_eq!(rs.vm().get_global("result"), LuaValue::Integer(42));
    assert!(rs.is_idle());
}

#[test]
fn test_spawn_from_lua() {
    let rs = run_state(SafeOption::default());
    rs.register_spawn("spawn");

    // spawn(function(n) x = n end, 5)
    let mut child = ProtoBuilder::new();
    let x = child.k("x");
    child
        .params(1)
        .line_defined(1)
        .abx(OpCode::SetGlobal, 0, x)
        .abc(OpCode::Return, 0, 1, 0);
    let mut main = ProtoBuilder::new();
    let proto = main.child(child.into_proto());
    let (spawn, five) = (main.k("spawn"), main.k(5i64));
    main.abx(OpCode::GetGlobal, 0, spawn)
        .abx(OpCode::Closure, 1, proto)
        .abx(OpCode::LoadK, 2, five)
        .abc(OpCode::Call, 0, 3, 2)
        .abc(OpCode::Return, 0, 2, 0);

    let main = load(rs.vm(), main.build());
    let thread = rs.spawn(main, MultiValue::empty());
    rs.update();
    assert!(thread.borrow().is_dead());
    assert_eq!(rs.default_group().len(), 1);
    assert!(rs.vm().get_global("x").is_nil());

    rs.update();
    assert_eq!(rs.vm().get_global("x"), LuaValue::Integer(5));
    assert!(rs.is_idle());
}

#[test]
fn test_lua_errors_reach_the_handler() {
    let rs = run_state(SafeOption::default());
    let seen: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = seen.clone();
    rs.default_group()
        .set_exception_handler(move |_, e| sink.borrow_mut().push(e.to_string()));

    let mut b = ProtoBuilder::new();
    let (error, msg) = (b.k("error"), b.k("bad"));
    b.abx(OpCode::GetGlobal, 0, error)
        .abx(OpCode::LoadK, 1, msg)
        .abc(OpCode::Call, 0, 2, 1)
        .abc(OpCode::Return, 0, 1, 0);
    let main = load(rs.vm(), b.build());
    let thread = rs.spawn(main, MultiValue::empty());

    rs.update();
    assert_eq!(*seen.borrow(), vec!["test:3: bad".to_string()]);
    assert!(thread.borrow().is_dead());
    assert!(rs.is_idle());
}

#[test]
fn test_groups_and_destroy() {
    let rs = run_state(SafeOption::default());
    let group = rs.new_group();
    let main = load(rs.vm(), yield_then_mark());
    let thread = rs.new_thread(&group, main, MultiValue::empty());
    rs.update();
    assert_eq!(group.len(), 1);

    rs.destroy();
    assert!(group.is_destroyed());
    assert!(thread.borrow().is_dead());
    assert!(rs.is_idle());
}

#[test]
fn test_error_after_yield_removes_thread() {
    let rs = run_state(SafeOption::default());
    let seen: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = seen.clone();
    rs.default_group()
        .set_exception_handler(move |_, e| sink.borrow_mut().push(e.to_string()));

    // coroutine.yield(); error("boom")
    let mut b = ProtoBuilder::new();
    let (co, y) = (b.k("coroutine"), b.rk("yield"));
    let (error, boom) = (b.k("error"), b.k("boom"));
    b.abx(OpCode::GetGlobal, 0, co)
        .abc(OpCode::GetTable, 0, 0, y)
        .abc(OpCode::Call, 0, 1, 1)
        .abx(OpCode::GetGlobal, 0, error)
        .abx(OpCode::LoadK, 1, boom)
        .abc(OpCode::Call, 0, 2, 1)
        .abc(OpCode::Return, 0, 1, 0);
    let main = load(rs.vm(), b.build());
    let thread = rs.spawn(main, MultiValue::empty());

    rs.update();
    assert_eq!(thread.borrow().status(), ThreadStatus::Suspended);
    for _ in 0..4 {
        rs.update();
    }
    assert_eq!(*seen.borrow(), vec!["test:6: boom".to_string()]);
    assert_eq!(thread.borrow().status(), ThreadStatus::Dead);
    assert_eq!(thread.borrow().depth(), 0);
    assert!(rs.default_group().is_empty());
    assert!(rs.is_idle());
}

#[test]
fn test_dropping_run_state_frees_globals() {
    let rs = run_state(SafeOption::default());

    // helper = function() end
    let mut helper = ProtoBuilder::new();
    helper.line_defined(1).abc(OpCode::Return, 0, 1, 0);
    let mut b = ProtoBuilder::new();
    let child = b.child(helper.into_proto());
    let name = b.k("helper");
    b.abx(OpCode::Closure, 0, child)
        .abx(OpCode::SetGlobal, 0, name)
        .abc(OpCode::Return, 0, 1, 0);
    let main = load(rs.vm(), b.build());
    rs.spawn(main, MultiValue::empty());
    rs.update();
    assert!(rs.is_idle());
    assert!(rs.vm().get_global("helper").is_function());

    let globals = Rc::downgrade(&rs.vm().globals());
    let vm = Rc::downgrade(rs.vm());
    drop(rs);
    assert!(globals.upgrade().is_none());
    assert!(vm.upgrade().is_none());
}

#[test]
fn test_close_breaks_cycles_through_threads() {
    let rs = run_state(SafeOption::default());
    let main = load(rs.vm(), yield_then_mark());
    let thread = rs.vm().new_thread(main, MultiValue::empty());
    thread
        .borrow_mut()
        .resume(usize::MAX, MultiValue::empty())
        .unwrap();
    // the suspended thread holds the VM and the VM's globals hold the thread
    rs.vm().set_global("parked", LuaValue::Thread(thread.clone()));
    let parked = Rc::downgrade(&thread);
    drop(thread);
    let vm = Rc::downgrade(rs.vm());

    rs.vm().close();
    assert!(parked.upgrade().is_none());
    assert!(rs.vm().get_global("parked").is_nil());
    drop(rs);
    assert!(vm.upgrade().is_none());
}
