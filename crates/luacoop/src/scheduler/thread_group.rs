// ThreadGroup - an ordered set of threads ticked together
//
// The thread list is an `Rc<Vec<..>>` replaced copy-on-write: `update`
// iterates a snapshot, so threads added or pruned while a tick is running
// never disturb the iteration in progress.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::lua_value::MultiValue;
use crate::lua_vm::{LuaError, LuaResult, LuaThread, ThreadStatus};

/// Anything a ThreadGroup can tick.
pub trait Schedulable {
    fn id(&self) -> usize;

    /// Advance by one resume of at most `max_frames` new frames.
    fn tick(&mut self, max_frames: usize) -> LuaResult<()>;

    fn is_dead(&self) -> bool;

    /// Whether `tick` should be called at all. Dead threads and threads
    /// that ended on an error are skipped; a group destroys the latter once
    /// its handler has seen the error.
    fn is_runnable(&self) -> bool {
        !self.is_dead()
    }

    fn destroy(&mut self);
}

impl Schedulable for LuaThread {
    fn id(&self) -> usize {
        LuaThread::id(self)
    }

    fn tick(&mut self, max_frames: usize) -> LuaResult<()> {
        self.resume(max_frames, MultiValue::empty()).map(|_| ())
    }

    fn is_dead(&self) -> bool {
        LuaThread::is_dead(self)
    }

    fn is_runnable(&self) -> bool {
        matches!(self.status(), ThreadStatus::Initial | ThreadStatus::Suspended)
    }

    fn destroy(&mut self) {
        LuaThread::destroy(self)
    }
}

pub type ThreadHandle = Rc<RefCell<dyn Schedulable>>;

/// Receives the id of the failing thread and its error.
pub type ExceptionHandler = Rc<dyn Fn(usize, &LuaError)>;

fn report_to_stderr(id: usize, error: &LuaError) {
    eprintln!("error in thread {}: {}", id, error.full_message());
}

pub struct ThreadGroup {
    threads: RefCell<Rc<Vec<ThreadHandle>>>,
    suspended: Cell<bool>,
    destroyed: Cell<bool>,
    handler: RefCell<ExceptionHandler>,
    max_frames_per_tick: usize,
}

impl ThreadGroup {
    pub fn new(max_frames_per_tick: usize) -> Self {
        ThreadGroup {
            threads: RefCell::new(Rc::new(Vec::new())),
            suspended: Cell::new(false),
            destroyed: Cell::new(false),
            handler: RefCell::new(Rc::new(report_to_stderr)),
            max_frames_per_tick,
        }
    }

    /// Replace the exception handler. The default one prints to stderr.
    pub fn set_exception_handler(&self, handler: impl Fn(usize, &LuaError) + 'static) {
        *self.handler.borrow_mut() = Rc::new(handler);
    }

    /// Append a thread; it is first ticked by the next `update`. A
    /// destroyed group destroys the thread instead.
    pub fn add(&self, thread: ThreadHandle) {
        if self.destroyed.get() {
            if let Ok(mut t) = thread.try_borrow_mut() {
                t.destroy();
            }
            return;
        }
        Rc::make_mut(&mut *self.threads.borrow_mut()).push(thread);
    }

    /// Snapshot of the current thread list.
    pub fn threads(&self) -> Rc<Vec<ThreadHandle>> {
        self.threads.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.threads.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.borrow().is_empty()
    }

    /// Tick every runnable thread once, in insertion order, then drop the
    /// dead ones. Errors go to the exception handler and never stop the tick;
    /// a thread the error left unresumable is destroyed.
    pub fn update(&self) {
        if self.suspended.get() || self.destroyed.get() {
            return;
        }
        let snapshot = self.threads();
        for thread in snapshot.iter() {
            // a thread that is already borrowed is running further up the
            // native stack (it resumed us); skip it this tick
            let Ok(mut t) = thread.try_borrow_mut() else {
                continue;
            };
            if !t.is_runnable() {
                continue;
            }
            let id = t.id();
            let result = t.tick(self.max_frames_per_tick);
            drop(t);
            if let Err(e) = result {
                let handler = self.handler.borrow().clone();
                handler(id, &e);
                // a thread left in EndCall would never run again; release
                // its frames so the prune below drops it
                if let Ok(mut t) = thread.try_borrow_mut()
                    && !t.is_runnable()
                    && !t.is_dead()
                {
                    t.destroy();
                }
            }
            if self.destroyed.get() {
                return;
            }
        }
        drop(snapshot);
        self.prune();
    }

    /// Replace the thread list with one holding only threads not yet dead.
    fn prune(&self) {
        let current = self.threads();
        let is_dead = |t: &ThreadHandle| t.try_borrow().is_ok_and(|t| t.is_dead());
        if !current.iter().any(is_dead) {
            return;
        }
        let live: Vec<ThreadHandle> = current.iter().filter(|t| !is_dead(*t)).cloned().collect();
        *self.threads.borrow_mut() = Rc::new(live);
    }

    /// Stop ticking this group's threads until `resume`. Sleep counters
    /// are not decremented while suspended.
    pub fn suspend(&self) {
        self.suspended.set(true);
    }

    pub fn resume(&self) {
        self.suspended.set(false);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.get()
    }

    /// Destroy every thread and refuse new ones.
    pub fn destroy(&self) {
        self.destroyed.set(true);
        let threads = std::mem::take(&mut *self.threads.borrow_mut());
        for thread in threads.iter() {
            if let Ok(mut t) = thread.try_borrow_mut() {
                t.destroy();
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// No thread left that a tick would run.
    pub fn is_idle(&self) -> bool {
        self.threads()
            .iter()
            .all(|t| t.try_borrow().is_ok_and(|t| !t.is_runnable()))
    }
}

impl Default for ThreadGroup {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}
