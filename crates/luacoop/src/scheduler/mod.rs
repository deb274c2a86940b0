// Cooperative scheduling: thread groups and the run state that owns them
mod thread_group;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub use thread_group::{ExceptionHandler, Schedulable, ThreadGroup, ThreadHandle};

use crate::lib_registry::require_arg;
use crate::lua_value::{LuaFunction, LuaValue, MultiValue, ThreadRef};
use crate::lua_vm::{LuaResult, LuaVM, SafeOption};

/// A VM plus its thread groups, ticked in creation order.
pub struct RunState {
    vm: Rc<LuaVM>,
    groups: RefCell<Vec<Rc<ThreadGroup>>>,
    default_group: Rc<ThreadGroup>,
}

impl RunState {
    pub fn new(options: SafeOption) -> Self {
        Self::with_vm(LuaVM::new(options))
    }

    pub fn with_vm(vm: Rc<LuaVM>) -> Self {
        let default_group = Rc::new(ThreadGroup::new(vm.options().max_frames_per_tick));
        RunState {
            vm,
            groups: RefCell::new(vec![default_group.clone()]),
            default_group,
        }
    }

    pub fn vm(&self) -> &Rc<LuaVM> {
        &self.vm
    }

    pub fn default_group(&self) -> &Rc<ThreadGroup> {
        &self.default_group
    }

    pub fn new_group(&self) -> Rc<ThreadGroup> {
        let group = Rc::new(ThreadGroup::new(self.vm.options().max_frames_per_tick));
        self.groups.borrow_mut().push(group.clone());
        group
    }

    /// Create a thread running `func(args...)` and add it to `group`.
    pub fn new_thread(&self, group: &ThreadGroup, func: LuaValue, args: MultiValue) -> ThreadRef {
        let thread = self.vm.new_thread(func, args);
        group.add(thread.clone());
        thread
    }

    /// `new_thread` on the default group.
    pub fn spawn(&self, func: LuaValue, args: MultiValue) -> ThreadRef {
        self.new_thread(&self.default_group, func, args)
    }

    /// Register a global `name(f, ...)` that scripts use to start a thread
    /// in the default group. Returns the new thread.
    pub fn register_spawn(&self, name: &str) {
        let group: Weak<ThreadGroup> = Rc::downgrade(&self.default_group);
        let qualified = name.to_string();
        let spawn = LuaFunction::host_closure(name, move |l, args| -> LuaResult<MultiValue> {
            let func = require_arg(l, &args, 1, &qualified)?;
            let thread = l.vm().new_thread(func, args.skip(1));
            match group.upgrade() {
                Some(group) => group.add(thread.clone()),
                None => thread.borrow_mut().destroy(),
            }
            Ok(MultiValue::single(LuaValue::Thread(thread)))
        });
        self.vm.set_global(name, LuaValue::Function(spawn));
    }

    /// Tick every group once.
    pub fn update(&self) {
        let groups = self.groups.borrow().clone();
        for group in groups {
            group.update();
        }
    }

    /// Destroy every group and all their threads, then close the VM.
    pub fn destroy(&self) {
        let groups = std::mem::take(&mut *self.groups.borrow_mut());
        for group in groups {
            group.destroy();
        }
        self.vm.close();
    }

    /// No group has a thread left to run.
    pub fn is_idle(&self) -> bool {
        self.groups.borrow().iter().all(|g| g.is_idle())
    }
}

impl Drop for RunState {
    fn drop(&mut self) {
        self.destroy();
    }
}
