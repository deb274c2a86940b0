// Weak references to Lua values
//
// Only heap values can be held weakly. Numbers, strings and booleans stay
// strong since they cannot vanish.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::lua_value::{HostFunction, LuaClosure, LuaFunction, LuaTable, LuaUserdata, LuaValue};
use crate::lua_vm::LuaThread;

#[derive(Clone)]
pub enum WeakValue {
    Strong(LuaValue),
    Table(Weak<RefCell<LuaTable>>),
    Closure(Weak<LuaClosure>),
    Host(Weak<HostFunction>),
    Userdata(Weak<LuaUserdata>),
    Thread(Weak<RefCell<LuaThread>>),
}

impl WeakValue {
    pub fn new(value: &LuaValue) -> Self {
        match value {
            LuaValue::Table(t) => WeakValue::Table(Rc::downgrade(t)),
            LuaValue::Function(LuaFunction::Lua(c)) => WeakValue::Closure(Rc::downgrade(c)),
            LuaValue::Function(LuaFunction::Host(h)) => WeakValue::Host(Rc::downgrade(h)),
            LuaValue::Userdata(u) => WeakValue::Userdata(Rc::downgrade(u)),
            LuaValue::Thread(t) => WeakValue::Thread(Rc::downgrade(t)),
            other => WeakValue::Strong(other.clone()),
        }
    }

    /// The referent, if it is still alive.
    pub fn upgrade(&self) -> Option<LuaValue> {
        match self {
            WeakValue::Strong(v) => Some(v.clone()),
            WeakValue::Table(w) => w.upgrade().map(LuaValue::Table),
            WeakValue::Closure(w) => w.upgrade().map(|c| LuaValue::Function(LuaFunction::Lua(c))),
            WeakValue::Host(w) => w.upgrade().map(|h| LuaValue::Function(LuaFunction::Host(h))),
            WeakValue::Userdata(w) => w.upgrade().map(LuaValue::Userdata),
            WeakValue::Thread(w) => w.upgrade().map(LuaValue::Thread),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            WeakValue::Strong(_) => true,
            WeakValue::Table(w) => w.strong_count() > 0,
            WeakValue::Closure(w) => w.strong_count() > 0,
            WeakValue::Host(w) => w.strong_count() > 0,
            WeakValue::Userdata(w) => w.strong_count() > 0,
            WeakValue::Thread(w) => w.strong_count() > 0,
        }
    }

    /// Identity comparison without reviving the referent. A dangling weak
    /// pointer keeps its allocation reserved, so addresses cannot be reused
    /// while it exists.
    pub fn refers_to(&self, value: &LuaValue) -> bool {
        match (self, value) {
            (WeakValue::Strong(v), other) => v.raw_equal(other),
            (WeakValue::Table(w), LuaValue::Table(t)) => std::ptr::eq(w.as_ptr(), Rc::as_ptr(t)),
            (WeakValue::Closure(w), LuaValue::Function(LuaFunction::Lua(c))) => {
                std::ptr::eq(w.as_ptr(), Rc::as_ptr(c))
            }
            (WeakValue::Host(w), LuaValue::Function(LuaFunction::Host(h))) => {
                std::ptr::eq(w.as_ptr(), Rc::as_ptr(h))
            }
            (WeakValue::Userdata(w), LuaValue::Userdata(u)) => std::ptr::eq(w.as_ptr(), Rc::as_ptr(u)),
            (WeakValue::Thread(w), LuaValue::Thread(t)) => std::ptr::eq(w.as_ptr(), Rc::as_ptr(t)),
            _ => false,
        }
    }
}

/// Something a table slot can hold as a key or a value, strongly or weakly.
pub trait Referent {
    /// The held value, or `None` once a weak referent has been dropped.
    fn first(&self) -> Option<LuaValue>;

    /// Whether this refers to exactly `key` (raw equality).
    fn matches(&self, key: &LuaValue) -> bool;

    fn is_present(&self) -> bool;
}

impl Referent for LuaValue {
    fn first(&self) -> Option<LuaValue> {
        Some(self.clone())
    }

    fn matches(&self, key: &LuaValue) -> bool {
        self.raw_equal(key)
    }

    fn is_present(&self) -> bool {
        true
    }
}

impl Referent for WeakValue {
    fn first(&self) -> Option<LuaValue> {
        self.upgrade()
    }

    fn matches(&self, key: &LuaValue) -> bool {
        self.refers_to(key)
    }

    fn is_present(&self) -> bool {
        self.is_alive()
    }
}
