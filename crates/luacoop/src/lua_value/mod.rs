// Lua value representation
pub mod chunk_serializer;
mod lua_function;
pub mod lua_table;
#[allow(clippy::module_inception)]
mod lua_value;
mod weak_value;

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;

pub use lua_function::{
    CFunction, HostFunction, LocalVar, LuaClosure, LuaFunction, LuaUpvalue, Prototype,
    RegisterFile, UpvalueRef, UpvalueState, VARARG_HASARG, VARARG_ISVARARG, VARARG_NEEDSARG,
};
pub use lua_table::{LuaTable, TableError, WeakMode};
pub use lua_value::{
    LuaString, LuaValue, LuaValueKind, TableRef, ThreadRef, format_number, parse_integer_radix,
    parse_number,
};
pub use weak_value::{Referent, WeakValue};

/// Multi-return values from Lua functions
/// - Empty: no return values
/// - Single: one value (no heap allocation, most common case)
/// - Many: 2+ values stored in Vec
#[derive(Debug, Clone, Default)]
pub enum MultiValue {
    #[default]
    Empty,
    Single(LuaValue),
    Many(Vec<LuaValue>),
}

impl MultiValue {
    #[inline(always)]
    pub fn empty() -> Self {
        MultiValue::Empty
    }

    #[inline(always)]
    pub fn single(value: LuaValue) -> Self {
        MultiValue::Single(value)
    }

    #[inline(always)]
    pub fn two(v1: LuaValue, v2: LuaValue) -> Self {
        MultiValue::Many(vec![v1, v2])
    }

    pub fn multiple(mut values: Vec<LuaValue>) -> Self {
        match values.len() {
            0 => MultiValue::Empty,
            1 => MultiValue::Single(values.pop().unwrap_or_default()),
            _ => MultiValue::Many(values),
        }
    }

    #[inline(always)]
    pub fn all_values(self) -> Vec<LuaValue> {
        match self {
            MultiValue::Empty => Vec::new(),
            MultiValue::Single(v) => vec![v],
            MultiValue::Many(v) => v,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        match self {
            MultiValue::Empty => 0,
            MultiValue::Single(_) => 1,
            MultiValue::Many(v) => v.len(),
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[LuaValue] {
        match self {
            MultiValue::Empty => &[],
            MultiValue::Single(v) => std::slice::from_ref(v),
            MultiValue::Many(v) => v,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LuaValue> {
        self.as_slice().iter()
    }

    #[inline(always)]
    pub fn first(&self) -> Option<&LuaValue> {
        self.as_slice().first()
    }

    /// Get value at index (0-based)
    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&LuaValue> {
        self.as_slice().get(index)
    }

    /// Value at index, `nil` when absent (argument access in host functions).
    #[inline(always)]
    pub fn arg(&self, index: usize) -> LuaValue {
        self.get(index).cloned().unwrap_or_default()
    }

    /// First value or `nil`.
    pub fn into_first(self) -> LuaValue {
        match self {
            MultiValue::Empty => LuaValue::Nil,
            MultiValue::Single(v) => v,
            MultiValue::Many(v) => v.into_iter().next().unwrap_or_default(),
        }
    }

    pub fn push(&mut self, value: LuaValue) {
        *self = match std::mem::take(self) {
            MultiValue::Empty => MultiValue::Single(value),
            MultiValue::Single(v) => MultiValue::Many(vec![v, value]),
            MultiValue::Many(mut v) => {
                v.push(value);
                MultiValue::Many(v)
            }
        };
    }

    pub fn prepend(self, value: LuaValue) -> Self {
        let mut values = Vec::with_capacity(self.len() + 1);
        values.push(value);
        values.extend(self.all_values());
        MultiValue::multiple(values)
    }

    pub fn extend(&mut self, other: MultiValue) {
        if other.is_empty() {
            return;
        }
        let mut values = std::mem::take(self).all_values();
        values.extend(other.all_values());
        *self = MultiValue::multiple(values);
    }

    /// Drop the first `n` values.
    pub fn skip(self, n: usize) -> Self {
        MultiValue::multiple(self.all_values().into_iter().skip(n).collect())
    }
}

impl From<Vec<LuaValue>> for MultiValue {
    fn from(values: Vec<LuaValue>) -> Self {
        MultiValue::multiple(values)
    }
}

impl From<LuaValue> for MultiValue {
    fn from(value: LuaValue) -> Self {
        MultiValue::Single(value)
    }
}

impl FromIterator<LuaValue> for MultiValue {
    fn from_iter<I: IntoIterator<Item = LuaValue>>(iter: I) -> Self {
        MultiValue::multiple(iter.into_iter().collect())
    }
}

impl IntoIterator for MultiValue {
    type Item = LuaValue;
    type IntoIter = std::vec::IntoIter<LuaValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.all_values().into_iter()
    }
}

/// Userdata - arbitrary Rust data with optional metatable
pub struct LuaUserdata {
    data: RefCell<Box<dyn Any>>,
    metatable: RefCell<Option<TableRef>>,
}

impl LuaUserdata {
    pub fn new<T: Any>(data: T) -> Self {
        LuaUserdata {
            data: RefCell::new(Box::new(data)),
            metatable: RefCell::new(None),
        }
    }

    pub fn with_metatable<T: Any>(data: T, metatable: TableRef) -> Self {
        LuaUserdata {
            data: RefCell::new(Box::new(data)),
            metatable: RefCell::new(Some(metatable)),
        }
    }

    pub fn borrow(&self) -> Ref<'_, Box<dyn Any>> {
        self.data.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Box<dyn Any>> {
        self.data.borrow_mut()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.data.borrow(), |b| b.downcast_ref::<T>()).ok()
    }

    pub fn get_metatable(&self) -> Option<TableRef> {
        self.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        *self.metatable.borrow_mut() = metatable;
    }
}

impl fmt::Debug for LuaUserdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Userdata({:p})", self as *const _)
    }
}
