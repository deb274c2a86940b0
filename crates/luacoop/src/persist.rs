// Persistence support
//
// Hooks a snapshotting layer needs from the VM: stable object identities,
// named references to objects that live outside a snapshot, enumeration of
// what an object points to, and substitution of one object for another.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::lua_value::{LuaFunction, LuaValue, TableRef, WeakMode};

/// Identity of a heap object (table, function, userdata or thread) for as
/// long as it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectId(pub usize);

impl ObjectId {
    /// `None` for values that are not heap objects.
    pub fn of(value: &LuaValue) -> Option<ObjectId> {
        value.object_id().map(ObjectId)
    }
}

/// Marker standing in for an object owned by the host, resolved by name
/// when a snapshot is restored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExternalRef {
    pub name: String,
}

/// Two-way registry between names and host-owned objects.
#[derive(Default)]
pub struct ExternalRefs {
    by_name: AHashMap<String, LuaValue>,
    by_id: AHashMap<ObjectId, String>,
}

impl ExternalRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `name`, replacing any earlier binding of
    /// either. Returns false (and registers nothing) for non-objects.
    pub fn register(&mut self, name: impl Into<String>, value: LuaValue) -> bool {
        let Some(id) = ObjectId::of(&value) else {
            return false;
        };
        let name = name.into();
        if let Some(old) = self.by_name.remove(&name).and_then(|v| ObjectId::of(&v)) {
            self.by_id.remove(&old);
        }
        if let Some(old_name) = self.by_id.insert(id, name.clone()) {
            self.by_name.remove(&old_name);
        }
        self.by_name.insert(name, value);
        true
    }

    pub fn unregister(&mut self, name: &str) -> Option<LuaValue> {
        let value = self.by_name.remove(name)?;
        if let Some(id) = ObjectId::of(&value) {
            self.by_id.remove(&id);
        }
        Some(value)
    }

    pub fn name_of(&self, value: &LuaValue) -> Option<&str> {
        ObjectId::of(value)
            .and_then(|id| self.by_id.get(&id))
            .map(String::as_str)
    }

    /// Marker for `value` if it is registered.
    pub fn marker(&self, value: &LuaValue) -> Option<ExternalRef> {
        self.name_of(value).map(|name| ExternalRef {
            name: name.to_string(),
        })
    }

    pub fn resolve(&self, marker: &ExternalRef) -> Option<LuaValue> {
        self.by_name.get(&marker.name).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

fn push_object(out: &mut Vec<LuaValue>, value: &LuaValue) {
    if value.is_collectable() {
        out.push(value.clone());
    }
}

/// Heap objects `value` refers to directly: table keys, values and
/// metatable; closure upvalues and environment; userdata metatable; the
/// frames, registers and varargs of a thread.
///
/// A thread that is currently running cannot be inspected and reports
/// nothing.
pub fn references(value: &LuaValue) -> Vec<LuaValue> {
    let mut out = Vec::new();
    match value {
        LuaValue::Table(t) => {
            let t = t.borrow();
            for (k, v) in t.iter() {
                push_object(&mut out, &k);
                push_object(&mut out, &v);
            }
            if let Some(mt) = t.metatable() {
                out.push(LuaValue::Table(mt));
            }
        }
        LuaValue::Function(LuaFunction::Lua(closure)) => {
            for upvalue in &closure.upvalues {
                push_object(&mut out, &upvalue.get());
            }
            out.push(LuaValue::Table(closure.env.clone()));
        }
        LuaValue::Function(LuaFunction::Host(_)) => {}
        LuaValue::Userdata(u) => {
            if let Some(mt) = u.get_metatable() {
                out.push(LuaValue::Table(mt));
            }
        }
        LuaValue::Thread(thread) => {
            let Ok(thread) = thread.try_borrow() else {
                return out;
            };
            if let Some((func, args)) = thread.start_function() {
                push_object(&mut out, func);
                for arg in args.iter() {
                    push_object(&mut out, arg);
                }
            }
            let mut frame = thread.top_frame();
            while let Some(f) = frame {
                out.push(LuaValue::Function(LuaFunction::Lua(f.closure.clone())));
                for v in f.registers.borrow().iter() {
                    push_object(&mut out, v);
                }
                for v in &f.varargs {
                    push_object(&mut out, v);
                }
                frame = f.parent();
            }
        }
        _ => {}
    }
    out
}

/// Replace every occurrence of `from` with `to` as a key, value or
/// metatable in `root` and every table reachable from it through tables.
/// Returns the number of substitutions.
pub fn replace_references(root: &TableRef, from: &LuaValue, to: &LuaValue) -> usize {
    let mut seen: AHashSet<usize> = AHashSet::new();
    let mut pending = vec![root.clone()];
    let mut replaced = 0;
    let to_table = match to {
        LuaValue::Table(t) => Some(t.clone()),
        _ => None,
    };

    while let Some(table) = pending.pop() {
        let id = Rc::as_ptr(&table) as *const () as usize;
        if !seen.insert(id) {
            continue;
        }

        let entries: Vec<(LuaValue, LuaValue)> = table.borrow().iter().collect();
        let metatable = table.borrow().metatable();
        let mut table_mut = table.borrow_mut();
        for (k, v) in entries {
            let new_key = if k.raw_equal(from) { to.clone() } else { k.clone() };
            let new_value = if v.raw_equal(from) { to.clone() } else { v.clone() };
            let key_changed = !new_key.raw_equal(&k);
            if key_changed {
                table_mut.remove(&k);
                replaced += 1;
            }
            if !new_value.raw_equal(&v) {
                replaced += 1;
            }
            if key_changed || !new_value.raw_equal(&v) {
                // a nil or NaN replacement key drops the entry
                let _ = table_mut.raw_set(new_key.clone(), new_value.clone());
            }
            for item in [new_key, new_value] {
                if let LuaValue::Table(t) = item {
                    pending.push(t);
                }
            }
        }

        if let Some(mt) = metatable {
            if LuaValue::Table(mt.clone()).raw_equal(from) {
                replaced += 1;
                let mode = to_table
                    .as_ref()
                    .filter(|t| !Rc::ptr_eq(t, &table))
                    .map(|t| WeakMode::from_metatable(&t.borrow()))
                    .unwrap_or_else(|| table_mut.weak_mode());
                table_mut.set_metatable(to_table.clone(), mode);
                if let Some(t) = &to_table {
                    pending.push(t.clone());
                }
            } else {
                pending.push(mt);
            }
        }
    }
    replaced
}
