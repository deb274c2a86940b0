// Metatable lookups and the metamethod-aware primitives the interpreter
// builds on: indexing, assignment, equality and ordering.

use crate::lua_value::{LuaValue, MultiValue, TableRef};
use crate::lua_vm::lua_limits::MAXTAGLOOP;
use crate::lua_vm::{LuaResult, LuaThread, debug_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmKind {
    Index,
    NewIndex,
    Mode,
    Len,
    Eq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Lt,
    Le,
    Concat,
    Call,
    ToString,
    Metatable,
}

impl TmKind {
    pub fn name(self) -> &'static str {
        match self {
            TmKind::Index => "__index",
            TmKind::NewIndex => "__newindex",
            TmKind::Mode => "__mode",
            TmKind::Len => "__len",
            TmKind::Eq => "__eq",
            TmKind::Add => "__add",
            TmKind::Sub => "__sub",
            TmKind::Mul => "__mul",
            TmKind::Div => "__div",
            TmKind::Mod => "__mod",
            TmKind::Pow => "__pow",
            TmKind::Unm => "__unm",
            TmKind::Lt => "__lt",
            TmKind::Le => "__le",
            TmKind::Concat => "__concat",
            TmKind::Call => "__call",
            TmKind::ToString => "__tostring",
            TmKind::Metatable => "__metatable",
        }
    }
}

impl LuaThread {
    pub fn metatable_of(&self, value: &LuaValue) -> Option<TableRef> {
        match value {
            LuaValue::Table(t) => t.borrow().metatable(),
            LuaValue::Userdata(u) => u.get_metatable(),
            LuaValue::String(_) => self.vm().string_metatable(),
            _ => None,
        }
    }

    /// The metamethod `kind` of `value`, nil if absent.
    pub fn metamethod(&self, value: &LuaValue, kind: TmKind) -> LuaValue {
        self.metatable_of(value)
            .map(|mt| mt.borrow().get_str(kind.name()))
            .unwrap_or_default()
    }

    pub(crate) fn call_metamethod(&mut self, tm: &LuaValue, args: MultiValue) -> LuaResult<LuaValue> {
        Ok(self.call(tm, args)?.into_first())
    }

    /// `obj[key]` with `__index` fallback.
    pub fn index(&mut self, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
        let mut current = obj.clone();
        for _ in 0..MAXTAGLOOP {
            let handler = if let LuaValue::Table(t) = &current {
                let (value, mt) = {
                    let table = t.borrow();
                    (table.raw_get(key), table.metatable())
                };
                if !value.is_nil() {
                    return Ok(value);
                }
                let handler = mt
                    .map(|mt| mt.borrow().get_str("__index"))
                    .unwrap_or_default();
                if handler.is_nil() {
                    return Ok(LuaValue::Nil);
                }
                handler
            } else {
                let handler = self.metamethod(&current, TmKind::Index);
                if handler.is_nil() {
                    return Err(self.type_error(&current, "index"));
                }
                handler
            };

            if handler.is_function() {
                return self.call_metamethod(&handler, MultiValue::two(current, key.clone()));
            }
            current = handler;
        }
        Err(self.error("loop in gettable"))
    }

    /// `obj[key] = value` with `__newindex` fallback.
    pub fn set_index(&mut self, obj: &LuaValue, key: &LuaValue, value: LuaValue) -> LuaResult<()> {
        let mut current = obj.clone();
        for _ in 0..MAXTAGLOOP {
            let handler = if let LuaValue::Table(t) = &current {
                let mt = {
                    let table = t.borrow();
                    if table.raw_get(key).is_nil() {
                        table.metatable()
                    } else {
                        None
                    }
                };
                let handler = mt
                    .map(|mt| mt.borrow().get_str("__newindex"))
                    .unwrap_or_default();
                if handler.is_nil() {
                    let result = t.borrow_mut().raw_set(key.clone(), value);
                    return result.map_err(|e| self.error(e.to_string()));
                }
                handler
            } else {
                let handler = self.metamethod(&current, TmKind::NewIndex);
                if handler.is_nil() {
                    return Err(self.type_error(&current, "index"));
                }
                handler
            };

            if handler.is_function() {
                let args = MultiValue::multiple(vec![current, key.clone(), value]);
                self.call(&handler, args)?;
                return Ok(());
            }
            current = handler;
        }
        Err(self.error("loop in settable"))
    }

    /// `a == b` with `__eq` for tables and userdata.
    pub fn equals(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if a.raw_equal(b) {
            return Ok(true);
        }
        let (mt1, mt2) = match (a, b) {
            (LuaValue::Table(_), LuaValue::Table(_)) | (LuaValue::Userdata(_), LuaValue::Userdata(_)) => {
                (self.metatable_of(a), self.metatable_of(b))
            }
            _ => return Ok(false),
        };
        let Some(mt1) = mt1 else {
            return Ok(false);
        };
        let tm1 = mt1.borrow().get_str("__eq");
        if tm1.is_nil() {
            return Ok(false);
        }
        let same_mt = mt2.as_ref().is_some_and(|mt2| std::rc::Rc::ptr_eq(&mt1, mt2));
        if !same_mt {
            let tm2 = mt2.map(|mt| mt.borrow().get_str("__eq")).unwrap_or_default();
            if !tm1.raw_equal(&tm2) {
                return Ok(false);
            }
        }
        Ok(self
            .call_metamethod(&tm1, MultiValue::two(a.clone(), b.clone()))?
            .is_truthy())
    }

    /// Shared ordering metamethod of two operands; both must agree.
    fn order_tm(&mut self, a: &LuaValue, b: &LuaValue, kind: TmKind) -> LuaResult<Option<bool>> {
        let tm1 = self.metamethod(a, kind);
        if tm1.is_nil() {
            return Ok(None);
        }
        let tm2 = self.metamethod(b, kind);
        if !tm1.raw_equal(&tm2) {
            return Ok(None);
        }
        let result = self.call_metamethod(&tm1, MultiValue::two(a.clone(), b.clone()))?;
        Ok(Some(result.is_truthy()))
    }

    /// `a < b`
    pub fn less_than(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Integer(x), LuaValue::Integer(y)) => return Ok(x < y),
            (LuaValue::String(x), LuaValue::String(y)) => return Ok(x.as_str() < y.as_str()),
            _ if a.is_number() && b.is_number() => {
                return Ok(a.to_f64().unwrap_or(f64::NAN) < b.to_f64().unwrap_or(f64::NAN));
            }
            _ => {}
        }
        if a.kind() == b.kind() {
            if let Some(result) = self.order_tm(a, b, TmKind::Lt)? {
                return Ok(result);
            }
        }
        Err(self.order_error(a, b))
    }

    /// `a <= b`, falling back to `not (b < a)` through `__lt`.
    pub fn less_equal(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Integer(x), LuaValue::Integer(y)) => return Ok(x <= y),
            (LuaValue::String(x), LuaValue::String(y)) => return Ok(x.as_str() <= y.as_str()),
            _ if a.is_number() && b.is_number() => {
                return Ok(a.to_f64().unwrap_or(f64::NAN) <= b.to_f64().unwrap_or(f64::NAN));
            }
            _ => {}
        }
        if a.kind() == b.kind() {
            if let Some(result) = self.order_tm(a, b, TmKind::Le)? {
                return Ok(result);
            }
            if let Some(result) = self.order_tm(b, a, TmKind::Lt)? {
                return Ok(!result);
            }
        }
        Err(self.order_error(a, b))
    }

    /// `tostring(v)`: `__tostring` if present, else the raw form.
    pub fn tostring(&mut self, value: &LuaValue) -> LuaResult<LuaValue> {
        let tm = self.metamethod(value, TmKind::ToString);
        if !tm.is_nil() {
            return self.call_metamethod(&tm, MultiValue::single(value.clone()));
        }
        Ok(match value {
            LuaValue::String(_) => value.clone(),
            other => LuaValue::from(other.to_raw_string()),
        })
    }

    /// "attempt to <op> a <type> value", naming the variable when the
    /// current instruction reveals it.
    pub(crate) fn type_error(&self, value: &LuaValue, op: &str) -> crate::lua_vm::LuaError {
        match debug_info::describe_value(self, value) {
            Some((kind, name)) => self.error(format!(
                "attempt to {} {} '{}' (a {} value)",
                op,
                kind,
                name,
                value.type_name()
            )),
            None => self.error(format!("attempt to {} a {} value", op, value.type_name())),
        }
    }

    pub(crate) fn order_error(&self, a: &LuaValue, b: &LuaValue) -> crate::lua_vm::LuaError {
        let (t1, t2) = (a.type_name(), b.type_name());
        if t1 == t2 {
            self.error(format!("attempt to compare two {} values", t1))
        } else {
            self.error(format!("attempt to compare {} with {}", t1, t2))
        }
    }
}
