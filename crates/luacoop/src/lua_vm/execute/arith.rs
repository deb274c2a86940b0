// Arithmetic on Lua numbers
//
// Integer operands stay integers for +, -, * and % while the result fits;
// overflow falls back to floating point. `/` and `^` always compute in
// floating point. Strings convertible to numbers are accepted everywhere.

use crate::lua_value::{LuaValue, MultiValue};
use crate::lua_vm::execute::TmKind;
use crate::lua_vm::{LuaResult, LuaThread};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
}

impl ArithOp {
    pub fn tm(self) -> TmKind {
        match self {
            ArithOp::Add => TmKind::Add,
            ArithOp::Sub => TmKind::Sub,
            ArithOp::Mul => TmKind::Mul,
            ArithOp::Div => TmKind::Div,
            ArithOp::Mod => TmKind::Mod,
            ArithOp::Pow => TmKind::Pow,
            ArithOp::Unm => TmKind::Unm,
        }
    }
}

#[inline]
fn int_arith(op: ArithOp, x: i64, y: i64) -> LuaValue {
    match op {
        ArithOp::Add => x
            .checked_add(y)
            .map(LuaValue::Integer)
            .unwrap_or_else(|| LuaValue::number(x as f64 + y as f64)),
        ArithOp::Sub => x
            .checked_sub(y)
            .map(LuaValue::Integer)
            .unwrap_or_else(|| LuaValue::number(x as f64 - y as f64)),
        ArithOp::Mul => x
            .checked_mul(y)
            .map(LuaValue::Integer)
            .unwrap_or_else(|| LuaValue::number(x as f64 * y as f64)),
        ArithOp::Div => LuaValue::number(x as f64 / y as f64),
        ArithOp::Mod => {
            if y == 0 {
                return LuaValue::number(float_mod(x as f64, 0.0));
            }
            let r = x.wrapping_rem(y);
            if r != 0 && (r ^ y) < 0 {
                LuaValue::Integer(r + y)
            } else {
                LuaValue::Integer(r)
            }
        }
        ArithOp::Pow => LuaValue::number((x as f64).powf(y as f64)),
        ArithOp::Unm => {
            if x == 0 {
                LuaValue::Float(-0.0)
            } else {
                x.checked_neg()
                    .map(LuaValue::Integer)
                    .unwrap_or_else(|| LuaValue::number(-(x as f64)))
            }
        }
    }
}

/// Floored modulo: `a - floor(a / b) * b`.
#[inline]
fn float_mod(a: f64, b: f64) -> f64 {
    a - (a / b).floor() * b
}

#[inline]
fn float_arith(op: ArithOp, x: f64, y: f64) -> LuaValue {
    LuaValue::number(match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => float_mod(x, y),
        ArithOp::Pow => x.powf(y),
        ArithOp::Unm => -x,
    })
}

/// Arithmetic without metamethods; `None` if an operand is not a number
/// (or a numeric string).
pub fn arith_raw(op: ArithOp, a: &LuaValue, b: &LuaValue) -> Option<LuaValue> {
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => Some(int_arith(op, *x, *y)),
        (LuaValue::Float(x), LuaValue::Float(y)) => Some(float_arith(op, *x, *y)),
        _ => {
            let a = a.to_number()?;
            let b = b.to_number()?;
            match (&a, &b) {
                (LuaValue::Integer(x), LuaValue::Integer(y)) => Some(int_arith(op, *x, *y)),
                _ => Some(float_arith(op, a.to_f64()?, b.to_f64()?)),
            }
        }
    }
}

impl LuaThread {
    /// Binary (or unary, with `b == a`) arithmetic with metamethod fallback.
    pub fn arith(&mut self, op: ArithOp, a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
        if let Some(v) = arith_raw(op, a, b) {
            return Ok(v);
        }
        let mut tm = self.metamethod(a, op.tm());
        if tm.is_nil() {
            tm = self.metamethod(b, op.tm());
        }
        if tm.is_nil() {
            let culprit = if a.to_number().is_some() { b } else { a };
            return Err(self.type_error(culprit, "perform arithmetic on"));
        }
        self.call_metamethod(&tm, MultiValue::two(a.clone(), b.clone()))
    }

    /// The `#` operator.
    pub fn len(&mut self, value: &LuaValue) -> LuaResult<LuaValue> {
        match value {
            LuaValue::String(s) => Ok(LuaValue::Integer(s.len() as i64)),
            LuaValue::Table(t) => Ok(LuaValue::Integer(t.borrow().len() as i64)),
            other => {
                let tm = self.metamethod(other, TmKind::Len);
                if tm.is_nil() {
                    return Err(self.type_error(other, "get length of"));
                }
                self.call_metamethod(&tm, MultiValue::two(other.clone(), other.clone()))
            }
        }
    }
}
