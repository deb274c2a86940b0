// LuaValue - the tagged value every register, constant and table slot holds
//
// Numbers are kept normalized: a double with an exact integral value inside
// the i64 range is always stored as `Integer`, so `1.0` and `1` compare and
// hash identically. Reference types compare by identity (pointer address).

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::lua_value::{LuaFunction, LuaTable, LuaUserdata};
use crate::lua_vm::LuaThread;

pub type TableRef = Rc<RefCell<LuaTable>>;
pub type ThreadRef = Rc<RefCell<LuaThread>>;

/// Immutable Lua string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LuaString(SmolStr);

impl LuaString {
    pub fn new(s: &str) -> Self {
        LuaString(SmolStr::new(s))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Deref for LuaString {
    type Target = str;

    fn deref(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for LuaString {
    fn from(s: &str) -> Self {
        LuaString(SmolStr::new(s))
    }
}

impl From<String> for LuaString {
    fn from(s: String) -> Self {
        LuaString(SmolStr::from(s))
    }
}

impl fmt::Display for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.as_str())
    }
}

/// Type tag of a value, as reported by `type()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaValueKind {
    Nil,
    Boolean,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl LuaValueKind {
    pub fn name(self) -> &'static str {
        match self {
            LuaValueKind::Nil => "nil",
            LuaValueKind::Boolean => "boolean",
            LuaValueKind::Number => "number",
            LuaValueKind::String => "string",
            LuaValueKind::Table => "table",
            LuaValueKind::Function => "function",
            LuaValueKind::Userdata => "userdata",
            LuaValueKind::Thread => "thread",
        }
    }
}

#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    /// Never holds an integral value representable as `Integer`, except `-0.0`.
    Float(f64),
    String(LuaString),
    Table(TableRef),
    Function(LuaFunction),
    Userdata(Rc<LuaUserdata>),
    Thread(ThreadRef),
}

// 2^63 as f64; the first double outside the i64 range
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

impl LuaValue {
    #[inline(always)]
    pub fn nil() -> Self {
        LuaValue::Nil
    }

    #[inline(always)]
    pub fn boolean(b: bool) -> Self {
        LuaValue::Boolean(b)
    }

    #[inline(always)]
    pub fn integer(i: i64) -> Self {
        LuaValue::Integer(i)
    }

    /// Build a number, collapsing integral doubles to `Integer`.
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0
            && (-I64_BOUND..I64_BOUND).contains(&n)
            && !(n == 0.0 && n.is_sign_negative())
        {
            LuaValue::Integer(n as i64)
        } else {
            LuaValue::Float(n)
        }
    }

    pub fn string(s: impl Into<LuaString>) -> Self {
        LuaValue::String(s.into())
    }

    pub fn table(t: LuaTable) -> Self {
        LuaValue::Table(Rc::new(RefCell::new(t)))
    }

    pub fn new_table() -> Self {
        Self::table(LuaTable::new(0, 0))
    }

    pub fn kind(&self) -> LuaValueKind {
        match self {
            LuaValue::Nil => LuaValueKind::Nil,
            LuaValue::Boolean(_) => LuaValueKind::Boolean,
            LuaValue::Integer(_) | LuaValue::Float(_) => LuaValueKind::Number,
            LuaValue::String(_) => LuaValueKind::String,
            LuaValue::Table(_) => LuaValueKind::Table,
            LuaValue::Function(_) => LuaValueKind::Function,
            LuaValue::Userdata(_) => LuaValueKind::Userdata,
            LuaValue::Thread(_) => LuaValueKind::Thread,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    #[inline(always)]
    pub fn is_number(&self) -> bool {
        matches!(self, LuaValue::Integer(_) | LuaValue::Float(_))
    }

    #[inline(always)]
    pub fn is_string(&self) -> bool {
        matches!(self, LuaValue::String(_))
    }

    #[inline(always)]
    pub fn is_table(&self) -> bool {
        matches!(self, LuaValue::Table(_))
    }

    #[inline(always)]
    pub fn is_function(&self) -> bool {
        matches!(self, LuaValue::Function(_))
    }

    /// Everything except `nil` and `false` is true.
    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    /// True for values that live on the heap and are compared by identity.
    pub fn is_collectable(&self) -> bool {
        matches!(
            self,
            LuaValue::Table(_) | LuaValue::Function(_) | LuaValue::Userdata(_) | LuaValue::Thread(_)
        )
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&LuaFunction> {
        match self {
            LuaValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&ThreadRef> {
        match self {
            LuaValue::Thread(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Identity of a heap value: its allocation address.
    pub fn object_id(&self) -> Option<usize> {
        match self {
            LuaValue::Table(t) => Some(Rc::as_ptr(t) as *const () as usize),
            LuaValue::Function(f) => Some(f.address()),
            LuaValue::Userdata(u) => Some(Rc::as_ptr(u) as *const () as usize),
            LuaValue::Thread(t) => Some(Rc::as_ptr(t) as *const () as usize),
            _ => None,
        }
    }

    /// Coerce to a number value (`Integer` or `Float`), following string
    /// conversion rules.
    pub fn to_number(&self) -> Option<LuaValue> {
        match self {
            LuaValue::Integer(_) | LuaValue::Float(_) => Some(self.clone()),
            LuaValue::String(s) => parse_number(s),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            LuaValue::Integer(i) => Some(*i as f64),
            LuaValue::Float(f) => Some(*f),
            LuaValue::String(s) => parse_number(s).and_then(|v| v.to_f64()),
            _ => None,
        }
    }

    /// Integer view used for indices and counts; floats must be integral.
    pub fn to_integer(&self) -> Option<i64> {
        match self.to_number()? {
            LuaValue::Integer(i) => Some(i),
            LuaValue::Float(f) if f == 0.0 => Some(0),
            _ => None,
        }
    }

    /// String view with number-to-string coercion (used by concat).
    pub fn to_str_coerce(&self) -> Option<LuaString> {
        match self {
            LuaValue::String(s) => Some(s.clone()),
            LuaValue::Integer(i) => Some(LuaString::from(itoa::Buffer::new().format(*i))),
            LuaValue::Float(f) => Some(LuaString::from(format_number(*f))),
            _ => None,
        }
    }

    /// Textual form without consulting `__tostring`.
    pub fn to_raw_string(&self) -> String {
        match self {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Integer(i) => itoa::Buffer::new().format(*i).to_string(),
            LuaValue::Float(f) => format_number(*f),
            LuaValue::String(s) => s.to_string(),
            LuaValue::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
            LuaValue::Function(f) => format!("function: {:#x}", f.address()),
            LuaValue::Userdata(u) => format!("userdata: {:p}", Rc::as_ptr(u)),
            LuaValue::Thread(t) => format!("thread: {:p}", Rc::as_ptr(t)),
        }
    }

    /// Primitive equality: no metamethods, numbers by value, heap values by identity.
    pub fn raw_equal(&self, other: &LuaValue) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a == b,
            (LuaValue::Integer(i), LuaValue::Float(f)) | (LuaValue::Float(f), LuaValue::Integer(i)) => {
                *i as f64 == *f
            }
            (LuaValue::String(a), LuaValue::String(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(a), LuaValue::Function(b)) => a.ptr_eq(b),
            (LuaValue::Userdata(a), LuaValue::Userdata(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Thread(a), LuaValue::Thread(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equal(other)
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::String(s) => write!(f, "{:?}", s),
            LuaValue::Float(n) => write!(f, "{}", format_number(*n)),
            other => f.write_str(&other.to_raw_string()),
        }
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw_string())
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<i64> for LuaValue {
    fn from(i: i64) -> Self {
        LuaValue::Integer(i)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::number(n)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::String(LuaString::from(s))
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::String(LuaString::from(s))
    }
}

impl From<LuaString> for LuaValue {
    fn from(s: LuaString) -> Self {
        LuaValue::String(s)
    }
}

impl From<TableRef> for LuaValue {
    fn from(t: TableRef) -> Self {
        LuaValue::Table(t)
    }
}

impl From<LuaFunction> for LuaValue {
    fn from(f: LuaFunction) -> Self {
        LuaValue::Function(f)
    }
}

impl From<ThreadRef> for LuaValue {
    fn from(t: ThreadRef) -> Self {
        LuaValue::Thread(t)
    }
}

/// Format a float the way `%.14g` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    const PRECISION: i32 = 14;
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_fraction_zeros(mantissa), sign, exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp) as usize;
        strip_fraction_zeros(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Parse a numeric literal the way `tonumber` does: surrounding whitespace,
/// optional sign, decimal (with fraction/exponent) or `0x` hex.
pub fn parse_number(s: &str) -> Option<LuaValue> {
    let t = s.trim_matches(|c: char| c.is_ascii_whitespace());
    let (neg, body) = match t.as_bytes().first()? {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };

    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() {
            return None;
        }
        let mut v: f64 = 0.0;
        for c in hex.chars() {
            v = v * 16.0 + c.to_digit(16)? as f64;
        }
        return Some(LuaValue::number(if neg { -v } else { v }));
    }

    let first = *body.as_bytes().first()?;
    if !(first.is_ascii_digit() || first == b'.') {
        return None;
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }

    if body.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = body.parse::<i64>() {
            return Some(LuaValue::Integer(if neg { i.wrapping_neg() } else { i }));
        }
    }
    let v: f64 = body.parse().ok()?;
    Some(LuaValue::number(if neg { -v } else { v }))
}

/// Parse an integer literal in the given base (2..=36), as `tonumber(s, base)`.
pub fn parse_integer_radix(s: &str, base: u32) -> Option<LuaValue> {
    let t = s.trim_matches(|c: char| c.is_ascii_whitespace());
    let (neg, body) = match t.as_bytes().first()? {
        b'-' => (true, &t[1..]),
        _ => (false, t),
    };
    if body.is_empty() {
        return None;
    }
    let mut v: f64 = 0.0;
    for c in body.chars() {
        v = v * base as f64 + c.to_digit(base)? as f64;
    }
    Some(LuaValue::number(if neg { -v } else { v }))
}
