// Base functions (_G)
// Implements: assert, error, pcall, next, pairs, ipairs, select, type,
// tostring, tonumber, rawget, rawset, rawequal, setmetatable, getmetatable,
// unpack, print, _G, _VERSION

use crate::lib_registry::{LibraryModule, arg_type_error, check_table, opt_integer, require_arg};
use crate::lua_value::{LuaFunction, LuaValue, MultiValue, WeakMode, parse_integer_radix};
use crate::lua_vm::lua_limits::MAX_UNPACK;
use crate::lua_vm::{LuaError, LuaResult, LuaThread};

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "assert" => lua_assert,
        "error" => lua_error,
        "pcall" => lua_pcall,
        "next" => lua_next,
        "pairs" => lua_pairs,
        "ipairs" => lua_ipairs,
        "select" => lua_select,
        "type" => lua_type,
        "tostring" => lua_tostring,
        "tonumber" => lua_tonumber,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "rawequal" => lua_rawequal,
        "setmetatable" => lua_setmetatable,
        "getmetatable" => lua_getmetatable,
        "unpack" => lua_unpack,
        "print" => lua_print,
    })
    .with_value("_G", |vm| LuaValue::Table(vm.globals()))
    .with_value("_VERSION", |_| LuaValue::from("Lua 5.1"))
}

/// assert(v [, message]) - Raise error if v is false or nil
fn lua_assert(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let condition = require_arg(l, &args, 1, "assert")?;
    if condition.is_truthy() {
        return Ok(args);
    }
    let message = match args.get(1) {
        None | Some(LuaValue::Nil) => "assertion failed!".to_string(),
        Some(v) => v
            .to_str_coerce()
            .map(|s| s.to_string())
            .ok_or_else(|| arg_type_error(l, 2, "assert", "string", v))?,
    };
    Err(LuaError::runtime(message))
}

/// error(message [, level]) - Raise an error; string messages get the
/// position of the function `level` steps up the stack.
fn lua_error(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let level = opt_integer(l, &args, 2, "error", 1)?;
    let value = match args.arg(0) {
        LuaValue::String(s) if level > 0 => {
            LuaValue::from(format!("{}{}", l.where_(level as usize), s))
        }
        other => other,
    };
    Err(LuaError::from_value(value))
}

/// pcall(f, ...) - Call f in protected mode
fn lua_pcall(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let func = require_arg(l, &args, 1, "pcall")?;
    match l.call(&func, args.skip(1)) {
        Ok(results) => Ok(results.prepend(LuaValue::Boolean(true))),
        Err(LuaError::Runtime(e)) => Ok(MultiValue::two(LuaValue::Boolean(false), e.value)),
        Err(e) => Err(e),
    }
}

/// next(table [, key]) - Get next key-value pair
fn lua_next(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let table = check_table(l, &args, 1, "next")?;
    let key = args.arg(1);
    let entry = table.borrow().next(&key);
    match entry {
        Ok(Some((k, v))) => Ok(MultiValue::two(k, v)),
        Ok(None) => Ok(MultiValue::single(LuaValue::Nil)),
        Err(e) => Err(l.error(e.to_string())),
    }
}

/// pairs(t) - Returns next, t, nil
fn lua_pairs(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let table = check_table(l, &args, 1, "pairs")?;
    Ok(MultiValue::multiple(vec![
        LuaValue::Function(LuaFunction::host("next", lua_next)),
        LuaValue::Table(table),
        LuaValue::Nil,
    ]))
}

/// ipairs(t) - Returns an iterator over t[1], t[2], ... up to the first nil
fn lua_ipairs(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let table = check_table(l, &args, 1, "ipairs")?;
    Ok(MultiValue::multiple(vec![
        LuaValue::Function(LuaFunction::host("ipairs_next", ipairs_next)),
        LuaValue::Table(table),
        LuaValue::Integer(0),
    ]))
}

fn ipairs_next(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let table = check_table(l, &args, 1, "ipairs")?;
    let i = opt_integer(l, &args, 2, "ipairs", 0)?.wrapping_add(1);
    let value = table.borrow().get_int(i);
    if value.is_nil() {
        Ok(MultiValue::empty())
    } else {
        Ok(MultiValue::two(LuaValue::Integer(i), value))
    }
}

/// select(index, ...) - Return arguments after index, or their count for '#'
fn lua_select(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let selector = require_arg(l, &args, 1, "select")?;
    let n = args.len() as i64;
    if selector.as_str() == Some("#") {
        return Ok(MultiValue::single(LuaValue::Integer(n - 1)));
    }
    let mut i = selector
        .to_integer()
        .ok_or_else(|| arg_type_error(l, 1, "select", "number", &selector))?;
    if i < 0 {
        i += n;
    } else if i > n {
        i = n;
    }
    if i < 1 {
        return Err(l.error("bad argument #1 to 'select' (index out of range)"));
    }
    Ok(args.skip(i as usize))
}

/// type(v) - Return the type of a value as a string
fn lua_type(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let value = require_arg(l, &args, 1, "type")?;
    Ok(MultiValue::single(LuaValue::from(value.type_name())))
}

/// tostring(v) - Convert a value to a string, honoring __tostring
fn lua_tostring(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let value = require_arg(l, &args, 1, "tostring")?;
    Ok(MultiValue::single(l.tostring(&value)?))
}

/// tonumber(e [, base]) - Convert to number, nil when not convertible
fn lua_tonumber(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let value = require_arg(l, &args, 1, "tonumber")?;
    let base = opt_integer(l, &args, 2, "tonumber", 10)?;
    if base == 10 {
        return Ok(MultiValue::single(value.to_number().unwrap_or_default()));
    }
    if !(2..=36).contains(&base) {
        return Err(l.error("bad argument #2 to 'tonumber' (base out of range)"));
    }
    let text = value
        .to_str_coerce()
        .ok_or_else(|| arg_type_error(l, 1, "tonumber", "string", &value))?;
    Ok(MultiValue::single(
        parse_integer_radix(&text, base as u32).unwrap_or_default(),
    ))
}

/// rawget(table, key) - Get without metamethods
fn lua_rawget(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let table = check_table(l, &args, 1, "rawget")?;
    let key = require_arg(l, &args, 2, "rawget")?;
    let value = table.borrow().raw_get(&key);
    Ok(MultiValue::single(value))
}

/// rawset(table, key, value) - Set without metamethods
fn lua_rawset(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let table = check_table(l, &args, 1, "rawset")?;
    let key = require_arg(l, &args, 2, "rawset")?;
    let value = require_arg(l, &args, 3, "rawset")?;
    let result = table.borrow_mut().raw_set(key, value);
    result.map_err(|e| l.error(e.to_string()))?;
    Ok(MultiValue::single(LuaValue::Table(table)))
}

/// rawequal(v1, v2) - Equality without metamethods
fn lua_rawequal(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let a = require_arg(l, &args, 1, "rawequal")?;
    let b = require_arg(l, &args, 2, "rawequal")?;
    Ok(MultiValue::single(LuaValue::Boolean(a.raw_equal(&b))))
}

/// setmetatable(table, metatable) - Set (or clear) a table's metatable
fn lua_setmetatable(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let table = check_table(l, &args, 1, "setmetatable")?;
    let metatable = match args.arg(1) {
        LuaValue::Nil => None,
        LuaValue::Table(mt) => Some(mt),
        _ => return Err(l.error("bad argument #2 to 'setmetatable' (nil or table expected)")),
    };

    let protected = table
        .borrow()
        .metatable()
        .is_some_and(|mt| !mt.borrow().get_str("__metatable").is_nil());
    if protected {
        return Err(l.error("cannot change a protected metatable"));
    }

    // read __mode first: the metatable may be the table itself
    let mode = metatable
        .as_ref()
        .map(|mt| WeakMode::from_metatable(&mt.borrow()))
        .unwrap_or_default();
    table.borrow_mut().set_metatable(metatable, mode);
    Ok(MultiValue::single(LuaValue::Table(table)))
}

/// getmetatable(object) - The metatable, or its __metatable field if set
fn lua_getmetatable(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let value = require_arg(l, &args, 1, "getmetatable")?;
    let Some(mt) = l.metatable_of(&value) else {
        return Ok(MultiValue::single(LuaValue::Nil));
    };
    let protected = mt.borrow().get_str("__metatable");
    if !protected.is_nil() {
        return Ok(MultiValue::single(protected));
    }
    Ok(MultiValue::single(LuaValue::Table(mt)))
}

/// unpack(list [, i [, j]]) - Return list[i], ..., list[j]
fn lua_unpack(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let table = check_table(l, &args, 1, "unpack")?;
    let i = opt_integer(l, &args, 2, "unpack", 1)?;
    let j = match args.get(2) {
        None | Some(LuaValue::Nil) => table.borrow().len() as i64,
        Some(_) => opt_integer(l, &args, 3, "unpack", 0)?,
    };
    if i > j {
        return Ok(MultiValue::empty());
    }
    let count = (j as i128 - i as i128 + 1) as u128;
    if count >= MAX_UNPACK as u128 {
        return Err(l.error("too many results to unpack"));
    }
    let table = table.borrow();
    Ok((i..=j).map(|k| table.get_int(k)).collect())
}

/// print(...) - Print values to stdout, tab separated
fn lua_print(l: &mut LuaThread, args: MultiValue) -> LuaResult<MultiValue> {
    let mut output = Vec::with_capacity(args.len());
    for value in args.iter() {
        match l.tostring(value)? {
            LuaValue::String(s) => output.push(s.to_string()),
            _ => return Err(l.error("'tostring' must return a string to 'print'")),
        }
    }
    println!("{}", output.join("\t"));
    Ok(MultiValue::empty())
}
