// Tests for the base library
use std::rc::Rc;

use crate::lua_value::{LuaTable, LuaValue, MultiValue};
use crate::lua_vm::{LuaResult, LuaThread, LuaVM, SafeOption};
use crate::stdlib::Stdlib;
use crate::test::{host, new_vm};

fn call(vm: &Rc<LuaVM>, name: &str, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    vm.call_function(&vm.get_global(name), MultiValue::multiple(args))
        .map(MultiValue::all_values)
}

fn call_err(vm: &Rc<LuaVM>, name: &str, args: Vec<LuaValue>) -> String {
    match call(vm, name, args) {
        Ok(v) => panic!("{} returned {:?}", name, v),
        Err(e) => e.to_string(),
    }
}

fn s(text: &str) -> LuaValue {
    LuaValue::from(text)
}

fn int(i: i64) -> LuaValue {
    LuaValue::Integer(i)
}

fn list(items: &[i64]) -> LuaValue {
    let mut t = LuaTable::default();
    for i in items {
        t.append(int(*i));
    }
    LuaValue::table(t)
}

#[test]
fn test_assert() {
    let vm = new_vm();
    assert_eq!(call(&vm, "assert", vec![int(1), s("m")]).unwrap(), vec![int(1), s("m")]);
    assert_eq!(call_err(&vm, "assert", vec![LuaValue::Boolean(false)]), "assertion failed!");
    assert_eq!(call_err(&vm, "assert", vec![LuaValue::Nil, s("custom")]), "custom");
    assert_eq!(
        call_err(&vm, "assert", vec![]),
        "bad argument #1 to 'assert' (value expected)"
    );
}

#[test]
fn test_select() {
    let vm = new_vm();
    let abc = || vec![s("a"), s("b"), s("c")];
    let with = |sel: LuaValue| {
        let mut args = vec![sel];
        args.extend(abc());
        args
    };
    assert_eq!(call(&vm, "select", with(s("#"))).unwrap(), vec![int(3)]);
    assert_eq!(call(&vm, "select", with(int(2))).unwrap(), vec![s("b"), s("c")]);
    assert_eq!(call(&vm, "select", with(int(-1))).unwrap(), vec![s("c")]);
    assert_eq!(call(&vm, "select", with(int(9))).unwrap(), vec![]);
    assert_eq!(
        call_err(&vm, "select", with(int(0))),
        "bad argument #1 to 'select' (index out of range)"
    );
    assert_eq!(
        call_err(&vm, "select", with(s("x"))),
        "bad argument #1 to 'select' (number expected, got string)"
    );
}

#[test]
fn test_tonumber() {
    let vm = new_vm();
    let tonumber = |args: Vec<LuaValue>| call(&vm, "tonumber", args).unwrap();
    assert_eq!(tonumber(vec![s("10")]), vec![int(10)]);
    assert_eq!(tonumber(vec![s(" 0x1F ")]), vec![int(31)]);
    assert_eq!(tonumber(vec![s("2.5")]), vec![LuaValue::Float(2.5)]);
    assert_eq!(tonumber(vec![int(7)]), vec![int(7)]);
    assert_eq!(tonumber(vec![s("abc")]), vec![LuaValue::Nil]);
    assert_eq!(tonumber(vec![LuaValue::Boolean(true)]), vec![LuaValue::Nil]);
    assert_eq!(tonumber(vec![s("ff"), int(16)]), vec![int(255)]);
    assert_eq!(tonumber(vec![s("z"), int(36)]), vec![int(35)]);
    assert_eq!(tonumber(vec![s("-101"), int(2)]), vec![int(-5)]);
    assert_eq!(tonumber(vec![s("8"), int(8)]), vec![LuaValue::Nil]);
    assert_eq!(
        call_err(&vm, "tonumber", vec![s("1"), int(99)]),
        "bad argument #2 to 'tonumber' (base out of range)"
    );
}

#[test]
fn test_type_and_tostring() {
    let vm = new_vm();
    assert_eq!(call(&vm, "type", vec![LuaValue::Nil]).unwrap(), vec![s("nil")]);
    assert_eq!(call(&vm, "type", vec![int(1)]).unwrap(), vec![s("number")]);
    assert_eq!(call(&vm, "type", vec![vm.get_global("type")]).unwrap(), vec![s("function")]);
    assert_eq!(
        call_err(&vm, "type", vec![]),
        "bad argument #1 to 'type' (value expected)"
    );
    assert_eq!(call(&vm, "tostring", vec![int(12)]).unwrap(), vec![s("12")]);
    assert_eq!(call(&vm, "tostring", vec![LuaValue::Float(1.5)]).unwrap(), vec![s("1.5")]);
    assert_eq!(call(&vm, "tostring", vec![LuaValue::Nil]).unwrap(), vec![s("nil")]);
    assert_eq!(vm.get_global("_VERSION"), s("Lua 5.1"));
}

#[test]
fn test_global_table_names_itself() {
    let vm = new_vm();
    let g = vm.get_global("_G");
    assert!(g.raw_equal(&LuaValue::Table(vm.globals())));
    let g = g.as_table().unwrap().clone();
    assert!(g.borrow().get_str("print").is_function());
    g.borrow_mut().set_str("answer", int(42));
    assert_eq!(vm.get_global("answer"), int(42));
}

fn always_seven(_l: &mut LuaThread, _args: MultiValue) -> LuaResult<MultiValue> {
    Ok(MultiValue::single(LuaValue::Integer(7)))
}

#[test]
fn test_raw_access() {
    let vm = new_vm();
    let t = LuaValue::new_table();
    let mt = LuaValue::new_table();
    mt.as_table().unwrap().borrow_mut().set_str("__index", host("index", always_seven));
    call(&vm, "setmetatable", vec![t.clone(), mt]).unwrap();

    assert_eq!(call(&vm, "rawget", vec![t.clone(), s("x")]).unwrap(), vec![LuaValue::Nil]);
    let r = call(&vm, "rawset", vec![t.clone(), s("x"), int(1)]).unwrap();
    assert_eq!(r, vec![t.clone()]);
    assert_eq!(call(&vm, "rawget", vec![t.clone(), s("x")]).unwrap(), vec![int(1)]);
    assert_eq!(
        call_err(&vm, "rawset", vec![t.clone(), LuaValue::Nil, int(1)]),
        "table index is nil"
    );
    assert_eq!(
        call_err(&vm, "rawget", vec![int(1), s("x")]),
        "bad argument #1 to 'rawget' (table expected, got number)"
    );

    let other = LuaValue::new_table();
    assert_eq!(
        call(&vm, "rawequal", vec![t.clone(), t.clone()]).unwrap(),
        vec![LuaValue::Boolean(true)]
    );
    assert_eq!(
        call(&vm, "rawequal", vec![t, other]).unwrap(),
        vec![LuaValue::Boolean(false)]
    );
}

#[test]
fn test_metatable_functions() {
    let vm = new_vm();
    let t = LuaValue::new_table();
    assert_eq!(call(&vm, "getmetatable", vec![t.clone()]).unwrap(), vec![LuaValue::Nil]);
    assert_eq!(call(&vm, "getmetatable", vec![s("str")]).unwrap(), vec![LuaValue::Nil]);

    let mt = LuaValue::new_table();
    let r = call(&vm, "setmetatable", vec![t.clone(), mt.clone()]).unwrap();
    assert_eq!(r, vec![t.clone()]);
    assert_eq!(call(&vm, "getmetatable", vec![t.clone()]).unwrap(), vec![mt.clone()]);

    assert_eq!(
        call_err(&vm, "setmetatable", vec![t.clone(), int(5)]),
        "bad argument #2 to 'setmetatable' (nil or table expected)"
    );
    assert_eq!(
        call_err(&vm, "setmetatable", vec![int(5), mt.clone()]),
        "bad argument #1 to 'setmetatable' (table expected, got number)"
    );

    // a __metatable field hides and locks the metatable
    mt.as_table().unwrap().borrow_mut().set_str("__metatable", s("locked"));
    assert_eq!(call(&vm, "getmetatable", vec![t.clone()]).unwrap(), vec![s("locked")]);
    assert_eq!(
        call_err(&vm, "setmetatable", vec![t.clone(), LuaValue::Nil]),
        "cannot change a protected metatable"
    );
}

#[test]
fn test_unpack() {
    let vm = new_vm();
    let t = list(&[1, 2, 3]);
    assert_eq!(call(&vm, "unpack", vec![t.clone()]).unwrap(), vec![int(1), int(2), int(3)]);
    assert_eq!(call(&vm, "unpack", vec![t.clone(), int(2)]).unwrap(), vec![int(2), int(3)]);
    assert_eq!(
        call(&vm, "unpack", vec![t.clone(), int(2), int(5)]).unwrap(),
        vec![int(2), int(3), LuaValue::Nil, LuaValue::Nil]
    );
    assert_eq!(call(&vm, "unpack", vec![t.clone(), int(3), int(2)]).unwrap(), vec![]);
    assert_eq!(
        call_err(&vm, "unpack", vec![t, int(1), int(1_000_000)]),
        "too many results to unpack"
    );
}

#[test]
fn test_next_and_pairs() {
    let vm = new_vm();
    let t = LuaValue::new_table();
    assert_eq!(call(&vm, "next", vec![t.clone()]).unwrap(), vec![LuaValue::Nil]);

    {
        let mut table = t.as_table().unwrap().borrow_mut();
        table.set_int(1, int(10));
        table.set_str("a", int(1));
        table.set_str("b", int(2));
    }

    let iter = call(&vm, "pairs", vec![t.clone()]).unwrap();
    assert_eq!(iter.len(), 3);
    assert_eq!(iter[1], t);
    assert_eq!(iter[2], LuaValue::Nil);

    let mut seen = Vec::new();
    let mut key = LuaValue::Nil;
    loop {
        let r = vm
            .call_function(&iter[0], MultiValue::two(t.clone(), key.clone()))
            .unwrap()
            .all_values();
        if r[0].is_nil() {
            break;
        }
        seen.push(r[0].clone());
        key = r[0].clone();
    }
    assert_eq!(seen.len(), 3);
    // the array part comes first
    assert_eq!(seen[0], int(1));

    assert_eq!(
        call_err(&vm, "next", vec![t, s("missing")]),
        "invalid key to 'next'"
    );
}

#[test]
fn test_ipairs() {
    let vm = new_vm();
    let t = list(&[5, 6]);
    let iter = call(&vm, "ipairs", vec![t.clone()]).unwrap();
    assert_eq!(iter[2], int(0));

    let step = |i: i64| {
        vm.call_function(&iter[0], MultiValue::two(t.clone(), int(i)))
            .unwrap()
            .all_values()
    };
    assert_eq!(step(0), vec![int(1), int(5)]);
    assert_eq!(step(1), vec![int(2), int(6)]);
    assert_eq!(step(2), vec![]);
}

#[test]
fn test_pcall() {
    let vm = new_vm();
    let r = call(&vm, "pcall", vec![vm.get_global("select"), s("#"), int(1), int(2)]).unwrap();
    assert_eq!(r, vec![LuaValue::Boolean(true), int(2)]);

    let r = call(&vm, "pcall", vec![LuaValue::Nil]).unwrap();
    assert_eq!(r, vec![LuaValue::Boolean(false), s("attempt to call a nil value")]);

    let r = call(&vm, "pcall", vec![vm.get_global("error"), s("plain"), int(0)]).unwrap();
    assert_eq!(r, vec![LuaValue::Boolean(false), s("plain")]);
}

fn bad_tostring(_l: &mut LuaThread, _args: MultiValue) -> LuaResult<MultiValue> {
    Ok(MultiValue::single(LuaValue::Integer(1)))
}

#[test]
fn test_print() {
    let vm = new_vm();
    assert_eq!(call(&vm, "print", vec![s("hello"), int(1)]).unwrap(), vec![]);

    let t = LuaValue::new_table();
    let mt = LuaValue::new_table();
    mt.as_table().unwrap().borrow_mut().set_str("__tostring", host("tostring", bad_tostring));
    call(&vm, "setmetatable", vec![t.clone(), mt]).unwrap();
    assert_eq!(
        call_err(&vm, "print", vec![t]),
        "'tostring' must return a string to 'print'"
    );
}

#[test]
fn test_partial_stdlib() {
    let vm = LuaVM::new(SafeOption::default());
    vm.open_stdlib(Stdlib::Basic).unwrap();
    assert!(vm.get_global("pcall").is_function());
    assert!(vm.get_global("coroutine").is_nil());

    let vm = LuaVM::new(SafeOption::default());
    vm.open_stdlib(Stdlib::Coroutine).unwrap();
    assert!(vm.get_global("pcall").is_nil());
    assert!(vm.get_global("coroutine").is_table());
}
