// Tests for value construction, coercion and formatting
use crate::lua_value::{LuaValue, LuaValueKind, MultiValue, Prototype, format_number, parse_number};

#[test]
fn test_number_normalization() {
    assert!(matches!(LuaValue::number(3.0), LuaValue::Integer(3)));
    assert!(matches!(LuaValue::number(3.5), LuaValue::Float(f) if f == 3.5));
    assert!(matches!(LuaValue::number(-0.0), LuaValue::Float(f) if f.is_sign_negative()));
    assert!(matches!(LuaValue::number(1e300), LuaValue::Float(_)));
    assert!(matches!(LuaValue::number(f64::NAN), LuaValue::Float(f) if f.is_nan()));
    assert_eq!(LuaValue::number(2.0), LuaValue::Integer(2));
}

#[test]
fn test_type_names() {
    assert_eq!(LuaValue::Nil.type_name(), "nil");
    assert_eq!(LuaValue::Boolean(true).type_name(), "boolean");
    assert_eq!(LuaValue::Integer(1).type_name(), "number");
    assert_eq!(LuaValue::Float(0.5).type_name(), "number");
    assert_eq!(LuaValue::from("x").type_name(), "string");
    assert_eq!(LuaValue::new_table().type_name(), "table");
    assert_eq!(LuaValue::Integer(1).kind(), LuaValueKind::Number);
    assert_eq!(LuaValue::Float(0.5).kind(), LuaValueKind::Number);
}

#[test]
fn test_truthiness() {
    assert!(!LuaValue::Nil.is_truthy());
    assert!(!LuaValue::Boolean(false).is_truthy());
    assert!(LuaValue::Boolean(true).is_truthy());
    assert!(LuaValue::Integer(0).is_truthy());
    assert!(LuaValue::from("").is_truthy());
}

#[test]
fn test_raw_equality() {
    assert_eq!(LuaValue::Integer(1), LuaValue::Float(1.0));
    assert_ne!(LuaValue::Float(f64::NAN), LuaValue::Float(f64::NAN));
    assert_eq!(LuaValue::from("abc"), LuaValue::from(String::from("abc")));
    assert_ne!(LuaValue::from("1"), LuaValue::Integer(1));

    let t = LuaValue::new_table();
    assert_eq!(t, t.clone());
    assert_ne!(t, LuaValue::new_table());
}

#[test]
fn test_format_number() {
    assert_eq!(format_number(0.1), "0.1");
    assert_eq!(format_number(1.0 / 3.0), "0.33333333333333");
    assert_eq!(format_number(1e15), "1e+15");
    assert_eq!(format_number(1e-5), "1e-05");
    assert_eq!(format_number(123456.789), "123456.789");
    assert_eq!(format_number(f64::INFINITY), "inf");
    assert_eq!(format_number(-f64::INFINITY), "-inf");
    assert_eq!(format_number(-0.0), "-0");
    assert_eq!(format_number(2.5), "2.5");
}

#[test]
fn test_parse_number() {
    assert_eq!(parse_number("42"), Some(LuaValue::Integer(42)));
    assert_eq!(parse_number("  -7  "), Some(LuaValue::Integer(-7)));
    assert_eq!(parse_number("0x10"), Some(LuaValue::Integer(16)));
    assert_eq!(parse_number("1e2"), Some(LuaValue::Integer(100)));
    assert_eq!(parse_number("2.5"), Some(LuaValue::Float(2.5)));
    assert_eq!(parse_number(".5"), Some(LuaValue::Float(0.5)));
    assert_eq!(parse_number("abc"), None);
    assert_eq!(parse_number(""), None);
    assert_eq!(parse_number("1x"), None);
    assert_eq!(parse_number("0x"), None);
}

#[test]
fn test_string_coercion() {
    assert_eq!(LuaValue::from("10").to_number(), Some(LuaValue::Integer(10)));
    assert_eq!(LuaValue::Integer(5).to_str_coerce().unwrap().as_str(), "5");
    assert_eq!(LuaValue::Float(0.5).to_str_coerce().unwrap().as_str(), "0.5");
    assert!(LuaValue::Boolean(true).to_str_coerce().is_none());
    assert_eq!(LuaValue::from("3").to_integer(), Some(3));
    assert_eq!(LuaValue::Float(2.5).to_integer(), None);
}

#[test]
fn test_raw_string() {
    assert_eq!(LuaValue::Nil.to_raw_string(), "nil");
    assert_eq!(LuaValue::Boolean(false).to_raw_string(), "false");
    assert_eq!(LuaValue::Integer(-3).to_raw_string(), "-3");
    assert!(LuaValue::new_table().to_raw_string().starts_with("table: "));
}

#[test]
fn test_object_identity() {
    let t = LuaValue::new_table();
    assert_eq!(t.object_id(), t.clone().object_id());
    assert_ne!(t.object_id(), LuaValue::new_table().object_id());
    assert_eq!(LuaValue::Integer(1).object_id(), None);
    assert!(t.is_collectable());
    assert!(!LuaValue::from("s").is_collectable());
}

#[test]
fn test_multi_value() {
    let mut mv = MultiValue::empty();
    assert!(mv.is_empty());
    mv.push(LuaValue::Integer(1));
    assert_eq!(mv.len(), 1);
    mv.push(LuaValue::Integer(2));
    mv.extend(MultiValue::single(LuaValue::Integer(3)));
    assert_eq!(mv.len(), 3);
    assert_eq!(mv.arg(5), LuaValue::Nil);

    let mv = mv.prepend(LuaValue::Boolean(true));
    assert_eq!(mv.first(), Some(&LuaValue::Boolean(true)));
    let rest = mv.skip(2);
    assert_eq!(rest.all_values(), vec![LuaValue::Integer(2), LuaValue::Integer(3)]);
}

#[test]
fn test_chunk_id() {
    let id = |source: &str| {
        Prototype {
            source: source.into(),
            ..Default::default()
        }
        .chunk_id()
    };
    assert_eq!(id("=stdin"), "stdin");
    assert_eq!(id("@main.lua"), "main.lua");
    assert_eq!(id(""), "?");
    assert_eq!(id("x = 1"), "[string \"x = 1\"]");
    assert_eq!(id("x = 1\ny = 2"), "[string \"x = 1...\"]");

    let long_path = format!("@{}/main.lua", "d".repeat(80));
    let short = id(&long_path);
    assert!(short.starts_with("...") && short.ends_with("/main.lua"));
    assert_eq!(short.chars().count(), 59);
    assert_eq!(id(&format!("={}", "n".repeat(80))).len(), 59);
}
