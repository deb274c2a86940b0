/// Serializer for converting Lua values to serde_json::Value
///
/// - nil -> null, booleans -> booleans, numbers -> numbers, strings -> strings
/// - tables with keys 1..n only -> arrays, other tables -> objects
/// - registered external objects -> `{"$external": name}`
/// - functions, threads, userdata and cyclic tables -> error
use ahash::AHashSet;
use serde_json::{Map, Number, Value as JsonValue};

use super::EXTERNAL_MARKER_KEY;
use crate::lua_value::{LuaTable, LuaValue, format_number};
use crate::persist::ExternalRefs;

/// Convert a Lua value to a serde_json::Value
pub fn to_value(lua_value: &LuaValue, refs: Option<&ExternalRefs>) -> Result<JsonValue, String> {
    let mut visited = AHashSet::new();
    to_value_internal(lua_value, refs, &mut visited)
}

/// Convert a Lua value to a JSON string
pub fn to_string(lua_value: &LuaValue, pretty: bool) -> Result<String, String> {
    let json_value = to_value(lua_value, None)?;
    let text = if pretty {
        serde_json::to_string_pretty(&json_value)
    } else {
        serde_json::to_string(&json_value)
    };
    text.map_err(|e| format!("Failed to serialize to JSON: {}", e))
}

fn to_value_internal(
    lua_value: &LuaValue,
    refs: Option<&ExternalRefs>,
    visited: &mut AHashSet<usize>,
) -> Result<JsonValue, String> {
    if let Some(marker) = refs.and_then(|r| r.marker(lua_value)) {
        let mut object = Map::new();
        object.insert(EXTERNAL_MARKER_KEY.to_string(), JsonValue::String(marker.name));
        return Ok(JsonValue::Object(object));
    }

    match lua_value {
        LuaValue::Nil => Ok(JsonValue::Null),
        LuaValue::Boolean(b) => Ok(JsonValue::Bool(*b)),
        LuaValue::Integer(i) => Ok(JsonValue::Number(Number::from(*i))),
        LuaValue::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| format!("Invalid number: {}", format_number(*f))),
        LuaValue::String(s) => Ok(JsonValue::String(s.to_string())),
        LuaValue::Table(t) => {
            let ptr_addr = std::rc::Rc::as_ptr(t) as *const () as usize;
            if !visited.insert(ptr_addr) {
                return Err("Circular reference detected in table".to_string());
            }
            let table = t.borrow();
            let result = if is_array_like(&table) {
                table_to_json_array(&table, refs, visited)
            } else {
                table_to_json_object(&table, refs, visited)
            };
            visited.remove(&ptr_addr);
            result
        }
        other => Err(format!("Cannot serialize Lua {} to JSON", other.type_name())),
    }
}

/// Empty tables and tables whose keys are exactly 1..n.
fn is_array_like(table: &LuaTable) -> bool {
    let mut count = 0usize;
    for (key, _) in table.iter() {
        match key {
            LuaValue::Integer(i) if i >= 1 => count += 1,
            _ => return false,
        }
    }
    count == table.len()
}

fn table_to_json_array(
    table: &LuaTable,
    refs: Option<&ExternalRefs>,
    visited: &mut AHashSet<usize>,
) -> Result<JsonValue, String> {
    let len = table.len();
    let mut array = Vec::with_capacity(len);
    for i in 1..=len {
        array.push(to_value_internal(&table.get_int(i as i64), refs, visited)?);
    }
    Ok(JsonValue::Array(array))
}

fn table_to_json_object(
    table: &LuaTable,
    refs: Option<&ExternalRefs>,
    visited: &mut AHashSet<usize>,
) -> Result<JsonValue, String> {
    let mut object = Map::new();
    for (key, value) in table.iter() {
        let key_str = match &key {
            LuaValue::String(s) => s.to_string(),
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::Boolean(_) => key.to_raw_string(),
            _ => continue,
        };
        object.insert(key_str, to_value_internal(&value, refs, visited)?);
    }
    Ok(JsonValue::Object(object))
}
