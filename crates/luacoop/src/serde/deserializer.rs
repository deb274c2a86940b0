/// Deserializer for converting serde_json::Value to Lua values
///
/// - null -> nil, booleans -> booleans, strings -> strings
/// - numbers -> integers when they fit, floats otherwise
/// - arrays -> tables keyed 1..n, objects -> tables keyed by string
/// - `{"$external": name}` -> the object registered under `name`
use serde_json::Value as JsonValue;

use super::EXTERNAL_MARKER_KEY;
use crate::lua_value::{LuaTable, LuaValue};
use crate::persist::{ExternalRef, ExternalRefs};

/// Convert a serde_json::Value to a Lua value
pub fn from_value(json_value: &JsonValue, refs: Option<&ExternalRefs>) -> Result<LuaValue, String> {
    match json_value {
        JsonValue::Null => Ok(LuaValue::Nil),
        JsonValue::Bool(b) => Ok(LuaValue::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(LuaValue::number(f))
            } else {
                Err("Invalid JSON number".to_string())
            }
        }
        JsonValue::String(s) => Ok(LuaValue::from(s.as_str())),
        JsonValue::Array(arr) => json_array_to_lua_table(arr, refs),
        JsonValue::Object(obj) => json_object_to_lua_table(obj, refs),
    }
}

/// Convert a JSON string to a Lua value
pub fn from_str(json_str: &str) -> Result<LuaValue, String> {
    let json_value: JsonValue =
        serde_json::from_str(json_str).map_err(|e| format!("Failed to parse JSON: {}", e))?;
    from_value(&json_value, None)
}

fn json_array_to_lua_table(arr: &[JsonValue], refs: Option<&ExternalRefs>) -> Result<LuaValue, String> {
    let mut table = LuaTable::new(arr.len(), 0);
    for (i, item) in arr.iter().enumerate() {
        table.set_int(i as i64 + 1, from_value(item, refs)?);
    }
    Ok(LuaValue::table(table))
}

fn json_object_to_lua_table(
    obj: &serde_json::Map<String, JsonValue>,
    refs: Option<&ExternalRefs>,
) -> Result<LuaValue, String> {
    if let (Some(refs), 1, Some(JsonValue::String(name))) =
        (refs, obj.len(), obj.get(EXTERNAL_MARKER_KEY))
    {
        let marker = ExternalRef { name: name.clone() };
        return refs
            .resolve(&marker)
            .ok_or_else(|| format!("Unknown external reference '{}'", name));
    }

    let mut table = LuaTable::new(0, obj.len());
    for (key, value_json) in obj {
        table.set_str(key, from_value(value_json, refs)?);
    }
    Ok(LuaValue::table(table))
}
