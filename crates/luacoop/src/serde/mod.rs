/// JSON view of plain Lua data
///
/// Tables of numbers, strings, booleans and nested tables convert to and
/// from `serde_json::Value`. Objects registered in `ExternalRefs` are written
/// as `{"$external": name}` markers and resolved back on the way in.
mod deserializer;
mod serializer;

pub use deserializer::{from_str as deserialize_from_json_str, from_value as deserialize_from_json};
pub use serializer::{to_string as serialize_to_json_string, to_value as serialize_to_json};

use crate::lua_value::LuaValue;
use crate::persist::ExternalRefs;

/// Key of the object that marks an external reference.
pub const EXTERNAL_MARKER_KEY: &str = "$external";

/// Convert a Lua value to a serde_json::Value
pub fn lua_to_json(lua_value: &LuaValue) -> Result<serde_json::Value, String> {
    serialize_to_json(lua_value, None)
}

/// Convert a Lua value to JSON, writing registered objects as markers
pub fn lua_to_json_with_refs(
    lua_value: &LuaValue,
    refs: &ExternalRefs,
) -> Result<serde_json::Value, String> {
    serialize_to_json(lua_value, Some(refs))
}

/// Convert a Lua value to a JSON string
pub fn lua_to_json_string(lua_value: &LuaValue, pretty: bool) -> Result<String, String> {
    serialize_to_json_string(lua_value, pretty)
}

/// Convert a serde_json::Value to a Lua value
pub fn json_to_lua(json_value: &serde_json::Value) -> Result<LuaValue, String> {
    deserialize_from_json(json_value, None)
}

/// Convert JSON to a Lua value, resolving external markers through `refs`
pub fn json_to_lua_with_refs(
    json_value: &serde_json::Value,
    refs: &ExternalRefs,
) -> Result<LuaValue, String> {
    deserialize_from_json(json_value, Some(refs))
}

/// Convert a JSON string to a Lua value
pub fn json_string_to_lua(json_str: &str) -> Result<LuaValue, String> {
    deserialize_from_json_str(json_str)
}
