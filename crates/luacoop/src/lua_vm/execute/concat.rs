use crate::lua_value::{LuaValue, MultiValue};
use crate::lua_vm::execute::TmKind;
use crate::lua_vm::{LuaResult, LuaThread};

impl LuaThread {
    /// Concatenate `values` right to left. Runs of strings and numbers are
    /// joined in one step; anything else goes through `__concat` pairwise.
    pub fn concat(&mut self, mut values: Vec<LuaValue>) -> LuaResult<LuaValue> {
        if values.is_empty() {
            return Ok(LuaValue::from(""));
        }
        while values.len() > 1 {
            let n = values.len();
            let (a, b) = (&values[n - 2], &values[n - 1]);
            if a.to_str_coerce().is_none() || b.to_str_coerce().is_none() {
                let (a, b) = (a.clone(), b.clone());
                let mut tm = self.metamethod(&a, TmKind::Concat);
                if tm.is_nil() {
                    tm = self.metamethod(&b, TmKind::Concat);
                }
                if tm.is_nil() {
                    let culprit = if a.to_str_coerce().is_some() { &b } else { &a };
                    return Err(self.type_error(culprit, "concatenate"));
                }
                let result = self.call_metamethod(&tm, MultiValue::two(a, b))?;
                values.truncate(n - 2);
                values.push(result);
                continue;
            }

            // collect the longest run of coercible values ending at the top
            let mut start = n - 2;
            while start > 0 && values[start - 1].to_str_coerce().is_some() {
                start -= 1;
            }
            let mut joined = String::new();
            for v in &values[start..] {
                if let Some(s) = v.to_str_coerce() {
                    joined.push_str(&s);
                }
            }
            values.truncate(start);
            values.push(LuaValue::from(joined));
        }
        Ok(values.pop().unwrap_or_default())
    }
}
