// Hash-part slots
//
// A slot holds its key and value either strongly or weakly depending on the
// table's weak mode. Removing a key leaves a `Dead` slot behind so `next`
// can still step past it during traversal.

use crate::lua_value::{LuaValue, Referent, WeakValue};

use super::WeakMode;

pub(crate) enum Slot {
    Normal { key: LuaValue, value: LuaValue },
    WeakKey { key: WeakValue, value: LuaValue },
    WeakValue { key: LuaValue, value: WeakValue },
    WeakPair { key: WeakValue, value: WeakValue },
    Dead { key: WeakValue },
}

impl Slot {
    pub fn new(key: LuaValue, value: LuaValue, mode: WeakMode) -> Slot {
        match (mode.keys, mode.values) {
            (false, false) => Slot::Normal { key, value },
            (true, false) => Slot::WeakKey {
                key: WeakValue::new(&key),
                value,
            },
            (false, true) => Slot::WeakValue {
                value: WeakValue::new(&value),
                key,
            },
            (true, true) => Slot::WeakPair {
                key: WeakValue::new(&key),
                value: WeakValue::new(&value),
            },
        }
    }

    fn parts(&self) -> Option<(&dyn Referent, &dyn Referent)> {
        match self {
            Slot::Normal { key, value } => Some((key, value)),
            Slot::WeakKey { key, value } => Some((key, value)),
            Slot::WeakValue { key, value } => Some((key, value)),
            Slot::WeakPair { key, value } => Some((key, value)),
            Slot::Dead { .. } => None,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Slot::Dead { .. })
    }

    /// Live key/value pair, `None` for dead slots or vanished referents.
    pub fn first(&self) -> Option<(LuaValue, LuaValue)> {
        let (key, value) = self.parts()?;
        Some((key.first()?, value.first()?))
    }

    /// A non-dead slot whose weak key or value has been dropped.
    pub fn is_vanished(&self) -> bool {
        match self.parts() {
            Some((key, value)) => !key.is_present() || !value.is_present(),
            None => false,
        }
    }

    pub fn holds_key(&self, key: &LuaValue) -> bool {
        match self {
            Slot::Dead { key: k } => k.matches(key),
            _ => self.parts().is_some_and(|(k, _)| k.matches(key)),
        }
    }

    /// Replace the value in place, keeping the key's strength.
    pub fn set_value(&mut self, new_value: LuaValue) {
        match self {
            Slot::Normal { value, .. } | Slot::WeakKey { value, .. } => *value = new_value,
            Slot::WeakValue { value, .. } | Slot::WeakPair { value, .. } => {
                *value = WeakValue::new(&new_value)
            }
            Slot::Dead { .. } => {}
        }
    }

    /// Turn this slot into a tombstone that still recognises its key.
    pub fn kill(&mut self) {
        let key = match self {
            Slot::Normal { key, .. } | Slot::WeakValue { key, .. } => WeakValue::new(key),
            Slot::WeakKey { key, .. } | Slot::WeakPair { key, .. } => key.clone(),
            Slot::Dead { .. } => return,
        };
        *self = Slot::Dead { key };
    }
}
