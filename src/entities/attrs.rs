//! Node parameter storage.
//!
//! Every graph node keeps its knobs in an `Attrs` map. The map is also the
//! node's content fingerprint: `hash_all()` walks keys in sorted order so two
//! nodes with equal parameters hash equally regardless of insertion order.
//! Floats hash via `to_bits`, so `-0.0` and `0.0` are distinct parameters.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// Typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Str(String),
    Int(i32),
    Float(f32),
    /// RGBA colour or any four-component knob.
    Color([f32; 4]),
}

impl Hash for AttrValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use AttrValue::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Bool(v) => v.hash(state),
            Str(v) => v.hash(state),
            Int(v) => v.hash(state),
            Float(v) => v.to_bits().hash(state),
            Color(c) => c.iter().for_each(|f| f.to_bits().hash(state)),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<[f32; 4]> for AttrValue {
    fn from(v: [f32; 4]) -> Self {
        AttrValue::Color(v)
    }
}

/// Parameter container: string key to typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attrs {
    #[serde(default)]
    map: HashMap<String, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Builder form of `set`, handy when constructing nodes.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.map.insert(key.into(), value.into());
    }

    /// Set and report whether the stored value actually changed.
    pub fn set_if_changed(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> bool {
        let key = key.into();
        let value = value.into();
        if self.map.get(&key) == Some(&value) {
            return false;
        }
        self.map.insert(key, value);
        true
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.map.get(key) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.map.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f32> {
        match self.map.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            // ints are accepted where a float knob is expected
            Some(AttrValue::Int(v)) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.map.get(key) {
            Some(AttrValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_color(&self, key: &str) -> Option<[f32; 4]> {
        match self.map.get(key) {
            Some(AttrValue::Color(c)) => Some(*c),
            _ => None,
        }
    }

    pub fn get_i32_or(&self, key: &str, default: i32) -> i32 {
        self.get_i32(key).unwrap_or(default)
    }

    pub fn get_float_or(&self, key: &str, default: f32) -> f32 {
        self.get_float(key).unwrap_or(default)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.map.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.map.iter()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Hash everything except `exclude` keys, in sorted key order.
    ///
    /// Viewer-only knobs (exposure, zoom) are excluded by output nodes since
    /// they already travel in the cache key's render parameters.
    pub fn hash_excluding(&self, exclude: &[&str]) -> u64 {
        let exclude: HashSet<&str> = exclude.iter().copied().collect();
        let mut keys: Vec<&String> = self.map.keys().collect();
        keys.sort_unstable();

        let mut hasher = DefaultHasher::new();
        for key in keys {
            if exclude.contains(key.as_str()) {
                continue;
            }
            key.hash(&mut hasher);
            if let Some(val) = self.map.get(key) {
                val.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    pub fn hash_all(&self) -> u64 {
        self.hash_excluding(&[])
    }
}
