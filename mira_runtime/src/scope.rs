//! Variable scope: a flat name-to-value binding table.

use rustc_hash::FxHashMap;

use crate::value::Value;

#[derive(Debug, Default, Clone)]
pub struct Scope {
    vars: FxHashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope::default()
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_owned(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    #[inline]
    pub fn is_defined(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let mut scope = Scope::new();
        assert!(!scope.is_defined("a"));
        scope.set("a", Value::Scalar(2.0));
        assert_eq!(scope.get("a"), Some(&Value::Scalar(2.0)));
        scope.set("a", Value::Bool(true));
        assert_eq!(scope.get("a"), Some(&Value::Bool(true)));
        assert_eq!(scope.remove("a"), Some(Value::Bool(true)));
        assert!(scope.get("a").is_none());
    }
}
