use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::types::TypeKey;

/// A dynamically typed value in an object graph.
///
/// Only [`Object`] carries identity. Equality on objects is identity; use
/// [`Value::structural_eq`] to compare whole graphs.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Object(Object),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the runtime type of this value, or `None` for `Null`.
    pub fn type_key(&self) -> Option<TypeKey> {
        TypeKey::of(self)
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Compares two graphs by shape and content.
    ///
    /// Objects are equal when their types and fields are; a pair of objects
    /// already under comparison is assumed equal, so cyclic graphs terminate.
    pub fn structural_eq(&self, other: &Value) -> bool {
        structural_eq(self, other, &mut HashSet::new())
    }
}

fn structural_eq(a: &Value, b: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| structural_eq(x, y, seen))
        }
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) || !seen.insert((x.addr(), y.addr())) {
                return true;
            }
            if x.type_name() != y.type_name() {
                return false;
            }
            let xf = x.fields();
            let yf = y.fields();
            xf.len() == yf.len()
                && xf.iter().all(|(name, xv)| {
                    yf.get(name)
                        .is_some_and(|yv| structural_eq(xv, yv, seen))
                })
        }
        _ => a == b,
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

struct ObjectData {
    type_name: Arc<str>,
    fields: RefCell<IndexMap<String, Value>>,
}

/// A shared, mutable record of a named type.
///
/// Cloning an `Object` clones the handle, not the record. Fields are
/// interior-mutable so a decoder can publish an object before filling it,
/// which is how cycles are reconstructed.
#[derive(Clone)]
pub struct Object(Rc<ObjectData>);

impl Object {
    pub fn new(type_name: impl Into<Arc<str>>) -> Self {
        Object(Rc::new(ObjectData {
            type_name: type_name.into(),
            fields: RefCell::new(IndexMap::new()),
        }))
    }

    /// Builder-style field assignment.
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    pub fn type_key(&self) -> TypeKey {
        TypeKey::Named(Arc::clone(&self.0.type_name))
    }

    /// Returns a copy of the field value (objects are returned as handles).
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.fields.borrow().get(name).cloned()
    }

    /// Sets a field, returning the previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.fields.borrow_mut().insert(name.into(), value.into())
    }

    pub fn field_names(&self) -> Vec<String> {
        self.0.fields.borrow().keys().cloned().collect()
    }

    /// Snapshot of all fields in insertion order.
    pub fn fields(&self) -> IndexMap<String, Value> {
        self.0.fields.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared record; stable while any handle is alive.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// Renders nested objects as `<Type@addr>` so cyclic graphs can be printed.
struct Shallow<'a>(&'a Value);

impl fmt::Debug for Shallow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Object(o) => write!(f, "<{}@{:#x}>", o.type_name(), o.addr()),
            Value::List(items) => f.debug_list().entries(items.iter().map(Shallow)).finish(),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(fields) = self.0.fields.try_borrow() else {
            return write!(f, "<{}@{:#x}>", self.type_name(), self.addr());
        };
        let mut s = f.debug_struct(self.type_name());
        for (name, value) in fields.iter() {
            s.field(name, &Shallow(value));
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_equality_is_identity() {
        let a = Object::new("Leaf").with("x", 1i64);
        let b = Object::new("Leaf").with("x", 1i64);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(Value::from(a).structural_eq(&Value::from(b)));
    }

    #[test]
    fn structural_eq_handles_cycles() {
        let a = Object::new("Node");
        a.set("next", a.clone());
        let b = Object::new("Node");
        b.set("next", b.clone());
        assert!(Value::from(a).structural_eq(&Value::from(b)));
    }

    #[test]
    fn structural_eq_detects_differences() {
        let a = Object::new("Leaf").with("x", 1i64);
        let b = Object::new("Leaf").with("x", 2i64);
        let c = Object::new("Other").with("x", 1i64);
        assert!(!Value::from(a.clone()).structural_eq(&Value::from(b)));
        assert!(!Value::from(a).structural_eq(&Value::from(c)));
    }

    #[test]
    fn debug_of_cyclic_object_terminates() {
        let a = Object::new("Node").with("label", "root");
        a.set("children", vec![Value::from(a.clone())]);
        let rendered = format!("{:?}", a);
        assert!(rendered.starts_with("Node"));
        assert!(rendered.contains("<Node@"));
    }

    #[test]
    fn set_returns_previous() {
        let o = Object::new("Leaf");
        assert_eq!(o.set("x", 1i64), None);
        assert_eq!(o.set("x", 2i64), Some(Value::Int(1)));
        assert_eq!(o.get("x"), Some(Value::Int(2)));
        assert_eq!(o.field_names(), vec!["x".to_string()]);
    }
}
