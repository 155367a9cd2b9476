use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::DataCodec;
use crate::error::HookError;
use crate::value::{Object, Value};

/// Substitution hook: replaces a logical value with the surrogate that is
/// actually written.
pub type SubstituteFn = Arc<dyn Fn(&Object) -> Result<Value, HookError> + Send + Sync>;

/// Restoring hook: turns a freshly decoded object back into its logical value.
pub type RestoreFn = Arc<dyn Fn(Object) -> Result<Value, HookError> + Send + Sync>;

/// Runtime type of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    /// A registered record type.
    Named(Arc<str>),
}

impl TypeKey {
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        TypeKey::Named(name.into())
    }

    /// Returns the runtime type of `value`, or `None` for `Null`.
    pub fn of(value: &Value) -> Option<TypeKey> {
        Some(match value {
            Value::Null => return None,
            Value::Bool(_) => TypeKey::Bool,
            Value::Int(_) => TypeKey::Int,
            Value::Float(_) => TypeKey::Float,
            Value::Str(_) => TypeKey::Str,
            Value::Bytes(_) => TypeKey::Bytes,
            Value::List(_) => TypeKey::List,
            Value::Object(o) => o.type_key(),
        })
    }

    pub fn is_named(&self) -> bool {
        matches!(self, TypeKey::Named(_))
    }

    pub fn name(&self) -> &str {
        match self {
            TypeKey::Bool => "bool",
            TypeKey::Int => "int",
            TypeKey::Float => "float",
            TypeKey::Str => "str",
            TypeKey::Bytes => "bytes",
            TypeKey::List => "list",
            TypeKey::Named(name) => name,
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the display name of a value's runtime type (`null` for `Null`).
pub(crate) fn type_name_of(value: &Value) -> String {
    TypeKey::of(value).map_or_else(|| "null".to_string(), |k| k.to_string())
}

/// Declared type of a record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Any value; the concrete type is written alongside it.
    Any,
    /// Values of exactly this type (or null); no type descriptor on the wire.
    Exact(TypeKey),
}

/// Declaration of a named record type.
///
/// # Example
///
/// ```
/// use isomer_core::{FieldType, TypeDef, TypeKey, Value};
///
/// let leaf = TypeDef::new("Leaf")
///     .field("x", FieldType::Exact(TypeKey::Int))
///     .with_substitute(|leaf| Ok(leaf.get("x").unwrap_or(Value::Null)));
/// assert!(leaf.substitute_hook().is_some());
/// assert!(leaf.restore_hook().is_none());
/// ```
#[derive(Clone)]
pub struct TypeDef {
    name: Arc<str>,
    fields: IndexMap<String, FieldType>,
    substitute: Option<SubstituteFn>,
    restore: Option<RestoreFn>,
    codec: Option<Arc<dyn DataCodec>>,
    id: Option<u32>,
}

impl TypeDef {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        TypeDef {
            name: name.into(),
            fields: IndexMap::new(),
            substitute: None,
            restore: None,
            codec: None,
            id: None,
        }
    }

    /// Adds a field. Redeclaring a field replaces its type but keeps its position.
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    pub fn with_substitute<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Object) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.substitute = Some(Arc::new(hook));
        self
    }

    pub fn with_restore<F>(mut self, hook: F) -> Self
    where
        F: Fn(Object) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.restore = Some(Arc::new(hook));
        self
    }

    /// Replaces the default structural codec with a hand-written one.
    pub fn with_codec(mut self, codec: Arc<dyn DataCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Pins the wire id instead of taking the next free one.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> TypeKey {
        TypeKey::Named(Arc::clone(&self.name))
    }

    pub fn fields(&self) -> &IndexMap<String, FieldType> {
        &self.fields
    }

    pub fn substitute_hook(&self) -> Option<&SubstituteFn> {
        self.substitute.as_ref()
    }

    pub fn restore_hook(&self) -> Option<&RestoreFn> {
        self.restore.as_ref()
    }

    pub fn custom_codec(&self) -> Option<&Arc<dyn DataCodec>> {
        self.codec.as_ref()
    }

    pub fn pinned_id(&self) -> Option<u32> {
        self.id
    }

    pub(crate) fn set_codec(&mut self, codec: Arc<dyn DataCodec>) {
        self.codec = Some(codec);
    }
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDef")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("substitute", &self.substitute.is_some())
            .field("restore", &self.restore.is_some())
            .field("custom_codec", &self.codec.is_some())
            .field("id", &self.id)
            .finish()
    }
}
