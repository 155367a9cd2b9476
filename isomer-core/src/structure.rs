//! Default codec for registered record types.
//!
//! In [`SchemaMode::Strict`] a record is a 4-byte schema fingerprint
//! followed by its fields in declaration order. In
//! [`SchemaMode::Evolving`] it is a field count followed by
//! `(name, value)` pairs, so peers may add or drop fields independently.

use log::debug;
use std::sync::Arc;

use crate::cache::CacheHandle;
use crate::codec::{DataCodec, ReadContext, WriteContext};
use crate::config::SchemaMode;
use crate::directory::TypeDirectory;
use crate::error::{CodecError, Result};
use crate::types::{type_name_of, FieldType, TypeDef, TypeKey};
use crate::value::{Object, Value};

#[derive(Debug)]
enum FieldKind {
    Any,
    Exact(CacheHandle),
}

#[derive(Debug)]
struct FieldSlot {
    name: String,
    kind: FieldKind,
}

/// Computes the schema fingerprint of a record layout.
///
/// Covers the type name and every field's name and declared type, in order.
pub fn fingerprint(def: &TypeDef) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(def.name().as_bytes());
    for (name, ty) in def.fields() {
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        match ty {
            FieldType::Any => hasher.update(b"*"),
            FieldType::Exact(key) => hasher.update(key.name().as_bytes()),
        };
    }
    let hash = hasher.finalize();
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Field-by-field codec derived from a [`TypeDef`].
#[derive(Debug)]
pub struct StructCodec {
    type_name: Arc<str>,
    mode: SchemaMode,
    fields: Vec<FieldSlot>,
    fingerprint: u32,
}

impl StructCodec {
    /// Lays out the codec for `def`.
    ///
    /// Exact fields only take forward cache handles here, so a type that
    /// refers to itself does not recurse into its own construction.
    pub fn new(directory: &TypeDirectory, def: &TypeDef) -> Self {
        let mode = directory.schema_mode();
        let fields = def
            .fields()
            .iter()
            .map(|(name, ty)| {
                let kind = match (mode, ty) {
                    (SchemaMode::Strict, FieldType::Exact(key)) => {
                        FieldKind::Exact(directory.method_cache().handle(key))
                    }
                    _ => FieldKind::Any,
                };
                FieldSlot {
                    name: name.clone(),
                    kind,
                }
            })
            .collect();
        StructCodec {
            type_name: Arc::from(def.name()),
            mode,
            fields,
            fingerprint: fingerprint(def),
        }
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    fn object<'v>(&self, value: &'v Value) -> Result<&'v Object> {
        match value {
            Value::Object(object) if object.type_name() == &*self.type_name => Ok(object),
            other => Err(CodecError::mismatch(&self.type_name, type_name_of(other))),
        }
    }

    fn write_strict(&self, ctx: &mut WriteContext<'_>, object: &Object) -> Result<()> {
        ctx.buffer().write_u32_le(self.fingerprint);
        for field in &self.fields {
            let value = object.get(&field.name).unwrap_or_default();
            match &field.kind {
                FieldKind::Any => ctx.write_ref(&value)?,
                FieldKind::Exact(handle) => {
                    if let Some(found) = TypeKey::of(&value) {
                        if &found != handle.key() {
                            return Err(CodecError::mismatch(handle.key(), found));
                        }
                    }
                    let codec = ctx.directory().resolve_serializer(handle)?;
                    ctx.write_ref_with(codec.as_ref(), &value)?;
                }
            }
        }
        Ok(())
    }

    fn write_evolving(&self, ctx: &mut WriteContext<'_>, object: &Object) -> Result<()> {
        ctx.buffer().write_var_u32(self.fields.len() as u32);
        for field in &self.fields {
            let value = object.get(&field.name).unwrap_or_default();
            ctx.buffer().write_str(&field.name);
            ctx.write_ref(&value)?;
        }
        Ok(())
    }

    fn read_strict(&self, ctx: &mut ReadContext<'_>, object: &Object) -> Result<()> {
        let remote = ctx.buffer().read_u32_le()?;
        if remote != self.fingerprint {
            return Err(CodecError::SchemaMismatch {
                type_name: self.type_name.to_string(),
                local: self.fingerprint,
                remote,
            });
        }
        for field in &self.fields {
            let value = match &field.kind {
                FieldKind::Any => ctx.read_ref()?,
                FieldKind::Exact(handle) => {
                    let codec = ctx.directory().resolve_serializer(handle)?;
                    ctx.read_ref_with(codec.as_ref())?
                }
            };
            object.set(field.name.clone(), value);
        }
        Ok(())
    }

    fn read_evolving(&self, ctx: &mut ReadContext<'_>, object: &Object) -> Result<()> {
        let count = ctx.buffer().read_var_u32()?;
        // A pair takes at least a name length byte and a flag byte.
        if count as usize > ctx.buffer().remaining() / 2 {
            return Err(CodecError::UnexpectedEof);
        }
        for _ in 0..count {
            let name = ctx.buffer().read_str()?;
            let value = ctx.read_ref()?;
            if self.fields.iter().any(|f| f.name == name) {
                object.set(name, value);
            } else {
                debug!("skipping unknown field `{}` of `{}`", name, self.type_name);
            }
        }
        Ok(())
    }
}

impl DataCodec for StructCodec {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        let object = self.object(value)?;
        match self.mode {
            SchemaMode::Strict => self.write_strict(ctx, object),
            SchemaMode::Evolving => self.write_evolving(ctx, object),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let object = Object::new(Arc::clone(&self.type_name));
        for field in &self.fields {
            object.set(field.name.clone(), Value::Null);
        }
        // Published before the fields so back-references from inside resolve.
        ctx.publish_pending(Value::Object(object.clone()));
        match self.mode {
            SchemaMode::Strict => self.read_strict(ctx, &object)?,
            SchemaMode::Evolving => self.read_evolving(ctx, &object)?,
        }
        Ok(Value::Object(object))
    }
}
