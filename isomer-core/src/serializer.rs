//! Serializer for types that define substitution or restoring hooks.
//!
//! Every value it writes starts with a one-byte [`Tag`]. `Original` is
//! followed by the payload of the declared type. The two `Replaced` tags
//! are followed by the surrogate behind its own reference flag, so the
//! surrogate takes part in reference tracking like any other value.

use log::trace;
use std::sync::Arc;

use crate::cache::CacheEntry;
use crate::codec::{DataCodec, ReadContext, WriteContext};
use crate::directory::TypeDirectory;
use crate::error::{CodecError, Result};
use crate::hooks::HookProfile;
use crate::refs::{RefMark, Reservation};
use crate::types::{type_name_of, TypeKey};
use crate::value::{Object, Value};

/// Substitution outcome written ahead of a hooked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    /// No substitution; the declared type's payload follows.
    Original = 0,
    /// The surrogate is null or of another type; it is written with its
    /// type descriptor.
    ReplacedNewType = 1,
    /// The surrogate is a different object of the declared type.
    ReplacedSameType = 2,
}

impl TryFrom<u8> for Tag {
    type Error = CodecError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Tag::Original),
            1 => Ok(Tag::ReplacedNewType),
            2 => Ok(Tag::ReplacedSameType),
            other => Err(CodecError::protocol(format!("unknown substitution tag {other}"))),
        }
    }
}

/// [`DataCodec`] for one declared type with hooks.
///
/// Obtained through [`TypeDirectory::serializer`], which builds one per
/// hooked type and shares it between passes.
pub struct SubstitutionSerializer {
    declared: TypeKey,
    entry: Arc<CacheEntry>,
}

impl SubstitutionSerializer {
    pub fn new(directory: &TypeDirectory, declared: &TypeKey) -> Result<Self> {
        let entry = directory.method_cache().get_or_build(directory, declared)?;
        Ok(Self::from_entry(entry))
    }

    pub fn from_entry(entry: Arc<CacheEntry>) -> Self {
        SubstitutionSerializer {
            declared: entry.key().clone(),
            entry,
        }
    }

    pub fn declared_type(&self) -> &TypeKey {
        &self.declared
    }

    pub fn profile(&self) -> HookProfile {
        self.entry.profile()
    }

    fn classify(&self, original: &Object, surrogate: &Value) -> Tag {
        match surrogate {
            Value::Object(object) if object.ptr_eq(original) => Tag::Original,
            Value::Object(object) if object.type_key() == self.declared => Tag::ReplacedSameType,
            _ => Tag::ReplacedNewType,
        }
    }

    /// Decodes a payload of the declared type and restores it.
    fn read_declared(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let codec = self.entry.data_codec();
        match ctx.read_data(codec.as_ref())? {
            Value::Object(object) => self.entry.restore(object),
            other => Ok(other),
        }
    }
}

impl DataCodec for SubstitutionSerializer {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        let original = match value {
            Value::Object(object) if object.type_key() == self.declared => object,
            other => return Err(CodecError::mismatch(&self.declared, type_name_of(other))),
        };
        let codec = self.entry.data_codec();

        let surrogate = match self.entry.substitute(original)? {
            Some(surrogate) => surrogate,
            None => {
                ctx.buffer().write_u8(Tag::Original as u8);
                return ctx.write_data(codec.as_ref(), value);
            }
        };
        let tag = self.classify(original, &surrogate);
        trace!(
            "`{}` substituted by {} ({:?})",
            self.declared,
            type_name_of(&surrogate),
            tag
        );
        ctx.buffer().write_u8(tag as u8);
        if tag == Tag::Original {
            return ctx.write_data(codec.as_ref(), value);
        }

        let mark = ctx.write_ref_or_null(&surrogate)?;
        // Later occurrences of the original must resolve to the surrogate,
        // also when the surrogate itself was already known.
        ctx.repoint(original, &surrogate);
        if !mark.needs_payload() {
            return Ok(());
        }
        // The reader publishes an identity-less surrogate only once its
        // payload is complete, so the original must not appear inside it.
        let untracked = mark == RefMark::Untracked;
        if untracked {
            ctx.mark_unmaterialized(original);
        }
        let result = match tag {
            Tag::ReplacedNewType => ctx.write_non_ref(&surrogate),
            _ => ctx.write_data(codec.as_ref(), &surrogate),
        };
        if untracked {
            ctx.clear_unmaterialized(original);
        }
        result
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let tag = Tag::try_from(ctx.buffer().read_u8()?)?;
        trace!("reading `{}` with tag {:?}", self.declared, tag);
        if tag == Tag::Original {
            return self.read_declared(ctx);
        }

        let outer = ctx.last_pending_slot();
        let value = match ctx.try_reserve()? {
            Reservation::Resolved(value) => value,
            Reservation::Fresh(inner) => {
                let value = match tag {
                    Tag::ReplacedNewType => ctx.read_non_ref()?,
                    _ => self.read_declared(ctx)?,
                };
                ctx.publish(inner, value.clone());
                ctx.release(inner);
                value
            }
        };
        // Back-references may name either the original or the surrogate.
        ctx.publish(outer, value.clone());
        Ok(value)
    }
}

impl std::fmt::Debug for SubstitutionSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubstitutionSerializer")
            .field("declared", &self.declared)
            .field("profile", &self.entry.profile())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaMode;
    use crate::refs::{NOT_NULL_VALUE_FLAG, NULL_FLAG, REF_VALUE_FLAG};
    use crate::types::{FieldType, TypeDef};

    fn directory() -> TypeDirectory {
        let dir = TypeDirectory::new(SchemaMode::Strict);
        dir.register(
            TypeDef::new("Leaf")
                .field("x", FieldType::Exact(TypeKey::Int))
                .with_substitute(|leaf| {
                    Ok(match leaf.get("x") {
                        Some(Value::Int(0)) => Value::Null,
                        Some(Value::Int(1)) => Value::Object(leaf.clone()),
                        Some(Value::Int(2)) => Value::from(Object::new("Leaf").with("x", 20i64)),
                        _ => Value::Int(-1),
                    })
                }),
        )
        .unwrap();
        dir
    }

    fn encode(dir: &TypeDirectory, value: &Value) -> Vec<u8> {
        let mut w = WriteContext::new(dir, 64);
        w.write_ref(value).unwrap();
        w.into_bytes()
    }

    fn leaf(x: i64) -> Value {
        Value::from(Object::new("Leaf").with("x", x))
    }

    #[test]
    fn tag_bytes() {
        assert_eq!(Tag::try_from(0).unwrap(), Tag::Original);
        assert_eq!(Tag::try_from(1).unwrap(), Tag::ReplacedNewType);
        assert_eq!(Tag::try_from(2).unwrap(), Tag::ReplacedSameType);
        for byte in 3..=u8::MAX {
            assert!(matches!(
                Tag::try_from(byte),
                Err(CodecError::ProtocolViolation(_))
            ));
        }
    }

    #[test]
    fn identity_surrogate_is_original() {
        let dir = directory();
        let bytes = encode(&dir, &leaf(1));
        // flag, type id, tag
        assert_eq!(bytes[0], REF_VALUE_FLAG as u8);
        assert_eq!(bytes[2], Tag::Original as u8);
    }

    #[test]
    fn null_surrogate_is_new_type() {
        let dir = directory();
        let bytes = encode(&dir, &leaf(0));
        assert_eq!(bytes[2], Tag::ReplacedNewType as u8);
        assert_eq!(bytes[3], NULL_FLAG as u8);
        assert_eq!(bytes.len(), 4);

        let mut r = ReadContext::new(&dir, &bytes, 64);
        assert_eq!(r.read_ref().unwrap(), Value::Null);
    }

    #[test]
    fn other_type_surrogate_is_new_type() {
        let dir = directory();
        let bytes = encode(&dir, &leaf(9));
        assert_eq!(bytes[2], Tag::ReplacedNewType as u8);
        assert_eq!(bytes[3], NOT_NULL_VALUE_FLAG as u8);

        let mut r = ReadContext::new(&dir, &bytes, 64);
        assert_eq!(r.read_ref().unwrap(), Value::Int(-1));
    }

    #[test]
    fn same_type_surrogate_skips_descriptor() {
        let dir = directory();
        let bytes = encode(&dir, &leaf(2));
        assert_eq!(bytes[2], Tag::ReplacedSameType as u8);
        assert_eq!(bytes[3], REF_VALUE_FLAG as u8);

        let mut r = ReadContext::new(&dir, &bytes, 64);
        let out = r.read_ref().unwrap();
        assert_eq!(out.as_object().unwrap().get("x"), Some(Value::Int(20)));
        assert_eq!(r.buffer().remaining(), 0);
        assert_eq!(r.refs().len(), 2);
    }

    #[test]
    fn wrong_declared_type_is_rejected() {
        let dir = directory();
        let serializer = SubstitutionSerializer::new(&dir, &TypeKey::named("Leaf")).unwrap();
        let mut w = WriteContext::new(&dir, 64);
        assert!(matches!(
            serializer.write(&mut w, &Value::Int(3)),
            Err(CodecError::TypeMismatch { .. })
        ));
        assert_eq!(serializer.profile(), HookProfile::SubstituteOnly);
    }
}
