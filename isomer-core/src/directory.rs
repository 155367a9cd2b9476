use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::cache::{read, write, CacheEntry, CacheHandle, MethodCache};
use crate::codec::{DataCodec, PrimitiveCodec};
use crate::config::SchemaMode;
use crate::error::{CodecError, Result};
use crate::serializer::SubstitutionSerializer;
use crate::structure::StructCodec;
use crate::types::{TypeDef, TypeKey};

/// First wire id handed out to registered record types.
pub const FIRST_USER_ID: u32 = 64;

const BUILTINS: [(u32, TypeKey); 6] = [
    (1, TypeKey::Bool),
    (2, TypeKey::Int),
    (3, TypeKey::Float),
    (4, TypeKey::Str),
    (5, TypeKey::Bytes),
    (6, TypeKey::List),
];

fn builtin_id(key: &TypeKey) -> Option<u32> {
    BUILTINS.iter().find(|(_, k)| k == key).map(|(id, _)| *id)
}

fn builtin_key(id: u32) -> Option<TypeKey> {
    BUILTINS.iter().find(|(i, _)| *i == id).map(|(_, k)| k.clone())
}

#[derive(Default)]
struct Registry {
    defs: HashMap<Arc<str>, Arc<TypeDef>>,
    ids: HashMap<Arc<str>, u32>,
    names: HashMap<u32, Arc<str>>,
    next_id: u32,
}

impl Registry {
    fn name_of(&self, id: u32) -> Option<String> {
        builtin_key(id)
            .map(|k| k.to_string())
            .or_else(|| self.names.get(&id).map(|n| n.to_string()))
    }
}

/// Maps types to wire ids and hands out their codecs.
///
/// One directory is shared by every session and pass that must agree on
/// type ids. Both peers have to register the same types with the same ids,
/// either by registering in the same order or by pinning ids.
pub struct TypeDirectory {
    mode: SchemaMode,
    registry: RwLock<Registry>,
    cache: MethodCache,
    serializers: RwLock<HashMap<TypeKey, Arc<dyn DataCodec>>>,
}

impl TypeDirectory {
    pub fn new(mode: SchemaMode) -> Self {
        TypeDirectory {
            mode,
            registry: RwLock::new(Registry {
                next_id: FIRST_USER_ID,
                ..Registry::default()
            }),
            cache: MethodCache::new(),
            serializers: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.mode
    }

    pub fn method_cache(&self) -> &MethodCache {
        &self.cache
    }

    /// Registers a record type and returns its wire id.
    pub fn register(&self, def: TypeDef) -> Result<u32> {
        let mut reg = write(&self.registry);
        if reg.defs.contains_key(def.name()) {
            return Err(CodecError::DuplicateType(def.name().to_string()));
        }
        let id = match def.pinned_id() {
            Some(id) => {
                if let Some(existing) = reg.name_of(id) {
                    return Err(CodecError::DuplicateId { id, existing });
                }
                id
            }
            None => {
                while reg.name_of(reg.next_id).is_some() {
                    reg.next_id += 1;
                }
                reg.next_id
            }
        };
        if id >= reg.next_id {
            reg.next_id = id + 1;
        }

        let name: Arc<str> = Arc::from(def.name());
        debug!("registered type `{}` with id {}", name, id);
        reg.ids.insert(Arc::clone(&name), id);
        reg.names.insert(id, Arc::clone(&name));
        reg.defs.insert(name, Arc::new(def));
        Ok(id)
    }

    /// Installs a hand-written data codec for a registered type.
    ///
    /// If the type's cache entry is already built its codec is swapped in
    /// place. Passes that fetched the previous codec before the swap finish
    /// with it; this mirrors late codec compilation and is not synchronized
    /// further.
    pub fn register_codec(&self, name: &str, codec: Arc<dyn DataCodec>) -> Result<()> {
        {
            let mut reg = write(&self.registry);
            let def = reg
                .defs
                .get_mut(name)
                .ok_or_else(|| CodecError::Unregistered(name.to_string()))?;
            Arc::make_mut(def).set_codec(Arc::clone(&codec));
        }
        if let Some(entry) = self.cache.peek_key(&TypeKey::named(name)) {
            warn!(
                "replacing data codec of `{}` in place; passes in flight may still use the previous codec",
                name
            );
            entry.replace_data_codec(codec);
        }
        Ok(())
    }

    pub fn type_def(&self, name: &str) -> Option<Arc<TypeDef>> {
        read(&self.registry).defs.get(name).cloned()
    }

    pub fn type_id(&self, key: &TypeKey) -> Option<u32> {
        match key {
            TypeKey::Named(name) => read(&self.registry).ids.get(name).copied(),
            builtin => builtin_id(builtin),
        }
    }

    pub fn write_type_descriptor(&self, buf: &mut WriteBuffer, key: &TypeKey) -> Result<()> {
        let id = self
            .type_id(key)
            .ok_or_else(|| CodecError::Unregistered(key.to_string()))?;
        buf.write_var_u32(id);
        Ok(())
    }

    pub fn read_type_descriptor(&self, buf: &mut ReadBuffer<'_>) -> Result<TypeKey> {
        let id = buf.read_var_u32()?;
        if let Some(key) = builtin_key(id) {
            return Ok(key);
        }
        read(&self.registry)
            .names
            .get(&id)
            .map(|name| TypeKey::Named(Arc::clone(name)))
            .ok_or(CodecError::UnknownConcreteType(id))
    }

    /// Data codec of `key`, without substitution handling.
    pub fn data_codec(&self, key: &TypeKey) -> Result<Arc<dyn DataCodec>> {
        Ok(self.cache.get_or_build(self, key)?.data_codec())
    }

    /// Codec the generic read and write paths use for values of `key`.
    pub fn serializer(&self, key: &TypeKey) -> Result<Arc<dyn DataCodec>> {
        let entry = self.cache.get_or_build(self, key)?;
        self.serializer_for_entry(&entry)
    }

    /// Like [`serializer`](Self::serializer), through a forward handle.
    pub fn resolve_serializer(&self, handle: &CacheHandle) -> Result<Arc<dyn DataCodec>> {
        let entry = self.cache.resolve(self, handle)?;
        self.serializer_for_entry(&entry)
    }

    fn serializer_for_entry(&self, entry: &Arc<CacheEntry>) -> Result<Arc<dyn DataCodec>> {
        if entry.profile().is_none() {
            return Ok(entry.data_codec());
        }
        if let Some(codec) = read(&self.serializers).get(entry.key()) {
            return Ok(Arc::clone(codec));
        }
        let codec: Arc<dyn DataCodec> = Arc::new(SubstitutionSerializer::from_entry(Arc::clone(entry)));
        Ok(Arc::clone(
            write(&self.serializers)
                .entry(entry.key().clone())
                .or_insert(codec),
        ))
    }

    /// Builds the data codec a cache entry starts with.
    pub(crate) fn build_data_codec(&self, key: &TypeKey) -> Result<Arc<dyn DataCodec>> {
        let name = match key {
            TypeKey::Named(name) => name,
            builtin => {
                return PrimitiveCodec::for_key(builtin)
                    .map(|codec| Arc::new(codec) as Arc<dyn DataCodec>)
                    .ok_or_else(|| CodecError::CacheBuild {
                        type_name: builtin.to_string(),
                        reason: "no primitive codec".to_string(),
                    });
            }
        };
        let def = self.type_def(name).ok_or_else(|| CodecError::CacheBuild {
            type_name: name.to_string(),
            reason: "type is not registered".to_string(),
        })?;
        Ok(match def.custom_codec() {
            Some(codec) => Arc::clone(codec),
            None => Arc::new(StructCodec::new(self, &def)),
        })
    }

    /// Invalidates every cache entry and serializer. Registrations are kept.
    pub fn reset(&self) {
        self.cache.clear();
        write(&self.serializers).clear();
    }
}

impl Default for TypeDirectory {
    fn default() -> Self {
        Self::new(SchemaMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;
    use crate::value::Value;

    #[test]
    fn ids_follow_registration_order() {
        let dir = TypeDirectory::default();
        assert_eq!(dir.register(TypeDef::new("A")).unwrap(), FIRST_USER_ID);
        assert_eq!(dir.register(TypeDef::new("B")).unwrap(), FIRST_USER_ID + 1);
        assert_eq!(dir.type_id(&TypeKey::Str), Some(4));
    }

    #[test]
    fn pinned_ids_are_respected_and_skipped() {
        let dir = TypeDirectory::default();
        assert_eq!(
            dir.register(TypeDef::new("A").with_id(FIRST_USER_ID)).unwrap(),
            FIRST_USER_ID
        );
        assert_eq!(dir.register(TypeDef::new("B").with_id(200)).unwrap(), 200);
        assert_eq!(dir.register(TypeDef::new("C")).unwrap(), 201);
    }

    #[test]
    fn duplicates_are_rejected() {
        let dir = TypeDirectory::default();
        dir.register(TypeDef::new("A")).unwrap();
        assert!(matches!(
            dir.register(TypeDef::new("A")),
            Err(CodecError::DuplicateType(_))
        ));
        assert!(matches!(
            dir.register(TypeDef::new("B").with_id(2)),
            Err(CodecError::DuplicateId { id: 2, .. })
        ));
    }

    #[test]
    fn descriptors_roundtrip_and_unknown_ids_fail() {
        let dir = TypeDirectory::default();
        dir.register(TypeDef::new("Leaf")).unwrap();
        let mut buf = WriteBuffer::new();
        dir.write_type_descriptor(&mut buf, &TypeKey::named("Leaf"))
            .unwrap();
        dir.write_type_descriptor(&mut buf, &TypeKey::List).unwrap();
        buf.write_var_u32(999);
        let bytes = buf.into_vec();

        let mut rd = ReadBuffer::new(&bytes);
        assert_eq!(
            dir.read_type_descriptor(&mut rd).unwrap(),
            TypeKey::named("Leaf")
        );
        assert_eq!(dir.read_type_descriptor(&mut rd).unwrap(), TypeKey::List);
        assert!(matches!(
            dir.read_type_descriptor(&mut rd),
            Err(CodecError::UnknownConcreteType(999))
        ));
    }

    #[test]
    fn unregistered_descriptor_cannot_be_written() {
        let dir = TypeDirectory::default();
        let mut buf = WriteBuffer::new();
        assert!(matches!(
            dir.write_type_descriptor(&mut buf, &TypeKey::named("Ghost")),
            Err(CodecError::Unregistered(_))
        ));
    }

    #[test]
    fn hooked_types_share_one_serializer() {
        let dir = TypeDirectory::default();
        dir.register(
            TypeDef::new("Leaf")
                .field("x", FieldType::Any)
                .with_substitute(|_| Ok(Value::Int(1))),
        )
        .unwrap();
        let a = dir.serializer(&TypeKey::named("Leaf")).unwrap();
        let b = dir.serializer(&TypeKey::named("Leaf")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let data = dir.data_codec(&TypeKey::named("Leaf")).unwrap();
        assert!(!Arc::ptr_eq(&a, &data));
    }

    #[test]
    fn reset_rebuilds_entries() {
        let dir = TypeDirectory::default();
        dir.register(TypeDef::new("Leaf")).unwrap();
        let before = dir
            .method_cache()
            .get_or_build(&dir, &TypeKey::named("Leaf"))
            .unwrap();
        dir.reset();
        assert!(dir.method_cache().is_empty());
        let after = dir
            .method_cache()
            .get_or_build(&dir, &TypeKey::named("Leaf"))
            .unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
