//! Process-wide cache of per-type hook handles and data codecs.
//!
//! Entries live in slots keyed by [`TypeKey`]. A slot is allocated the
//! first time a type is looked up and filled once its entry is built;
//! published entries are never replaced, only the data codec inside one
//! may be swapped (see [`CacheEntry::data_codec`]).

use log::{debug, trace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::codec::DataCodec;
use crate::directory::TypeDirectory;
use crate::error::{CodecError, Result};
use crate::hooks::{HookProfile, Hooks};
use crate::types::TypeKey;
use crate::value::{Object, Value};

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Hook handles and data codec of one concrete type.
pub struct CacheEntry {
    key: TypeKey,
    profile: HookProfile,
    hooks: Hooks,
    data_codec: RwLock<Arc<dyn DataCodec>>,
}

impl CacheEntry {
    fn build(directory: &TypeDirectory, key: &TypeKey) -> Result<Self> {
        let (profile, hooks) = match key {
            TypeKey::Named(name) => {
                let def = directory
                    .type_def(name)
                    .ok_or_else(|| CodecError::CacheBuild {
                        type_name: name.to_string(),
                        reason: "type is not registered".to_string(),
                    })?;
                (HookProfile::probe(&def), Hooks::of(&def))
            }
            _ => (HookProfile::None, Hooks::default()),
        };
        let data_codec = directory.build_data_codec(key)?;
        Ok(CacheEntry {
            key: key.clone(),
            profile,
            hooks,
            data_codec: RwLock::new(data_codec),
        })
    }

    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    pub fn profile(&self) -> HookProfile {
        self.profile
    }

    /// Current data codec of the type.
    ///
    /// The codec can be swapped in place by
    /// [`TypeDirectory::register_codec`]; a caller holding a codec obtained
    /// before the swap keeps using the old one until it asks again.
    pub fn data_codec(&self) -> Arc<dyn DataCodec> {
        Arc::clone(&read(&self.data_codec))
    }

    pub(crate) fn replace_data_codec(&self, codec: Arc<dyn DataCodec>) {
        *write(&self.data_codec) = codec;
    }

    /// Runs the substitution hook; `None` when the type defines none.
    pub fn substitute(&self, value: &Object) -> Result<Option<Value>> {
        self.hooks.substitute(self.key.name(), value)
    }

    /// Runs the restoring hook; the object itself when the type defines none.
    pub fn restore(&self, value: Object) -> Result<Value> {
        self.hooks.restore(self.key.name(), value)
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("profile", &self.profile)
            .finish()
    }
}

/// Forward handle to a cache slot, valid before the entry is built.
///
/// The handle owns its slot, so resolving an already published entry
/// through it takes no lock. Handles issued before
/// [`MethodCache::clear`] are re-issued by key on their next use.
#[derive(Clone)]
pub struct CacheHandle {
    slot: Arc<CacheSlot>,
    generation: u64,
}

impl CacheHandle {
    pub fn key(&self) -> &TypeKey {
        &self.slot.key
    }
}

impl PartialEq for CacheHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot) && self.generation == other.generation
    }
}

impl Eq for CacheHandle {}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("key", &self.slot.key)
            .field("generation", &self.generation)
            .field("built", &self.slot.entry.get().is_some())
            .finish()
    }
}

struct CacheSlot {
    key: TypeKey,
    entry: OnceLock<Arc<CacheEntry>>,
}

/// Cache entries shared by all passes of a [`TypeDirectory`].
///
/// Lookups by key take one read lock on the slot map; lookups through a
/// [`CacheHandle`] of the current generation take none. Two threads that
/// miss on the same type may both build an entry; the first one stored
/// wins and the other adopts it.
#[derive(Default)]
pub struct MethodCache {
    slots: RwLock<HashMap<TypeKey, Arc<CacheSlot>>>,
    generation: AtomicU64,
}

impl MethodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot handle for `key`, allocating an empty slot on first
    /// sight. Never builds, so it is safe to call while `key` itself is
    /// being built.
    pub fn handle(&self, key: &TypeKey) -> CacheHandle {
        if let Some(slot) = read(&self.slots).get(key) {
            return CacheHandle {
                slot: Arc::clone(slot),
                generation: self.generation.load(Ordering::Acquire),
            };
        }
        let mut slots = write(&self.slots);
        let slot = slots.entry(key.clone()).or_insert_with(|| {
            Arc::new(CacheSlot {
                key: key.clone(),
                entry: OnceLock::new(),
            })
        });
        CacheHandle {
            slot: Arc::clone(slot),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    fn current(&self, handle: &CacheHandle) -> CacheHandle {
        if handle.generation == self.generation.load(Ordering::Acquire) {
            handle.clone()
        } else {
            self.handle(handle.key())
        }
    }

    /// Returns the entry behind `handle` if it has been built.
    pub fn peek(&self, handle: &CacheHandle) -> Option<Arc<CacheEntry>> {
        self.current(handle).slot.entry.get().cloned()
    }

    /// Returns the entry for `key` if it has been built.
    pub fn peek_key(&self, key: &TypeKey) -> Option<Arc<CacheEntry>> {
        read(&self.slots).get(key)?.entry.get().cloned()
    }

    /// Returns the entry behind `handle`, building it if needed.
    pub fn resolve(&self, directory: &TypeDirectory, handle: &CacheHandle) -> Result<Arc<CacheEntry>> {
        let handle = self.current(handle);
        let slot = &handle.slot;
        if let Some(entry) = slot.entry.get() {
            return Ok(Arc::clone(entry));
        }

        let built = Arc::new(CacheEntry::build(directory, &slot.key)?);
        if slot.entry.set(Arc::clone(&built)).is_ok() {
            debug!(
                "built cache entry for `{}` ({:?})",
                slot.key, built.profile
            );
        } else {
            trace!("discarding duplicate cache entry for `{}`", slot.key);
        }
        Ok(slot.entry.get().map_or(built, Arc::clone))
    }

    /// Returns the entry for `key`, building it if needed.
    pub fn get_or_build(&self, directory: &TypeDirectory, key: &TypeKey) -> Result<Arc<CacheEntry>> {
        let handle = self.handle(key);
        self.resolve(directory, &handle)
    }

    /// Number of slots, built or pending.
    pub fn len(&self) -> usize {
        read(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every slot and retires outstanding handles. Entries already
    /// handed out stay valid for their holders.
    pub fn clear(&self) {
        let mut slots = write(&self.slots);
        slots.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaMode;
    use crate::types::{FieldType, TypeDef};
    use std::sync::Barrier;
    use std::thread;

    fn directory() -> TypeDirectory {
        let dir = TypeDirectory::new(SchemaMode::Strict);
        dir.register(
            TypeDef::new("Node")
                .field("value", FieldType::Exact(TypeKey::Int))
                .field("next", FieldType::Exact(TypeKey::named("Node"))),
        )
        .unwrap();
        dir
    }

    #[test]
    fn handle_does_not_build() {
        let dir = directory();
        let cache = dir.method_cache();
        let handle = cache.handle(&TypeKey::named("Node"));
        assert!(cache.peek(&handle).is_none());
        assert_eq!(cache.handle(&TypeKey::named("Node")), handle);
    }

    #[test]
    fn self_referential_type_builds_once() {
        let dir = directory();
        let cache = dir.method_cache();
        let first = cache.get_or_build(&dir, &TypeKey::named("Node")).unwrap();
        let second = cache.get_or_build(&dir, &TypeKey::named("Node")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // Node and its `value` field type (int).
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn unregistered_type_fails_to_build() {
        let dir = directory();
        let err = dir
            .method_cache()
            .get_or_build(&dir, &TypeKey::named("Ghost"))
            .err()
            .unwrap();
        assert!(matches!(err, CodecError::CacheBuild { .. }));
    }

    #[test]
    fn stale_handle_after_clear_is_reissued() {
        let dir = directory();
        let cache = dir.method_cache();
        let handle = cache.handle(&TypeKey::Int);
        cache.clear();
        cache.handle(&TypeKey::Str);
        let entry = cache.resolve(&dir, &handle).unwrap();
        assert_eq!(entry.key(), &TypeKey::Int);
    }

    #[test]
    fn published_handle_resolves_without_the_slot_map() {
        let dir = directory();
        let cache = dir.method_cache();
        let handle = cache.handle(&TypeKey::named("Node"));
        let built = cache.resolve(&dir, &handle).unwrap();

        let _held = write(&cache.slots);
        let again = cache.resolve(&dir, &handle).unwrap();
        assert!(Arc::ptr_eq(&built, &again));
        assert!(cache.peek(&handle).is_some());
    }

    #[test]
    fn concurrent_first_use_publishes_one_entry() {
        let dir = Arc::new(directory());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    dir.method_cache()
                        .get_or_build(&dir, &TypeKey::named("Node"))
                        .unwrap()
                })
            })
            .collect();
        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for entry in &entries[1..] {
            assert!(Arc::ptr_eq(&entries[0], entry));
        }
    }
}
