//! Isomer is a reference-tracking codec for dynamic object graphs whose
//! types may substitute themselves during encoding.
//!
//! Core concepts:
//! - **Value / Object**: A dynamically typed graph; only objects carry identity
//! - **TypeDef**: Declares a record type, its fields and optional hooks
//! - **Substitution hook**: Replaces an object with a surrogate that is written instead
//! - **Restoring hook**: Turns a decoded object back into its logical value
//! - **TypeDirectory**: Assigns wire ids and caches per-type codecs across passes
//! - **Session**: Encodes and decodes whole graphs over a shared directory
//!
//! Shared references and cycles survive a round trip, including references
//! that point at an object which was replaced by a surrogate: every later
//! occurrence of the original decodes to the same materialized surrogate.
//!
//! # Example
//!
//! ```
//! use isomer_core::{Config, FieldType, Object, Session, TypeDef, TypeKey, Value};
//!
//! let session = Session::new(Config::default());
//! session
//!     .register(
//!         TypeDef::new("Celsius")
//!             .field("degrees", FieldType::Exact(TypeKey::Float))
//!             // Written as a plain float...
//!             .with_substitute(|c| Ok(c.get("degrees").unwrap_or(Value::Null))),
//!     )
//!     .unwrap();
//!
//! let reading = Object::new("Celsius").with("degrees", 21.5);
//! let list = Value::from(vec![Value::from(reading.clone()), Value::from(reading)]);
//! let decoded = session.decode(&session.encode(&list).unwrap()).unwrap();
//! // ...and decoded as one, at both positions.
//! assert_eq!(decoded, Value::from(vec![Value::Float(21.5), Value::Float(21.5)]));
//! ```
//!
//! # Known limitation
//!
//! [`TypeDirectory::register_codec`] on a type that was already used swaps
//! the codec inside the existing cache entry. A pass that fetched the old
//! codec keeps it until the pass ends.

mod buffer;
mod cache;
mod codec;
mod config;
mod directory;
mod error;
mod hooks;
mod refs;
mod serializer;
mod session;
mod structure;
mod types;
mod value;

pub use buffer::{ReadBuffer, WriteBuffer};
pub use cache::{CacheEntry, CacheHandle, MethodCache};
pub use codec::{DataCodec, PrimitiveCodec, ReadContext, WriteContext};
pub use config::{Config, ConfigError, SchemaMode};
pub use directory::{TypeDirectory, FIRST_USER_ID};
pub use error::{CodecError, HookError, Result};
pub use hooks::{HookKind, HookProfile};
pub use refs::{
    RefMark, RefReader, RefWriter, Reservation, SlotId, NOT_NULL_VALUE_FLAG, NULL_FLAG, REF_FLAG,
    REF_VALUE_FLAG,
};
pub use serializer::{SubstitutionSerializer, Tag};
pub use session::Session;
pub use structure::{fingerprint, StructCodec};
pub use types::{FieldType, RestoreFn, SubstituteFn, TypeDef, TypeKey};
pub use value::{Object, Value};
