use log::debug;
use std::sync::Arc;

use crate::codec::{ReadContext, WriteContext};
use crate::config::{Config, SchemaMode};
use crate::directory::TypeDirectory;
use crate::error::{CodecError, Result};
use crate::types::TypeDef;
use crate::value::Value;

const EVOLVING_BIT: u8 = 0b1;

fn header(mode: SchemaMode) -> u8 {
    match mode {
        SchemaMode::Strict => 0,
        SchemaMode::Evolving => EVOLVING_BIT,
    }
}

/// Entry point for encoding and decoding whole value graphs.
///
/// Clones share the same [`TypeDirectory`], so a session can be handed to
/// several threads that each run their own passes.
///
/// # Example
///
/// ```
/// use isomer_core::{Config, FieldType, Object, Session, TypeDef, Value};
///
/// let session = Session::new(Config::default());
/// session.register(TypeDef::new("Point").field("x", FieldType::Any)).unwrap();
///
/// let point = Value::from(Object::new("Point").with("x", 3i64));
/// let bytes = session.encode(&point).unwrap();
/// let decoded = session.decode(&bytes).unwrap();
/// assert!(decoded.structural_eq(&point));
/// ```
#[derive(Clone)]
pub struct Session {
    directory: Arc<TypeDirectory>,
    config: Config,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let directory = Arc::new(TypeDirectory::new(config.schema_mode));
        Session { directory, config }
    }

    /// Creates a session over an existing directory.
    ///
    /// The directory's schema mode wins over `config.schema_mode`.
    pub fn with_directory(directory: Arc<TypeDirectory>, config: Config) -> Self {
        let config = config.with_schema_mode(directory.schema_mode());
        Session { directory, config }
    }

    pub fn register(&self, def: TypeDef) -> Result<u32> {
        self.directory.register(def)
    }

    pub fn directory(&self) -> &Arc<TypeDirectory> {
        &self.directory
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Encodes `root` and everything reachable from it.
    pub fn encode(&self, root: &Value) -> Result<Vec<u8>> {
        let mut ctx = WriteContext::new(&self.directory, self.config.max_depth);
        ctx.buffer().write_u8(header(self.config.schema_mode));
        ctx.write_ref(root)?;
        let bytes = ctx.into_bytes();
        debug!("encoded graph into {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Decodes a stream produced by [`encode`](Self::encode).
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut ctx = ReadContext::new(&self.directory, bytes, self.config.max_depth);
        let flags = ctx.buffer().read_u8()?;
        if flags & !EVOLVING_BIT != 0 {
            return Err(CodecError::protocol(format!("unknown header bits {flags:#04x}")));
        }
        let remote = if flags & EVOLVING_BIT != 0 {
            SchemaMode::Evolving
        } else {
            SchemaMode::Strict
        };
        if remote != self.config.schema_mode {
            return Err(CodecError::SchemaModeMismatch {
                local: self.config.schema_mode,
                remote,
            });
        }

        let root = ctx.read_ref()?;
        let trailing = ctx.buffer().remaining();
        if trailing != 0 {
            return Err(CodecError::protocol(format!(
                "{trailing} trailing bytes after root value"
            )));
        }
        debug!("decoded {} tracked objects", ctx.refs().len());
        Ok(root)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
