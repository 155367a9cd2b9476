//! Data codecs and the per-pass contexts they run in.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::directory::TypeDirectory;
use crate::error::{CodecError, Result};
use crate::refs::{RefMark, RefReader, RefWriter, Reservation, SlotId};
use crate::types::{type_name_of, TypeKey};
use crate::value::{Object, Value};

/// Reads and writes the payload of one concrete type.
///
/// A codec sees only the payload: reference flags and type descriptors are
/// handled by the context before it is called. Codecs are shared by every
/// pass in the process and must not keep per-pass state.
pub trait DataCodec: Send + Sync {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()>;

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value>;
}

/// State of one encode pass.
pub struct WriteContext<'a> {
    directory: &'a TypeDirectory,
    buffer: WriteBuffer,
    refs: RefWriter,
    depth: usize,
    max_depth: usize,
}

impl<'a> WriteContext<'a> {
    pub fn new(directory: &'a TypeDirectory, max_depth: usize) -> Self {
        WriteContext {
            directory,
            buffer: WriteBuffer::new(),
            refs: RefWriter::new(),
            depth: 0,
            max_depth,
        }
    }

    pub fn directory(&self) -> &'a TypeDirectory {
        self.directory
    }

    pub fn buffer(&mut self) -> &mut WriteBuffer {
        &mut self.buffer
    }

    pub fn refs(&self) -> &RefWriter {
        &self.refs
    }

    /// Writes the reference flag for `value`; see [`RefWriter::write_ref_or_null`].
    pub fn write_ref_or_null(&mut self, value: &Value) -> Result<RefMark> {
        self.refs.write_ref_or_null(&mut self.buffer, value)
    }

    /// See [`RefWriter::repoint`].
    pub fn repoint(&mut self, original: &Object, surrogate: &Value) {
        self.refs.repoint(original, surrogate);
    }

    /// See [`RefWriter::mark_unmaterialized`].
    pub fn mark_unmaterialized(&mut self, original: &Object) {
        self.refs.mark_unmaterialized(original);
    }

    pub fn clear_unmaterialized(&mut self, original: &Object) {
        self.refs.clear_unmaterialized(original);
    }

    /// Writes a value of any type: flag, type descriptor, payload.
    pub fn write_ref(&mut self, value: &Value) -> Result<()> {
        if self.write_ref_or_null(value)?.needs_payload() {
            self.write_non_ref(value)?;
        }
        Ok(())
    }

    /// Writes a value whose type the reader knows from context: flag, payload.
    pub fn write_ref_with(&mut self, codec: &dyn DataCodec, value: &Value) -> Result<()> {
        if self.write_ref_or_null(value)?.needs_payload() {
            self.write_data(codec, value)?;
        }
        Ok(())
    }

    /// Writes type descriptor and payload without a reference flag.
    pub fn write_non_ref(&mut self, value: &Value) -> Result<()> {
        let Some(key) = TypeKey::of(value) else {
            return Err(CodecError::protocol(
                "null can only be written behind a reference flag",
            ));
        };
        self.directory.write_type_descriptor(&mut self.buffer, &key)?;
        let codec = self.directory.serializer(&key)?;
        self.write_data(codec.as_ref(), value)
    }

    /// Runs `codec` on `value`, counting one level of nesting.
    pub fn write_data(&mut self, codec: &dyn DataCodec, value: &Value) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthExceeded(self.max_depth));
        }
        self.depth += 1;
        let result = codec.write(self, value);
        self.depth -= 1;
        result
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.into_vec()
    }
}

/// State of one decode pass.
pub struct ReadContext<'a> {
    directory: &'a TypeDirectory,
    buffer: ReadBuffer<'a>,
    refs: RefReader,
    depth: usize,
    max_depth: usize,
}

impl<'a> ReadContext<'a> {
    pub fn new(directory: &'a TypeDirectory, data: &'a [u8], max_depth: usize) -> Self {
        ReadContext {
            directory,
            buffer: ReadBuffer::new(data),
            refs: RefReader::new(),
            depth: 0,
            max_depth,
        }
    }

    pub fn directory(&self) -> &'a TypeDirectory {
        self.directory
    }

    pub fn buffer(&mut self) -> &mut ReadBuffer<'a> {
        &mut self.buffer
    }

    pub fn refs(&self) -> &RefReader {
        &self.refs
    }

    /// See [`RefReader::try_reserve`].
    pub fn try_reserve(&mut self) -> Result<Reservation> {
        self.refs.try_reserve(&mut self.buffer)
    }

    pub fn last_pending_slot(&self) -> SlotId {
        self.refs.last_pending_slot()
    }

    pub fn publish(&mut self, slot: SlotId, value: Value) {
        self.refs.publish(slot, value);
    }

    /// Publishes a value under construction so nested back-references
    /// to it resolve. Codecs for cyclic types call this before reading
    /// their fields.
    pub fn publish_pending(&mut self, value: Value) {
        self.refs.publish_pending(value);
    }

    pub fn release(&mut self, slot: SlotId) {
        self.refs.release(slot);
    }

    /// Reads a value written by [`WriteContext::write_ref`].
    pub fn read_ref(&mut self) -> Result<Value> {
        match self.try_reserve()? {
            Reservation::Resolved(value) => Ok(value),
            Reservation::Fresh(slot) => {
                let value = self.read_non_ref()?;
                self.finish_slot(slot, value)
            }
        }
    }

    /// Reads a value written by [`WriteContext::write_ref_with`].
    pub fn read_ref_with(&mut self, codec: &dyn DataCodec) -> Result<Value> {
        match self.try_reserve()? {
            Reservation::Resolved(value) => Ok(value),
            Reservation::Fresh(slot) => {
                let value = self.read_data(codec)?;
                self.finish_slot(slot, value)
            }
        }
    }

    /// Reads a value written by [`WriteContext::write_non_ref`].
    pub fn read_non_ref(&mut self) -> Result<Value> {
        let key = self.directory.read_type_descriptor(&mut self.buffer)?;
        let codec = self.directory.serializer(&key)?;
        self.read_data(codec.as_ref())
    }

    /// Runs `codec`, counting one level of nesting.
    pub fn read_data(&mut self, codec: &dyn DataCodec) -> Result<Value> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthExceeded(self.max_depth));
        }
        self.depth += 1;
        let result = codec.read(self);
        self.depth -= 1;
        result
    }

    fn finish_slot(&mut self, slot: SlotId, value: Value) -> Result<Value> {
        self.refs.publish(slot, value.clone());
        self.refs.release(slot);
        Ok(value)
    }
}

/// Payload codecs of the builtin kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveCodec {
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    /// Length followed by each element through [`WriteContext::write_ref`].
    List,
}

impl PrimitiveCodec {
    pub fn for_key(key: &TypeKey) -> Option<Self> {
        Some(match key {
            TypeKey::Bool => PrimitiveCodec::Bool,
            TypeKey::Int => PrimitiveCodec::Int,
            TypeKey::Float => PrimitiveCodec::Float,
            TypeKey::Str => PrimitiveCodec::Str,
            TypeKey::Bytes => PrimitiveCodec::Bytes,
            TypeKey::List => PrimitiveCodec::List,
            TypeKey::Named(_) => return None,
        })
    }

    pub fn key(self) -> TypeKey {
        match self {
            PrimitiveCodec::Bool => TypeKey::Bool,
            PrimitiveCodec::Int => TypeKey::Int,
            PrimitiveCodec::Float => TypeKey::Float,
            PrimitiveCodec::Str => TypeKey::Str,
            PrimitiveCodec::Bytes => TypeKey::Bytes,
            PrimitiveCodec::List => TypeKey::List,
        }
    }
}

impl DataCodec for PrimitiveCodec {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        match (self, value) {
            (PrimitiveCodec::Bool, Value::Bool(b)) => ctx.buffer().write_u8(u8::from(*b)),
            (PrimitiveCodec::Int, Value::Int(n)) => ctx.buffer().write_var_i64(*n),
            (PrimitiveCodec::Float, Value::Float(f)) => ctx.buffer().write_f64(*f),
            (PrimitiveCodec::Str, Value::Str(s)) => ctx.buffer().write_str(s),
            (PrimitiveCodec::Bytes, Value::Bytes(b)) => ctx.buffer().write_bytes(b),
            (PrimitiveCodec::List, Value::List(items)) => {
                ctx.buffer().write_var_u64(items.len() as u64);
                for item in items {
                    ctx.write_ref(item)?;
                }
            }
            (codec, other) => return Err(CodecError::mismatch(codec.key(), type_name_of(other))),
        }
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let buf = ctx.buffer();
        Ok(match self {
            PrimitiveCodec::Bool => match buf.read_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(CodecError::protocol(format!("invalid bool byte {other}"))),
            },
            PrimitiveCodec::Int => Value::Int(buf.read_var_i64()?),
            PrimitiveCodec::Float => Value::Float(buf.read_f64()?),
            PrimitiveCodec::Str => Value::Str(buf.read_str()?),
            PrimitiveCodec::Bytes => Value::Bytes(buf.read_bytes()?),
            PrimitiveCodec::List => {
                let len = buf.read_var_u64()?;
                // Every element takes at least one byte.
                if len > buf.remaining() as u64 {
                    return Err(CodecError::UnexpectedEof);
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(ctx.read_ref()?);
                }
                Value::List(items)
            }
        })
    }
}
