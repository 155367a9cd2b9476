//! Reference table: object identity on the write side, slots on the read side.
//!
//! Every value written through the generic path is preceded by one flag:
//!
//! | flag | meaning |
//! |---|---|
//! | `NULL` (-3) | null, no payload |
//! | `REF` (-2) | back-reference, followed by a varint id |
//! | `NOT_NULL_VALUE` (-1) | identity-less value, payload follows |
//! | `REF_VALUE` (0) | first sight of an object, payload follows |
//!
//! Ids are assigned in first-seen order on both sides, so the n-th
//! `REF_VALUE` flag in a stream always denotes id n.

use std::collections::{HashMap, HashSet};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::value::{Object, Value};

pub const NULL_FLAG: i8 = -3;
pub const REF_FLAG: i8 = -2;
pub const NOT_NULL_VALUE_FLAG: i8 = -1;
pub const REF_VALUE_FLAG: i8 = 0;

/// What [`RefWriter::write_ref_or_null`] wrote for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMark {
    Null,
    /// Back-reference to an object written earlier in the pass.
    Back(u32),
    /// First sight of an object, recorded under this id.
    Tracked(u32),
    /// A value without identity.
    Untracked,
}

impl RefMark {
    /// Whether the caller still has to write the value's payload.
    pub fn needs_payload(self) -> bool {
        matches!(self, RefMark::Tracked(_) | RefMark::Untracked)
    }
}

/// Write-side identity table for one pass.
#[derive(Debug, Default)]
pub struct RefWriter {
    ids: HashMap<usize, u32>,
    // Recorded objects stay alive until the pass ends so their addresses
    // cannot be reused by surrogates allocated later in the same pass.
    retained: Vec<Object>,
    // Originals whose identity-less surrogate is being written; the reader
    // has nothing to resolve them to until that payload ends.
    unmaterialized: HashSet<usize>,
    next_id: u32,
}

impl RefWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the flag for `value` and records first-seen objects.
    ///
    /// Fails when `value` is an original marked with
    /// [`mark_unmaterialized`](Self::mark_unmaterialized): a back-reference
    /// to it could not be resolved by the reader.
    pub fn write_ref_or_null(&mut self, buf: &mut WriteBuffer, value: &Value) -> Result<RefMark> {
        Ok(match value {
            Value::Null => {
                buf.write_i8(NULL_FLAG);
                RefMark::Null
            }
            Value::Object(object) => {
                if let Some(&id) = self.ids.get(&object.addr()) {
                    if self.unmaterialized.contains(&object.addr()) {
                        return Err(CodecError::protocol(format!(
                            "`{}` (reference {id}) is reachable from its own identity-less surrogate",
                            object.type_name()
                        )));
                    }
                    buf.write_i8(REF_FLAG);
                    buf.write_var_u32(id);
                    return Ok(RefMark::Back(id));
                }
                let id = self.next_id;
                self.next_id += 1;
                self.ids.insert(object.addr(), id);
                self.retained.push(object.clone());
                buf.write_i8(REF_VALUE_FLAG);
                RefMark::Tracked(id)
            }
            _ => {
                buf.write_i8(NOT_NULL_VALUE_FLAG);
                RefMark::Untracked
            }
        })
    }

    /// Makes later occurrences of `original` resolve to `surrogate`'s id.
    ///
    /// Has no effect when `surrogate` has no id (null or identity-less);
    /// the decoder covers those cases by publishing the materialized
    /// surrogate under the original's slot as well.
    pub fn repoint(&mut self, original: &Object, surrogate: &Value) {
        let Value::Object(surrogate) = surrogate else {
            return;
        };
        if let Some(&id) = self.ids.get(&surrogate.addr()) {
            if self.ids.insert(original.addr(), id).is_none() {
                self.retained.push(original.clone());
            }
        }
    }

    /// Forbids back-references to `original` until
    /// [`clear_unmaterialized`](Self::clear_unmaterialized) is called.
    pub fn mark_unmaterialized(&mut self, original: &Object) {
        self.unmaterialized.insert(original.addr());
    }

    pub fn clear_unmaterialized(&mut self, original: &Object) {
        self.unmaterialized.remove(&original.addr());
    }

    /// Id recorded for `object`, if it was seen in this pass.
    pub fn id_of(&self, object: &Object) -> Option<u32> {
        self.ids.get(&object.addr()).copied()
    }

    /// Number of ids handed out so far.
    pub fn len(&self) -> usize {
        self.next_id as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next_id == 0
    }
}

/// A read-side slot for the value currently being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotId {
    /// Slot with an id that later back-references may name.
    Tracked(u32),
    /// Position of an identity-less value; publishing to it is a no-op.
    Untracked,
}

/// Outcome of [`RefReader::try_reserve`].
#[derive(Debug)]
pub enum Reservation {
    /// The flag was null or a back-reference; no payload follows.
    Resolved(Value),
    /// A payload follows; the slot is pending until released.
    Fresh(SlotId),
}

/// Read-side slot table for one pass.
///
/// Reservations form a stack: every [`Reservation::Fresh`] slot must be
/// released before the slot reserved just before it.
#[derive(Debug, Default)]
pub struct RefReader {
    objects: Vec<Option<Value>>,
    pending: Vec<SlotId>,
}

impl RefReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a flag and either resolves it or reserves a slot for the payload.
    pub fn try_reserve(&mut self, buf: &mut ReadBuffer<'_>) -> Result<Reservation> {
        let flag = buf.read_i8()?;
        match flag {
            NULL_FLAG => Ok(Reservation::Resolved(Value::Null)),
            REF_FLAG => {
                let id = buf.read_var_u32()?;
                Ok(Reservation::Resolved(self.resolve(id)?))
            }
            REF_VALUE_FLAG => Ok(Reservation::Fresh(self.reserve())),
            NOT_NULL_VALUE_FLAG => {
                self.pending.push(SlotId::Untracked);
                Ok(Reservation::Fresh(SlotId::Untracked))
            }
            other => Err(CodecError::protocol(format!("unknown reference flag {other}"))),
        }
    }

    /// Reserves the next tracked slot and makes it the pending one.
    pub fn reserve(&mut self) -> SlotId {
        let id = self.objects.len() as u32;
        self.objects.push(None);
        let slot = SlotId::Tracked(id);
        self.pending.push(slot);
        slot
    }

    /// The slot of the innermost value currently being decoded.
    pub fn last_pending_slot(&self) -> SlotId {
        self.pending.last().copied().unwrap_or(SlotId::Untracked)
    }

    /// Records `value` as the materialization of `slot`.
    ///
    /// A pending slot may be published more than once (an object published
    /// before its fields are read is later replaced by its restored form);
    /// once released it is final.
    pub fn publish(&mut self, slot: SlotId, value: Value) {
        if let SlotId::Tracked(id) = slot {
            if let Some(entry) = self.objects.get_mut(id as usize) {
                *entry = Some(value);
            }
        }
    }

    /// Publishes `value` under the innermost pending slot.
    pub fn publish_pending(&mut self, value: Value) {
        self.publish(self.last_pending_slot(), value);
    }

    /// Ends the reservation of `slot`.
    pub fn release(&mut self, slot: SlotId) {
        let top = self.pending.pop();
        debug_assert_eq!(top, Some(slot), "slot released out of order");
    }

    /// Looks up the value a back-reference names.
    pub fn resolve(&self, id: u32) -> Result<Value> {
        match self.objects.get(id as usize) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(CodecError::DanglingReference(id)),
            None => Err(CodecError::protocol(format!(
                "back-reference to unknown id {id}"
            ))),
        }
    }

    /// Number of slots reserved so far.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Depth of the pending-slot stack.
    pub fn pending_depth(&self) -> usize {
        self.pending.len()
    }
}
