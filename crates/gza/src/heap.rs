//! The reference-counted aggregate arena (spec §3 "Reference counting", §4.5 "Arena mode").
//!
//! Scaled down from the teacher's `heap.rs` (a full CPython object graph) to the three
//! aggregate kinds this spec defines: arrays, tables, and script functions. A
//! free-list-backed `Vec` of slots backs the arena; each live slot carries an explicit
//! refcount that every assignment/overwrite must retain/release through (spec §3
//! invariants 1-6).

use indexmap::IndexMap;

use crate::{
    error::RuntimeError,
    resource::ResourceTracker,
    value::{FunctionRef, NativeId, ScriptValue},
};

/// An owned, self-detached description of a value's shape, extracted from a borrowed
/// `&ScriptValue` that may itself live inside the heap being retained into. Splitting
/// "read" from "retain" this way avoids aliasing the heap's own storage when, for
/// example, retaining a copy of an array element read from the same heap.
enum ValueSnapshot {
    Nil,
    Bool(bool),
    Number(f64),
    NativeFn(NativeId),
    Str(String),
    Array(HeapId),
    Table(HeapId),
    ScriptFn(HeapId),
}

impl ValueSnapshot {
    fn of(value: &ScriptValue) -> Self {
        match value {
            ScriptValue::Nil => Self::Nil,
            ScriptValue::Bool(b) => Self::Bool(*b),
            ScriptValue::Number(n) => Self::Number(*n),
            ScriptValue::Function(FunctionRef::Native(id)) => Self::NativeFn(*id),
            ScriptValue::Str(s) => Self::Str(s.clone()),
            ScriptValue::Array(id) => Self::Array(*id),
            ScriptValue::Table(id) => Self::Table(*id),
            ScriptValue::Function(FunctionRef::Script(id)) => Self::ScriptFn(*id),
        }
    }
}

/// A stable identifier for a heap-allocated aggregate. Indexes into [`Heap`]'s slot
/// vector; never reused for a different object while any `ScriptValue` still names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

/// A script-defined function's closure data (spec §3 "function" variant).
#[derive(Debug, Clone)]
pub struct ScriptFunction {
    pub name: Option<String>,
    pub entry: u32,
    pub param_count: u32,
    pub register_count: u32,
}

/// The payload of one heap slot.
#[derive(Debug)]
pub enum HeapData {
    Array(Vec<ScriptValue>),
    Table(IndexMap<String, ScriptValue>),
    ScriptFunction(ScriptFunction),
}

impl HeapData {
    /// A rough byte estimate for resource accounting. Doesn't need to be exact — only
    /// consistent enough that the configured `memory_limit` means something.
    fn approx_size(&self) -> usize {
        match self {
            Self::Array(v) => 24 + v.len() * size_of::<ScriptValue>(),
            Self::Table(m) => 24 + m.len() * (size_of::<ScriptValue>() + 24),
            Self::ScriptFunction(_) => size_of::<ScriptFunction>(),
        }
    }
}

struct Slot {
    refcount: u32,
    data: HeapData,
}

/// Snapshot of arena occupancy, used by the CLI's "memory context" diagnostic block and
/// by hosts watching for leaked reference cycles (spec §9).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    pub live_objects: usize,
    pub free_slots: usize,
    pub tracked_bytes: usize,
}

/// The reference-counted aggregate arena.
///
/// Owns all arrays, tables, and script functions live on an engine. Also tracks every
/// heap-allocation-sized event (aggregate creation/destruction, string duplication)
/// through a [`ResourceTracker`], which is how the sandbox's `memory_limit` is enforced.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free_list: Vec<u32>,
    /// When arena mode is enabled (`EngineConfig::use_arena`), every string ever
    /// produced by the runtime is also retained here so a single `Vec` drop at engine
    /// teardown reclaims it, even if the slot holding the live copy was already
    /// released. Trades ~5-10% extra memory for guaranteed bulk cleanup, per spec §4.5.
    arena: Option<Vec<String>>,
}

impl Heap {
    #[must_use]
    pub fn new(use_arena: bool) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            arena: use_arena.then(Vec::new),
        }
    }

    fn insert(&mut self, data: HeapData, tracker: &mut dyn ResourceTracker) -> Result<HeapId, RuntimeError> {
        tracker.on_allocate(data.approx_size())?;
        let slot = Slot { refcount: 1, data };
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = Some(slot);
            Ok(HeapId(idx))
        } else {
            let idx = u32::try_from(self.slots.len()).expect("heap arena exhausted");
            self.slots.push(Some(slot));
            Ok(HeapId(idx))
        }
    }

    pub fn new_array(&mut self, capacity: usize, tracker: &mut dyn ResourceTracker) -> Result<HeapId, RuntimeError> {
        self.insert(HeapData::Array(Vec::with_capacity(capacity)), tracker)
    }

    pub fn new_table(&mut self, tracker: &mut dyn ResourceTracker) -> Result<HeapId, RuntimeError> {
        self.insert(HeapData::Table(IndexMap::new()), tracker)
    }

    pub fn new_script_function(
        &mut self,
        func: ScriptFunction,
        tracker: &mut dyn ResourceTracker,
    ) -> Result<HeapId, RuntimeError> {
        self.insert(HeapData::ScriptFunction(func), tracker)
    }

    /// Wraps a freshly owned `String` into a `ScriptValue::Str`, accounting its bytes
    /// against the resource tracker and (if arena mode is on) registering a second,
    /// independently-accounted copy for bulk cleanup at teardown.
    pub fn adopt_string(&mut self, s: String, tracker: &mut dyn ResourceTracker) -> Result<ScriptValue, RuntimeError> {
        tracker.on_allocate(s.len())?;
        if let Some(arena) = &mut self.arena {
            tracker.on_allocate(s.len())?;
            arena.push(s.clone());
        }
        Ok(ScriptValue::Str(s))
    }

    fn slot(&self, id: HeapId) -> &Slot {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("heap access on a freed aggregate - fatal invariant violation")
    }

    fn slot_mut(&mut self, id: HeapId) -> &mut Slot {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("heap access on a freed aggregate - fatal invariant violation")
    }

    #[must_use]
    pub fn data(&self, id: HeapId) -> &HeapData {
        &self.slot(id).data
    }

    pub fn data_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slot_mut(id).data
    }

    #[must_use]
    pub fn ref_count(&self, id: HeapId) -> u32 {
        self.slot(id).refcount
    }

    /// Increments an aggregate's refcount. Every slot (register, global, array element,
    /// table field) that comes to hold `id` must call this exactly once (spec §3
    /// invariant 2).
    pub fn retain(&mut self, id: HeapId) {
        self.slot_mut(id).refcount += 1;
    }

    /// Decrements an aggregate's refcount; at zero, recursively releases contained
    /// aggregates and frees owned strings, then returns the slot to the free list
    /// (spec §3 invariant 3). Panicking on a double-release is intentional: invariant 4
    /// says "release on a freed aggregate is a fatal invariant violation".
    pub fn release(&mut self, id: HeapId, tracker: &mut dyn ResourceTracker) -> Result<(), RuntimeError> {
        let slot = self.slot_mut(id);
        assert!(slot.refcount > 0, "refcount underflow on {id:?} - fatal invariant violation");
        slot.refcount -= 1;
        if slot.refcount != 0 {
            return Ok(());
        }
        let data = self.slots[id.0 as usize].take().unwrap().data;
        tracker.on_free(data.approx_size());
        match data {
            HeapData::Array(values) => {
                for v in values {
                    self.release_value(v, tracker)?;
                }
            }
            HeapData::Table(map) => {
                for (_, v) in map {
                    self.release_value(v, tracker)?;
                }
            }
            HeapData::ScriptFunction(_) => {}
        }
        self.free_list.push(id.0);
        Ok(())
    }

    /// Releases a value leaving a slot: a no-op for primitives and native functions,
    /// frees the owned bytes for a string, and calls [`Self::release`] for aggregates.
    pub fn release_value(&mut self, value: ScriptValue, tracker: &mut dyn ResourceTracker) -> Result<(), RuntimeError> {
        match value {
            ScriptValue::Nil | ScriptValue::Bool(_) | ScriptValue::Number(_) | ScriptValue::Function(FunctionRef::Native(_)) => {
                Ok(())
            }
            ScriptValue::Str(s) => {
                tracker.on_free(s.len());
                Ok(())
            }
            ScriptValue::Array(id) | ScriptValue::Table(id) | ScriptValue::Function(FunctionRef::Script(id)) => {
                self.release(id, tracker)
            }
        }
    }

    /// Produces the owned copy that goes into a new slot when `value` is being written
    /// there: primitives and native function refs are copied outright, strings are
    /// duplicated, and aggregates are retained (spec §3 invariant 2, §4.3 "always
    /// duplicate when transferring into an aggregate slot").
    pub fn retain_into_slot(
        &mut self,
        value: &ScriptValue,
        tracker: &mut dyn ResourceTracker,
    ) -> Result<ScriptValue, RuntimeError> {
        let snapshot = ValueSnapshot::of(value);
        self.materialize(snapshot, tracker)
    }

    /// Returns a retained copy of array `id`'s element at `idx`, or `None` if out of
    /// bounds. Split into a borrow-free snapshot step so reading from and retaining into
    /// the same heap don't alias (see [`ValueSnapshot`]).
    pub fn array_get_retained(
        &mut self,
        id: HeapId,
        idx: usize,
        tracker: &mut dyn ResourceTracker,
    ) -> Result<Option<ScriptValue>, RuntimeError> {
        let snapshot = match &self.slot(id).data {
            HeapData::Array(items) => items.get(idx).map(ValueSnapshot::of),
            _ => return Err(RuntimeError::type_error("not an array")),
        };
        snapshot.map(|s| self.materialize(s, tracker)).transpose()
    }

    /// Returns a retained copy of table `id`'s value at `key`, or `None` if absent.
    pub fn table_get_retained(
        &mut self,
        id: HeapId,
        key: &str,
        tracker: &mut dyn ResourceTracker,
    ) -> Result<Option<ScriptValue>, RuntimeError> {
        let snapshot = match &self.slot(id).data {
            HeapData::Table(map) => map.get(key).map(ValueSnapshot::of),
            _ => return Err(RuntimeError::type_error("not a table")),
        };
        snapshot.map(|s| self.materialize(s, tracker)).transpose()
    }

    fn materialize(&mut self, snapshot: ValueSnapshot, tracker: &mut dyn ResourceTracker) -> Result<ScriptValue, RuntimeError> {
        Ok(match snapshot {
            ValueSnapshot::Nil => ScriptValue::Nil,
            ValueSnapshot::Bool(b) => ScriptValue::Bool(b),
            ValueSnapshot::Number(n) => ScriptValue::Number(n),
            ValueSnapshot::NativeFn(id) => ScriptValue::Function(FunctionRef::Native(id)),
            ValueSnapshot::Str(s) => self.adopt_string(s, tracker)?,
            ValueSnapshot::Array(id) => {
                self.retain(id);
                ScriptValue::Array(id)
            }
            ValueSnapshot::Table(id) => {
                self.retain(id);
                ScriptValue::Table(id)
            }
            ValueSnapshot::ScriptFn(id) => {
                self.retain(id);
                ScriptValue::Function(FunctionRef::Script(id))
            }
        })
    }

    /// Overwrites `*slot` with `new_value`, releasing whatever was previously there
    /// (spec §3 invariant 3, invariant 5: "the outgoing string is freed before the
    /// incoming one replaces it").
    pub fn assign(
        &mut self,
        slot: &mut ScriptValue,
        new_value: ScriptValue,
        tracker: &mut dyn ResourceTracker,
    ) -> Result<(), RuntimeError> {
        let old = std::mem::replace(slot, new_value);
        self.release_value(old, tracker)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let live_objects = self.slots.iter().filter(|s| s.is_some()).count();
        let tracked_bytes = self
            .slots
            .iter()
            .flatten()
            .map(|s| s.data.approx_size())
            .sum();
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            tracked_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn retain_release_round_trips_to_zero() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let id = heap.new_array(0, &mut tracker).unwrap();
        assert_eq!(heap.ref_count(id), 1);
        heap.retain(id);
        assert_eq!(heap.ref_count(id), 2);
        heap.release(id, &mut tracker).unwrap();
        assert_eq!(heap.ref_count(id), 1);
        heap.release(id, &mut tracker).unwrap();
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    #[should_panic(expected = "fatal invariant violation")]
    fn double_release_panics() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let id = heap.new_array(0, &mut tracker).unwrap();
        heap.release(id, &mut tracker).unwrap();
        let _ = heap.release(id, &mut tracker);
    }

    #[test]
    fn releasing_array_recursively_releases_contained_aggregate() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let inner = heap.new_array(0, &mut tracker).unwrap();
        let outer = heap.new_array(1, &mut tracker).unwrap();
        if let HeapData::Array(v) = heap.data_mut(outer) {
            v.push(ScriptValue::Array(inner));
        }
        heap.release(outer, &mut tracker).unwrap();
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn freed_slots_are_recycled() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let a = heap.new_array(0, &mut tracker).unwrap();
        heap.release(a, &mut tracker).unwrap();
        let b = heap.new_table(&mut tracker).unwrap();
        assert_eq!(heap.stats().live_objects, 1);
        assert_eq!(heap.stats().free_slots, 0);
        let _ = b;
    }
}
