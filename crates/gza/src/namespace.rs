//! The engine-owned global table (spec §3 "Globals", §9 "Global-state lifetime").
//!
//! Globals outlive any individual script: a script may set a global, be unloaded, and a
//! later script on the same engine still sees it. Ownership therefore lives here, on the
//! engine, not on `Code`/`Script`.

use ahash::AHashMap;

use crate::{error::RuntimeError, heap::Heap, resource::ResourceTracker, value::ScriptValue};

/// A string-keyed mapping from global name to value, with retain/release discipline
/// identical to any other slot (spec §3 invariant 2/3).
#[derive(Default)]
pub struct Globals {
    slots: AHashMap<String, ScriptValue>,
}

impl Globals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScriptValue> {
        self.slots.get(name)
    }

    /// Sets a global, retaining the incoming value and releasing whatever was
    /// previously bound to `name`.
    pub fn set(
        &mut self,
        name: &str,
        value: ScriptValue,
        heap: &mut Heap,
        tracker: &mut dyn ResourceTracker,
    ) -> Result<(), RuntimeError> {
        let owned = heap.retain_into_slot(&value, tracker)?;
        heap.release_value(value, tracker)?;
        if let Some(prior) = self.slots.insert(name.to_owned(), owned) {
            heap.release_value(prior, tracker)?;
        }
        Ok(())
    }

    /// Drops every global, releasing any aggregate it holds. Called at engine teardown.
    pub fn clear(&mut self, heap: &mut Heap, tracker: &mut dyn ResourceTracker) -> Result<(), RuntimeError> {
        for (_, value) in self.slots.drain() {
            heap.release_value(value, tracker)?;
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn set_overwrites_and_releases_prior_aggregate() {
        let mut globals = Globals::new();
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let id = heap.new_array(0, &mut tracker).unwrap();
        globals.set("x", ScriptValue::Array(id), &mut heap, &mut tracker).unwrap();
        assert_eq!(heap.ref_count(id), 1);
        globals.set("x", ScriptValue::Number(1.0), &mut heap, &mut tracker).unwrap();
        assert_eq!(heap.stats().live_objects, 0);
        assert!(matches!(globals.get("x"), Some(ScriptValue::Number(n)) if *n == 1.0));
    }
}
