//! Table helpers (spec §4.7 "table helpers: keys, values, merge, has, remove, iteration").
//!
//! `table_next` mirrors `array_helpers::array_next`'s iterator-pair convention, walking
//! `IndexMap`'s insertion order via `get_index` so iteration order matches the order
//! fields were first assigned (spec §3 "table" preserves insertion order).

use super::check_arity;
use crate::{error::RuntimeError, function::NativeContext, heap::HeapData, value::ScriptValue};

fn expect_table(args: &[ScriptValue], idx: usize) -> Result<crate::heap::HeapId, RuntimeError> {
    match &args[idx] {
        ScriptValue::Table(id) => Ok(*id),
        other => Err(RuntimeError::type_error(format!(
            "expected a table argument, found {}",
            other.type_name()
        ))),
    }
}

fn expect_key(args: &[ScriptValue], idx: usize) -> Result<&str, RuntimeError> {
    super::expect_str(args, idx)
}

pub fn table_has(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let id = expect_table(args, 0)?;
    let key = expect_key(args, 1)?;
    let present = match ctx.heap.data(id) {
        HeapData::Table(map) => map.contains_key(key),
        _ => unreachable!("expect_table already validated the variant"),
    };
    Ok(ScriptValue::Bool(present))
}

pub fn table_remove(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let id = expect_table(args, 0)?;
    let key = expect_key(args, 1)?.to_owned();
    let removed = match ctx.heap.data_mut(id) {
        HeapData::Table(map) => map.shift_remove(&key),
        _ => unreachable!("expect_table already validated the variant"),
    };
    match removed {
        Some(v) => Ok(v),
        None => Ok(ScriptValue::Nil),
    }
}

pub fn table_keys(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let id = expect_table(args, 0)?;
    let keys: Vec<String> = match ctx.heap.data(id) {
        HeapData::Table(map) => map.keys().cloned().collect(),
        _ => unreachable!("expect_table already validated the variant"),
    };
    let out_id = ctx.heap.new_array(keys.len(), ctx.tracker)?;
    for key in keys {
        let s = ctx.heap.adopt_string(key, ctx.tracker)?;
        if let HeapData::Array(items) = ctx.heap.data_mut(out_id) {
            items.push(s);
        }
    }
    Ok(ScriptValue::Array(out_id))
}

pub fn table_values(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let id = expect_table(args, 0)?;
    let len = match ctx.heap.data(id) {
        HeapData::Table(map) => map.len(),
        _ => unreachable!("expect_table already validated the variant"),
    };
    let out_id = ctx.heap.new_array(len, ctx.tracker)?;
    for idx in 0..len {
        // Read the key, not the value, to avoid holding a borrow of `ctx.heap` across
        // the retaining call below (see `Heap::table_get_retained`'s own split).
        let key = match ctx.heap.data(id) {
            HeapData::Table(map) => map.get_index(idx).map(|(k, _)| k.clone()),
            _ => unreachable!("expect_table already validated the variant"),
        };
        let Some(key) = key else { continue };
        let retained = ctx
            .heap
            .table_get_retained(id, &key, ctx.tracker)?
            .expect("key came from get_index on the same map");
        if let HeapData::Array(items) = ctx.heap.data_mut(out_id) {
            items.push(retained);
        }
    }
    Ok(ScriptValue::Array(out_id))
}

/// Copies every field of `src` (arg 1) into `dst` (arg 0), overwriting on key collision.
/// Returns `dst` unchanged in identity (mutated in place), matching the in-place style of
/// `array_push`/`array_pop` rather than allocating a fresh merged table.
pub fn table_merge(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let dst_id = expect_table(args, 0)?;
    let src_id = expect_table(args, 1)?;
    // Collect keys first and fetch each through `table_get_retained` rather than
    // retaining while still holding the source map borrowed (see `table_values`).
    let keys: Vec<String> = match ctx.heap.data(src_id) {
        HeapData::Table(map) => map.keys().cloned().collect(),
        _ => unreachable!("expect_table already validated the variant"),
    };
    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let value = ctx
            .heap
            .table_get_retained(src_id, &key, ctx.tracker)?
            .expect("key came from this map's own key list");
        entries.push((key, value));
    }
    for (key, value) in entries {
        let previous = match ctx.heap.data_mut(dst_id) {
            HeapData::Table(map) => map.insert(key, value),
            _ => unreachable!("expect_table already validated the variant"),
        };
        if let Some(old) = previous {
            ctx.heap.release_value(old, ctx.tracker)?;
        }
    }
    Ok(ScriptValue::Table(dst_id))
}

/// The function/state/control triple's "function" leg over a table's fields, in
/// insertion order. Returns `[key, value]`, the same two-element shape
/// `array_helpers::array_next` returns, so the generic-for compiler's fixed
/// two-variable destructuring (`k` from slot 0, `v` from slot 1) works for either
/// iterator without knowing which one it's driving. The position a previous call left
/// off at is recovered by looking the previous key back up via `get_index_of` rather
/// than carrying a separate index slot in the pair.
pub fn table_next(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let id = expect_table(args, 0)?;
    let next_idx = match &args[1] {
        ScriptValue::Array(pair_id) => {
            let prev_key = match ctx.heap.data(*pair_id) {
                HeapData::Array(pair) => match pair.first() {
                    Some(ScriptValue::Str(k)) => k.clone(),
                    _ => return Err(RuntimeError::type_error("malformed iterator control pair")),
                },
                _ => return Err(RuntimeError::type_error("malformed iterator control pair")),
            };
            match ctx.heap.data(id) {
                HeapData::Table(map) => map.get_index_of(prev_key.as_str()).map_or(usize::MAX, |i| i + 1),
                _ => unreachable!("expect_table already validated the variant"),
            }
        }
        ScriptValue::Number(n) => *n as usize,
        ScriptValue::Nil => 0,
        other => {
            return Err(RuntimeError::type_error(format!(
                "expected a number, nil, or iterator-pair control, found {}",
                other.type_name()
            )))
        }
    };
    let key = match ctx.heap.data(id) {
        HeapData::Table(map) => map.get_index(next_idx).map(|(k, _)| k.clone()),
        _ => unreachable!("expect_table already validated the variant"),
    };
    let Some(key) = key else {
        return Ok(ScriptValue::Nil);
    };
    let value = ctx
        .heap
        .table_get_retained(id, &key, ctx.tracker)?
        .expect("key came from get_index on the same map");
    let key_value = ctx.heap.adopt_string(key, ctx.tracker)?;
    let pair_id = ctx.heap.new_array(2, ctx.tracker)?;
    if let HeapData::Array(pair) = ctx.heap.data_mut(pair_id) {
        pair.push(key_value);
        pair.push(value);
    }
    Ok(ScriptValue::Array(pair_id))
}

pub fn register() -> Vec<(&'static str, crate::function::NativeFn)> {
    vec![
        ("table_has", Box::new(table_has)),
        ("table_remove", Box::new(table_remove)),
        ("table_keys", Box::new(table_keys)),
        ("table_values", Box::new(table_values)),
        ("table_merge", Box::new(table_merge)),
        ("table_next", Box::new(table_next)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capability::SecurityContext, heap::Heap, resource::NoLimitTracker};

    fn ctx<'a>(heap: &'a mut Heap, tracker: &'a mut NoLimitTracker, security: &'a SecurityContext) -> NativeContext<'a> {
        NativeContext { heap, tracker, security }
    }

    #[test]
    fn has_and_remove() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let id = heap.new_table(&mut tracker).unwrap();
        if let HeapData::Table(map) = heap.data_mut(id) {
            map.insert("a".to_owned(), ScriptValue::Number(1.0));
        }

        let present = table_has(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Table(id), ScriptValue::Str("a".into())]).unwrap();
        assert!(matches!(present, ScriptValue::Bool(true)));

        let removed = table_remove(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Table(id), ScriptValue::Str("a".into())]).unwrap();
        assert!(matches!(removed, ScriptValue::Number(n) if n == 1.0));

        let present = table_has(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Table(id), ScriptValue::Str("a".into())]).unwrap();
        assert!(matches!(present, ScriptValue::Bool(false)));
    }

    #[test]
    fn merge_overwrites_on_collision() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let dst = heap.new_table(&mut tracker).unwrap();
        let src = heap.new_table(&mut tracker).unwrap();
        if let HeapData::Table(map) = heap.data_mut(dst) {
            map.insert("a".to_owned(), ScriptValue::Number(1.0));
        }
        if let HeapData::Table(map) = heap.data_mut(src) {
            map.insert("a".to_owned(), ScriptValue::Number(2.0));
            map.insert("b".to_owned(), ScriptValue::Number(3.0));
        }
        table_merge(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Table(dst), ScriptValue::Table(src)]).unwrap();
        let HeapData::Table(map) = heap.data(dst) else { panic!() };
        assert_eq!(map.len(), 2);
        assert!(matches!(map.get("a"), Some(ScriptValue::Number(n)) if *n == 2.0));
    }

    #[test]
    fn next_walks_fields_in_insertion_order() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let id = heap.new_table(&mut tracker).unwrap();
        if let HeapData::Table(map) = heap.data_mut(id) {
            map.insert("x".to_owned(), ScriptValue::Number(1.0));
            map.insert("y".to_owned(), ScriptValue::Number(2.0));
        }

        let step1 = table_next(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Table(id), ScriptValue::Number(0.0)]).unwrap();
        let ScriptValue::Array(pair1) = step1 else { panic!("expected pair") };
        let HeapData::Array(p1) = heap.data(pair1) else { panic!() };
        assert!(matches!(&p1[0], ScriptValue::Str(s) if s == "x"));
        assert!(matches!(p1[1], ScriptValue::Number(n) if n == 1.0));

        let step2 = table_next(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Table(id), ScriptValue::Array(pair1)]).unwrap();
        let ScriptValue::Array(pair2) = step2 else { panic!("expected pair") };
        let HeapData::Array(p2) = heap.data(pair2) else { panic!() };
        assert!(matches!(&p2[0], ScriptValue::Str(s) if s == "y"));
        assert!(matches!(p2[1], ScriptValue::Number(n) if n == 2.0));

        let step3 = table_next(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Table(id), ScriptValue::Array(pair2)]).unwrap();
        assert!(matches!(step3, ScriptValue::Nil));
    }
}
