//! Array helpers (spec §4.7 "array helpers: push, pop, length, iteration").
//!
//! `array_next` is the "function" leg of a generic-for's function/state/control triple
//! (spec §4.3 "generic for"): `for i, v in array_next, arr, 0 do ... end`. The VM's
//! `exec_iter_next` (see `bytecode/vm/collections.rs`) always rebinds the loop's control
//! register to whatever the iterator function returns in full — there is no dedicated
//! "next key" slot in the calling convention — so `array_next` always returns a
//! `[index, value]` pair: a two-variable generic for destructures it into `i, v`, a
//! one-variable form just binds the whole pair. The incoming control is either the
//! literal the loop header was written with (a bare number, on the first call) or a
//! previously-returned pair (from which element 0, the previous index, is read and
//! advanced).

use super::check_arity;
use crate::{error::RuntimeError, function::NativeContext, heap::HeapData, value::ScriptValue};

fn expect_array(args: &[ScriptValue], idx: usize) -> Result<crate::heap::HeapId, RuntimeError> {
    match &args[idx] {
        ScriptValue::Array(id) => Ok(*id),
        other => Err(RuntimeError::type_error(format!(
            "expected an array argument, found {}",
            other.type_name()
        ))),
    }
}

pub fn array_push(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let id = expect_array(args, 0)?;
    let value = ctx.heap.retain_into_slot(&args[1], ctx.tracker)?;
    match ctx.heap.data_mut(id) {
        HeapData::Array(items) => items.push(value),
        _ => unreachable!("expect_array already validated the variant"),
    }
    Ok(ScriptValue::Nil)
}

pub fn array_pop(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let id = expect_array(args, 0)?;
    let popped = match ctx.heap.data_mut(id) {
        HeapData::Array(items) => items.pop(),
        _ => unreachable!("expect_array already validated the variant"),
    };
    Ok(popped.unwrap_or(ScriptValue::Nil))
}

pub fn array_len(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let id = expect_array(args, 0)?;
    let len = match ctx.heap.data(id) {
        HeapData::Array(items) => items.len(),
        _ => unreachable!("expect_array already validated the variant"),
    };
    Ok(ScriptValue::Number(len as f64))
}

/// The function/state/control triple's "function" leg: given the array (state) and the
/// previous control, returns `nil` once exhausted, else `[index, value]` for the next
/// element (0-based index, matching `arr[i]` indexing elsewhere in the language).
pub fn array_next(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let id = expect_array(args, 0)?;
    let next_idx = match &args[1] {
        ScriptValue::Array(pair_id) => match ctx.heap.data(*pair_id) {
            HeapData::Array(pair) => match pair.first() {
                Some(ScriptValue::Number(prev)) => *prev as usize + 1,
                _ => return Err(RuntimeError::type_error("malformed iterator control pair")),
            },
            _ => return Err(RuntimeError::type_error("malformed iterator control pair")),
        },
        ScriptValue::Number(n) => *n as usize,
        other => {
            return Err(RuntimeError::type_error(format!(
                "expected a number or iterator-pair control, found {}",
                other.type_name()
            )))
        }
    };
    let len = match ctx.heap.data(id) {
        HeapData::Array(items) => items.len(),
        _ => unreachable!("expect_array already validated the variant"),
    };
    if next_idx >= len {
        return Ok(ScriptValue::Nil);
    }
    let value = ctx
        .heap
        .array_get_retained(id, next_idx, ctx.tracker)?
        .expect("next_idx < len");
    let pair_id = ctx.heap.new_array(2, ctx.tracker)?;
    if let HeapData::Array(pair) = ctx.heap.data_mut(pair_id) {
        pair.push(ScriptValue::Number(next_idx as f64));
        pair.push(value);
    }
    Ok(ScriptValue::Array(pair_id))
}

pub fn register() -> Vec<(&'static str, crate::function::NativeFn)> {
    vec![
        ("array_push", Box::new(array_push)),
        ("array_pop", Box::new(array_pop)),
        ("array_len", Box::new(array_len)),
        ("array_next", Box::new(array_next)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capability::SecurityContext, heap::Heap, resource::NoLimitTracker};

    fn ctx<'a>(heap: &'a mut Heap, tracker: &'a mut NoLimitTracker, security: &'a SecurityContext) -> NativeContext<'a> {
        NativeContext { heap, tracker, security }
    }

    fn as_number(v: &ScriptValue) -> f64 {
        match v {
            ScriptValue::Number(n) => *n,
            other => panic!("expected a number, found {other:?}"),
        }
    }

    #[test]
    fn push_pop_len_round_trip() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let id = heap.new_array(0, &mut tracker).unwrap();

        array_push(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Array(id), ScriptValue::Number(1.0)]).unwrap();
        array_push(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Array(id), ScriptValue::Number(2.0)]).unwrap();

        let len = array_len(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Array(id)]).unwrap();
        assert_eq!(as_number(&len), 2.0);

        let popped = array_pop(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Array(id)]).unwrap();
        assert_eq!(as_number(&popped), 2.0);
    }

    #[test]
    fn next_walks_to_nil() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let id = heap.new_array(0, &mut tracker).unwrap();
        if let HeapData::Array(items) = heap.data_mut(id) {
            items.push(ScriptValue::Number(10.0));
            items.push(ScriptValue::Number(20.0));
        }

        let step1 = array_next(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Array(id), ScriptValue::Number(0.0)]).unwrap();
        let ScriptValue::Array(pair1) = step1 else { panic!("expected pair") };
        let HeapData::Array(p1) = heap.data(pair1) else { panic!() };
        assert_eq!(as_number(&p1[0]), 0.0);
        assert_eq!(as_number(&p1[1]), 10.0);

        let step2 = array_next(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Array(id), ScriptValue::Array(pair1)]).unwrap();
        let ScriptValue::Array(pair2) = step2 else { panic!("expected pair") };
        let HeapData::Array(p2) = heap.data(pair2) else { panic!() };
        assert_eq!(as_number(&p2[0]), 1.0);
        assert_eq!(as_number(&p2[1]), 20.0);

        let step3 = array_next(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Array(id), ScriptValue::Array(pair2)]).unwrap();
        assert!(matches!(step3, ScriptValue::Nil));
    }
}
