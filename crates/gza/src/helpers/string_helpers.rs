//! String helpers (spec §4.7 "length, case, substring, split, join, concat, trim, find,
//! replace") plus the pattern-backed `str_match`/`str_gsub` that `str_find`/`str_replace`
//! are thin wrappers over.

use super::{check_arity, expect_str};
use crate::{error::RuntimeError, function::NativeContext, heap::HeapData, value::ScriptValue};

use super::pattern;

pub fn str_len(_ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let s = expect_str(args, 0)?;
    Ok(ScriptValue::Number(s.len() as f64))
}

pub fn str_upper(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let s = expect_str(args, 0)?.to_uppercase();
    ctx.heap.adopt_string(s, ctx.tracker)
}

pub fn str_lower(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let s = expect_str(args, 0)?.to_lowercase();
    ctx.heap.adopt_string(s, ctx.tracker)
}

pub fn str_trim(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let s = expect_str(args, 0)?.trim().to_owned();
    ctx.heap.adopt_string(s, ctx.tracker)
}

/// `str_sub(s, start, stop)`: a 0-based, end-exclusive byte-range slice, clamped to the
/// string's bounds rather than raising on an out-of-range `stop` (matching the
/// permissive, non-strict-indexing default for array indexing elsewhere in the
/// language — see DESIGN.md "Strict indexing").
pub fn str_sub(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 3)?;
    let s = expect_str(args, 0)?;
    let start = super::expect_number(args, 1)? as usize;
    let stop = super::expect_number(args, 2)? as usize;
    let start = start.min(s.len());
    let stop = stop.min(s.len()).max(start);
    let slice = s[start..stop].to_owned();
    ctx.heap.adopt_string(slice, ctx.tracker)
}

pub fn str_concat(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let mut out = expect_str(args, 0)?.to_owned();
    out.push_str(expect_str(args, 1)?);
    ctx.heap.adopt_string(out, ctx.tracker)
}

/// `str_split(s, sep)`: splits on a literal separator (not a pattern), returning an
/// array of the pieces. An empty `sep` splits into one-byte-wide pieces.
pub fn str_split(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let s = expect_str(args, 0)?.to_owned();
    let sep = expect_str(args, 1)?.to_owned();
    let pieces: Vec<String> = if sep.is_empty() {
        s.split("").filter(|p| !p.is_empty()).map(str::to_owned).collect()
    } else {
        s.split(sep.as_str()).map(str::to_owned).collect()
    };
    let id = ctx.heap.new_array(pieces.len(), ctx.tracker)?;
    for piece in pieces {
        let v = ctx.heap.adopt_string(piece, ctx.tracker)?;
        if let HeapData::Array(items) = ctx.heap.data_mut(id) {
            items.push(v);
        }
    }
    Ok(ScriptValue::Array(id))
}

/// `str_join(arr, sep)`: the inverse of `str_split`, joining an array of strings.
pub fn str_join(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let id = match &args[0] {
        ScriptValue::Array(id) => *id,
        other => return Err(RuntimeError::type_error(format!("expected an array argument, found {}", other.type_name()))),
    };
    let sep = expect_str(args, 1)?;
    let pieces: Vec<String> = match ctx.heap.data(id) {
        HeapData::Array(items) => items
            .iter()
            .map(|v| match v {
                ScriptValue::Str(s) => Ok(s.clone()),
                other => Err(RuntimeError::type_error(format!("str_join: expected a string element, found {}", other.type_name()))),
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(RuntimeError::type_error("expected an array argument")),
    };
    ctx.heap.adopt_string(pieces.join(sep), ctx.tracker)
}

/// `str_find(s, pattern)`: returns `[start, stop]` (0-based, end-exclusive) of the first
/// match, or `nil` if the pattern doesn't match.
pub fn str_find(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let s = expect_str(args, 0)?;
    let pat = expect_str(args, 1)?;
    let Some(m) = pattern::find(s, pat, 0)? else {
        return Ok(ScriptValue::Nil);
    };
    let id = ctx.heap.new_array(2, ctx.tracker)?;
    if let HeapData::Array(items) = ctx.heap.data_mut(id) {
        items.push(ScriptValue::Number(m.start as f64));
        items.push(ScriptValue::Number(m.end as f64));
    }
    Ok(ScriptValue::Array(id))
}

/// `str_match(s, pattern)`: returns an array of captured substrings (or, if the pattern
/// has no `(...)` groups, a one-element array holding the whole match), or `nil`.
pub fn str_match(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 2)?;
    let s = expect_str(args, 0)?;
    let pat = expect_str(args, 1)?;
    let Some(m) = pattern::find(s, pat, 0)? else {
        return Ok(ScriptValue::Nil);
    };
    let pieces: Vec<String> = if m.captures.is_empty() {
        vec![s[m.start..m.end].to_owned()]
    } else {
        m.captures.iter().map(|(cs, ce)| s[*cs..*ce].to_owned()).collect()
    };
    let id = ctx.heap.new_array(pieces.len(), ctx.tracker)?;
    for piece in pieces {
        let v = ctx.heap.adopt_string(piece, ctx.tracker)?;
        if let HeapData::Array(items) = ctx.heap.data_mut(id) {
            items.push(v);
        }
    }
    Ok(ScriptValue::Array(id))
}

/// `str_replace(s, pattern, repl)`: replaces every match, expanding `%0`..`%9`/`%%` in
/// `repl` (spec §4.7 "global substitution ... with `%1..%9` backreferences").
pub fn str_replace(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 3)?;
    let s = expect_str(args, 0)?;
    let pat = expect_str(args, 1)?;
    let repl = expect_str(args, 2)?;
    let (out, _count) = pattern::gsub(s, pat, repl, None)?;
    ctx.heap.adopt_string(out, ctx.tracker)
}

pub fn register() -> Vec<(&'static str, crate::function::NativeFn)> {
    vec![
        ("str_len", Box::new(str_len)),
        ("str_upper", Box::new(str_upper)),
        ("str_lower", Box::new(str_lower)),
        ("str_trim", Box::new(str_trim)),
        ("str_sub", Box::new(str_sub)),
        ("str_concat", Box::new(str_concat)),
        ("str_split", Box::new(str_split)),
        ("str_join", Box::new(str_join)),
        ("str_find", Box::new(str_find)),
        ("str_match", Box::new(str_match)),
        ("str_replace", Box::new(str_replace)),
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
    fn upper_lower_trim() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let upper = str_upper(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Str("abc".into())]).unwrap();
        assert!(matches!(upper, ScriptValue::Str(s) if s == "ABC"));
        let trimmed = str_trim(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Str("  hi  ".into())]).unwrap();
        assert!(matches!(trimmed, ScriptValue::Str(s) if s == "hi"));
    }

    #[test]
    fn split_and_join_round_trip() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let split = str_split(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Str("a,b,c".into()), ScriptValue::Str(",".into())]).unwrap();
        let ScriptValue::Array(id) = split else { panic!("expected array") };
        let HeapData::Array(items) = heap.data(id) else { panic!() };
        assert_eq!(items.len(), 3);
        let joined = str_join(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Array(id), ScriptValue::Str("-".into())]).unwrap();
        assert!(matches!(joined, ScriptValue::Str(s) if s == "a-b-c"));
    }

    #[test]
    fn find_returns_byte_range() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let found = str_find(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Str("hello world".into()), ScriptValue::Str("world".into())]).unwrap();
        let ScriptValue::Array(id) = found else { panic!("expected array") };
        let HeapData::Array(items) = heap.data(id) else { panic!() };
        assert!(matches!(items[0], ScriptValue::Number(n) if n == 6.0));
        assert!(matches!(items[1], ScriptValue::Number(n) if n == 11.0));
    }

    #[test]
    fn replace_expands_backreferences() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let replaced = str_replace(
            &mut ctx(&mut heap, &mut tracker, &security),
            &[ScriptValue::Str("a=1,b=2".into()), ScriptValue::Str("(%a)=(%d)".into()), ScriptValue::Str("%2=%1".into())],
        )
        .unwrap();
        assert!(matches!(replaced, ScriptValue::Str(s) if s == "1=a,2=b"));
    }
}
