//! Conversion helpers (spec §4.7 "conversion: to-string, to-number, type-of").

use super::check_arity;
use crate::{error::RuntimeError, function::NativeContext, value::ScriptValue};

pub fn to_string(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    let s = match &args[0] {
        ScriptValue::Str(s) => s.clone(),
        other => other.to_string(),
    };
    ctx.heap.adopt_string(s, ctx.tracker)
}

pub fn to_number(_ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    Ok(match &args[0] {
        ScriptValue::Number(n) => ScriptValue::Number(*n),
        ScriptValue::Str(s) => match s.trim().parse::<f64>() {
            Ok(n) => ScriptValue::Number(n),
            Err(_) => ScriptValue::Nil,
        },
        ScriptValue::Bool(b) => ScriptValue::Number(if *b { 1.0 } else { 0.0 }),
        _ => ScriptValue::Nil,
    })
}

pub fn type_of(ctx: &mut NativeContext, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    check_arity(args, 1)?;
    ctx.heap.adopt_string(args[0].type_name().to_owned(), ctx.tracker)
}

pub fn register() -> Vec<(&'static str, crate::function::NativeFn)> {
    vec![
        ("to_string", Box::new(to_string)),
        ("to_number", Box::new(to_number)),
        ("type_of", Box::new(type_of)),
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
    fn to_number_parses_trimmed_strings() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let v = to_number(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Str(" 42 ".into())]).unwrap();
        assert!(matches!(v, ScriptValue::Number(n) if n == 42.0));
    }

    #[test]
    fn to_number_non_numeric_string_is_nil() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let v = to_number(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Str("nope".into())]).unwrap();
        assert!(matches!(v, ScriptValue::Nil));
    }

    #[test]
    fn type_of_reports_names() {
        let mut heap = Heap::new(false);
        let mut tracker = NoLimitTracker::new();
        let security = SecurityContext::locked_down();
        let v = type_of(&mut ctx(&mut heap, &mut tracker, &security), &[ScriptValue::Bool(true)]).unwrap();
        assert!(matches!(v, ScriptValue::Str(s) if s == "boolean"));
    }
}
