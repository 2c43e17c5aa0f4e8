use std::{env, fs, process::ExitCode};

use gza::{Engine, EngineConfig, RuntimeErrorKind, ScriptValue};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { &args[1] } else { "example.gza" };
    let source = match read_file(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::create(EngineConfig::new());
    if let Err(err) = engine.register_helpers() {
        eprintln!("error:\n{err}");
        return ExitCode::FAILURE;
    }

    let script = match engine.load_script(&source) {
        Ok(script) => script,
        Err(err) => {
            eprintln!("parse error:\n{err}");
            return ExitCode::FAILURE;
        }
    };

    match engine.run(&script) {
        Ok(value) => {
            println!("{}", canonical_form(&value));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error:\n{err}");
            if matches!(err.kind, RuntimeErrorKind::OutOfMemory | RuntimeErrorKind::MemoryLimitExceeded) {
                print_memory_context(&engine);
            }
            ExitCode::FAILURE
        }
    }
}

/// The result's canonical printed form (spec §6): `nil`, `true`/`false`, decimal number,
/// quoted string for primitives; `<array>`/`<table>` placeholders for aggregates.
/// `ScriptValue`'s own `Display` impl already produces exactly this.
fn canonical_form(value: &ScriptValue) -> String {
    value.to_string()
}

/// Enumerates globals holding live aggregates (value kind, length, reference count) plus
/// a remediation hint, emitted on `OutOfMemory`/`MemoryLimitExceeded` (spec §6).
fn print_memory_context(engine: &Engine) {
    eprintln!("\nmemory context:");
    let mut names: Vec<&str> = engine.global_names().collect();
    names.sort_unstable();
    let mut any = false;
    for name in names {
        let Some(value) = engine.get_global(name) else { continue };
        let Some(ref_count) = engine.ref_count_of(value) else { continue };
        any = true;
        let len = engine.aggregate_len(value).map_or_else(String::new, |n| format!(", length {n}"));
        eprintln!("  {name}: {} (refcount {ref_count}{len})", value.type_name());
    }
    if !any {
        eprintln!("  (no live aggregates bound to a global)");
    }
    let stats = engine.heap_stats();
    eprintln!(
        "  heap: {} live object(s), {} tracked byte(s)",
        stats.live_objects, stats.tracked_bytes
    );
    eprintln!("hint: reduce script-held aggregate size or raise EngineConfig::with_memory_limit.");
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("{file_path} is not a file"));
            }
        }
        Err(err) => return Err(format!("reading {file_path}: {err}")),
    }
    fs::read_to_string(file_path).map_err(|err| format!("reading {file_path}: {err}"))
}
