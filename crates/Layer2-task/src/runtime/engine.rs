//! Script engine setup and callable reconstruction

use super::failure::{Failure, Unit};
use crate::callable::MODULE_ENTRY;
use crate::protocol::ContextVars;
use rhai::module_resolvers::FileModuleResolver;
use rhai::{Dynamic, Engine, FnPtr, Scope, AST, INT};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Engine exposing only the task's context: `filename()`, `dirname()`,
/// `sleep(ms)` and `import` resolved against the context directory.
pub(crate) fn build_engine(context: &ContextVars) -> Engine {
    let mut engine = Engine::new();

    engine.set_module_resolver(FileModuleResolver::new_with_path(
        context.dir_path.clone(),
    ));

    let file = context.file_path.to_string_lossy().into_owned();
    engine.register_fn("filename", move || file.clone());

    let dir = context.dir_path.to_string_lossy().into_owned();
    engine.register_fn("dirname", move || dir.clone());

    engine.register_fn("sleep", |ms: INT| {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms as u64));
        }
    });

    // stdout carries the protocol
    engine.on_print(|text| info!(target: "branchy::script", "{}", text));
    engine.on_debug(|text, source, pos| {
        debug!(target: "branchy::script", source = source.unwrap_or(""), "[{}] {}", pos, text)
    });

    engine
}

/// The one-line prelude binding the context variables.
///
/// Must stay a single line: stack remapping subtracts a fixed line count.
pub(crate) fn prelude(context: &ContextVars) -> String {
    format!(
        "const __filename = {}; const __dirname = {};",
        quote(&context.file_path.to_string_lossy()),
        quote(&context.dir_path.to_string_lossy())
    )
}

pub(crate) fn wrap_inline(source: &str, context: &ContextVars) -> String {
    format!("{}\n{}", prelude(context), source)
}

/// Script string literal; control characters are escaped so the literal
/// never spans lines.
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub(crate) fn run_inline(
    engine: &Engine,
    source: &str,
    context: &ContextVars,
    args: Vec<Dynamic>,
) -> Result<Dynamic, Failure> {
    let unit = Unit::Inline;
    let script = wrap_inline(source, context);

    let ast = engine
        .compile(&script)
        .map_err(|e| Failure::from_parse(&e, &unit))?;

    let mut scope = Scope::new();
    let callable: Dynamic = engine
        .eval_ast_with_scope(&mut scope, &ast)
        .map_err(|e| Failure::from_eval(&e, &unit))?;

    let type_name = callable.type_name();
    let fn_ptr = callable.try_cast::<FnPtr>().ok_or_else(|| {
        Failure::type_error(format!(
            "inline task must evaluate to a closure, got {}",
            type_name
        ))
    })?;

    if let Some(expected) = closure_arity(&ast, &fn_ptr) {
        if expected != args.len() {
            return Err(Failure::type_error(format!(
                "inline task expects {} argument{}, got {}",
                expected,
                if expected == 1 { "" } else { "s" },
                args.len()
            )));
        }
    }

    fn_ptr
        .call::<Dynamic>(engine, &ast, args)
        .map_err(|e| Failure::from_eval(&e, &unit))
}

/// Parameters the caller must supply; captured variables are curried in
fn closure_arity(ast: &AST, fn_ptr: &FnPtr) -> Option<usize> {
    ast.iter_functions()
        .find(|f| f.name == fn_ptr.fn_name())
        .map(|f| f.params.len().saturating_sub(fn_ptr.curry().len()))
}

pub(crate) fn run_module(
    engine: &Engine,
    path: &Path,
    context: &ContextVars,
    args: Vec<Dynamic>,
) -> Result<Dynamic, Failure> {
    let unit = Unit::Module(path);

    let ast = engine
        .compile_file(path.to_path_buf())
        .map_err(|e| Failure::from_eval(&e, &unit))?;

    let mut scope = Scope::new();
    scope.push_constant("__filename", context.file_path.to_string_lossy().into_owned());
    scope.push_constant("__dirname", context.dir_path.to_string_lossy().into_owned());

    // Top-level statements run first, then the entry point
    engine
        .call_fn::<Dynamic>(&mut scope, &ast, MODULE_ENTRY, args)
        .map_err(|e| Failure::from_eval(&e, &unit))
}

pub(crate) fn to_script_args(args: &[Value]) -> Result<Vec<Dynamic>, Failure> {
    args.iter()
        .enumerate()
        .map(|(index, arg)| {
            rhai::serde::to_dynamic(arg).map_err(|e| {
                Failure::type_error(format!("argument {} cannot be passed to the task: {}", index, e))
            })
        })
        .collect()
}

pub(crate) fn to_wire_value(value: &Dynamic) -> Result<Value, Failure> {
    rhai::serde::from_dynamic::<Value>(value).map_err(|e| {
        Failure::type_error(format!(
            "task result of type {} cannot be sent back: {}",
            value.type_name(),
            e
        ))
    })
}
