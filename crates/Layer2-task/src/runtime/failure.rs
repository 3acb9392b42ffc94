//! Turning engine errors into completion reports

use crate::protocol::Completion;
use crate::stack::{self, FrameOrigin, StackFrame};
use regex::Regex;
use rhai::{Dynamic, EvalAltResult, Map, ParseError, Position};
use std::path::Path;
use std::sync::OnceLock;

/// Which kind of code was running, for frames the engine reports without a
/// source name
pub(crate) enum Unit<'a> {
    Inline,
    Module(&'a Path),
}

impl Unit<'_> {
    fn origin_for(&self, source: &str) -> FrameOrigin {
        if !source.is_empty() {
            return FrameOrigin::File(source.to_string());
        }
        match self {
            Unit::Inline => FrameOrigin::Synthetic,
            Unit::Module(path) => FrameOrigin::File(path.to_string_lossy().into_owned()),
        }
    }
}

/// A failed task, before it is put on the wire
#[derive(Debug, Clone)]
pub(crate) struct Failure {
    pub name: String,
    pub message: String,
    /// Innermost first, as the engine reported them
    pub frames: Vec<StackFrame>,
    /// Engine text, forwarded when no frame can be remapped
    pub raw: String,
}

struct Call {
    function: String,
    source: String,
    position: Position,
}

impl Failure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        Self {
            raw: format!("{}: {}", name, message),
            name,
            message,
            frames: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn from_parse(err: &ParseError, unit: &Unit<'_>) -> Self {
        let mut failure = Self::new("SyntaxError", err.0.to_string());
        failure.frames = vec![frame("<main>", unit.origin_for(""), err.1)];
        failure.raw = err.to_string();
        failure
    }

    pub fn from_eval(err: &EvalAltResult, unit: &Unit<'_>) -> Self {
        // Unwind nested calls, outermost first
        let mut calls = Vec::new();
        let mut leaf = err;
        loop {
            match leaf {
                EvalAltResult::ErrorInFunctionCall(function, source, inner, position) => {
                    calls.push(Call {
                        function: display_function(function),
                        source: source.clone(),
                        position: *position,
                    });
                    leaf = &**inner;
                }
                EvalAltResult::ErrorInModule(path, inner, position) => {
                    calls.push(Call {
                        function: "<module>".to_string(),
                        source: path.clone(),
                        position: *position,
                    });
                    leaf = &**inner;
                }
                _ => break,
            }
        }

        let (name, message) = classify(leaf);

        // Closure names are internal hashes; only the name/message are useful
        if is_closure_lookup(leaf) {
            return Self::new(name, message);
        }

        // Innermost frame: where the error was raised
        let mut frames = Vec::with_capacity(calls.len() + 1);
        let (function, source) = calls
            .last()
            .map(|c| (c.function.as_str(), c.source.as_str()))
            .unwrap_or(("<main>", ""));
        frames.push(frame(function, unit.origin_for(source), leaf.position()));

        // Then each call site, inside its caller
        for index in (0..calls.len()).rev() {
            let (function, source) = if index == 0 {
                ("<main>", "")
            } else {
                (calls[index - 1].function.as_str(), calls[index - 1].source.as_str())
            };
            frames.push(frame(function, unit.origin_for(source), calls[index].position));
        }

        Self {
            name,
            message,
            frames,
            raw: err.to_string(),
        }
    }

    /// Remap against `context_path` and build the error completion
    pub fn into_completion(self, context_path: &Path) -> Completion {
        let stack = match stack::remap(&self.frames, context_path) {
            Some(frames) => stack::render(&frames),
            None => self.raw,
        };
        Completion::error(self.name, self.message, stack)
    }
}

fn frame(function: &str, origin: FrameOrigin, position: Position) -> StackFrame {
    if position.is_none() {
        return StackFrame::new(function, FrameOrigin::Runtime, None, None);
    }
    StackFrame::new(function, origin, position.line(), position.position())
}

/// Closures compile to `anon$<hash>` functions
fn display_function(name: &str) -> String {
    if name.starts_with("anon$") {
        "<closure>".to_string()
    } else {
        name.to_string()
    }
}

fn is_closure_lookup(err: &EvalAltResult) -> bool {
    matches!(err, EvalAltResult::ErrorFunctionNotFound(signature, _) if signature.starts_with("anon$"))
}

fn classify(err: &EvalAltResult) -> (String, String) {
    let name = match err {
        EvalAltResult::ErrorRuntime(value, _) => return thrown(value),
        EvalAltResult::ErrorFunctionNotFound(..) if is_closure_lookup(err) => {
            return (
                "TypeError".to_string(),
                "inline task called with the wrong number of arguments".to_string(),
            )
        }
        EvalAltResult::ErrorVariableNotFound(..) | EvalAltResult::ErrorFunctionNotFound(..) => {
            "ReferenceError"
        }
        EvalAltResult::ErrorMismatchDataType(..) | EvalAltResult::ErrorMismatchOutputType(..) => {
            "TypeError"
        }
        EvalAltResult::ErrorArrayBounds(..) | EvalAltResult::ErrorStringBounds(..) => "RangeError",
        EvalAltResult::ErrorArithmetic(..) => "ArithmeticError",
        EvalAltResult::ErrorParsing(..) => "SyntaxError",
        EvalAltResult::ErrorModuleNotFound(..) => "ModuleNotFoundError",
        _ => "Error",
    };
    (name.to_string(), strip_position(&err.to_string()))
}

/// `throw #{name: "DomainError", message: "x"}` keeps its name; anything
/// else thrown is a plain `Error` carrying the value's text.
fn thrown(value: &Dynamic) -> (String, String) {
    if let Some(map) = value.clone().try_cast::<Map>() {
        let field = |key: &str| map.get(key).map(|v| v.to_string());
        if let Some(message) = field("message") {
            let name = field("name").unwrap_or_else(|| "Error".to_string());
            return (name, message);
        }
    }
    if value.is_unit() {
        return ("Error".to_string(), String::new());
    }
    ("Error".to_string(), value.to_string())
}

fn strip_position(text: &str) -> String {
    static POSITION: OnceLock<Regex> = OnceLock::new();
    let re = POSITION.get_or_init(|| {
        Regex::new(r"\s*\(line \d+, position \d+\)$").expect("valid position regex")
    });
    re.replace(text.trim_end(), "").into_owned()
}
