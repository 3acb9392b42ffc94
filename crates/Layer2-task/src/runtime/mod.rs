//! Worker runtime - the code running inside a spawned worker process
//!
//! Receives one dispatch, rebuilds the callable inside a fresh script engine
//! that only sees the task's context, runs it, and reports exactly one
//! completion. The `branchy-worker` binary exits as soon as [`WorkerRuntime::serve`]
//! returns.

mod engine;
mod failure;

use crate::callable::CallableSource;
use crate::protocol::{decode_line, encode_line, Completion, Dispatch};
use branchy_foundation::Result;
use std::io::{BufRead, Write};
use tracing::{debug, warn};

use self::engine::{build_engine, run_inline, run_module, to_script_args, to_wire_value};

/// Completion name used when the dispatch itself is unusable
pub const PROTOCOL_ERROR: &str = "ProtocolError";

#[derive(Debug, Clone, Default)]
pub struct WorkerRuntime;

impl WorkerRuntime {
    pub fn new() -> Self {
        Self
    }

    /// Run one dispatch to completion
    pub fn execute(&self, dispatch: &Dispatch) -> Completion {
        debug!(
            task = %dispatch.id,
            kind = dispatch.callable_source.kind(),
            file = %dispatch.context.file_path.display(),
            "Executing task"
        );

        let engine = build_engine(&dispatch.context);

        let outcome = to_script_args(&dispatch.args).and_then(|args| {
            let value = match &dispatch.callable_source {
                CallableSource::Inline { source } => {
                    run_inline(&engine, source, &dispatch.context, args)?
                }
                CallableSource::Module { path } => {
                    run_module(&engine, path, &dispatch.context, args)?
                }
            };
            to_wire_value(&value)
        });

        match outcome {
            Ok(value) => Completion::Result { value },
            Err(failure) => {
                debug!(task = %dispatch.id, name = %failure.name, "Task failed: {}", failure.message);
                failure.into_completion(&dispatch.context.file_path)
            }
        }
    }

    /// Read one dispatch line from `input`, write one completion line to
    /// `output`. Always writes a completion unless `output` itself fails.
    pub fn serve<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> Result<Completion> {
        let mut line = String::new();
        let read = input.read_line(&mut line)?;

        let completion = if read == 0 {
            warn!("Input closed before a dispatch arrived");
            Completion::error(PROTOCOL_ERROR, "no dispatch message received", "")
        } else {
            match decode_line::<Dispatch>(&line) {
                Ok(dispatch) => self.execute(&dispatch),
                Err(e) => {
                    warn!("Malformed dispatch: {}", e);
                    Completion::error(PROTOCOL_ERROR, e.to_string(), "")
                }
            }
        };

        output.write_all(encode_line(&completion)?.as_bytes())?;
        output.flush()?;

        Ok(completion)
    }
}
