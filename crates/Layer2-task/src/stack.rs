//! Stack frames and remapping
//!
//! Inline tasks run as `PRELUDE + source`, so every position the engine
//! reports inside them is off by the prelude's line count and points at code
//! that exists nowhere on disk. Those frames are rewritten to the task's
//! context path; frames the engine cannot place (host calls) end the trace.

use std::fmt;
use std::path::Path;

/// Lines the inline wrapper injects before the callable's first line
pub const WRAPPER_PRELUDE_LINES: usize = 1;

/// Origin marker printed for reconstructed inline code
pub const SYNTHETIC_ORIGIN: &str = "<anonymous>";

/// Where a frame's code came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Inline source reconstructed inside the worker
    Synthetic,

    /// A real file: a module task or an imported module
    File(String),

    /// Host-side call with no script position
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub origin: FrameOrigin,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl StackFrame {
    pub fn new(
        function: impl Into<String>,
        origin: FrameOrigin,
        line: Option<usize>,
        column: Option<usize>,
    ) -> Self {
        Self {
            function: function.into(),
            origin,
            line,
            column,
        }
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self.origin, FrameOrigin::Runtime)
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = match &self.origin {
            FrameOrigin::Synthetic => SYNTHETIC_ORIGIN,
            FrameOrigin::File(path) => path.as_str(),
            FrameOrigin::Runtime => return write!(f, "    at {} (native)", self.function),
        };

        write!(
            f,
            "    at {} ({}:{}:{})",
            self.function,
            location,
            self.line.unwrap_or(0),
            self.column.unwrap_or(0)
        )
    }
}

/// One frame per line, innermost first
pub fn render(frames: &[StackFrame]) -> String {
    frames
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite `frames` (innermost first) so they point at `context_path`.
///
/// Keeps the leading run of frames that have a script position, drops the
/// rest, and shifts synthetic frames up by [`WRAPPER_PRELUDE_LINES`]. A
/// synthetic frame inside the prelude itself belongs to the wrapper and is
/// dropped. Returns `None` when no frame is attributable to the task, in
/// which case the caller forwards the raw trace.
pub fn remap(frames: &[StackFrame], context_path: &Path) -> Option<Vec<StackFrame>> {
    let context = context_path.to_string_lossy();

    let remapped: Vec<StackFrame> = frames
        .iter()
        .take_while(|frame| !frame.is_runtime())
        .filter_map(|frame| match frame.origin {
            FrameOrigin::Synthetic => {
                let line = frame
                    .line?
                    .checked_sub(WRAPPER_PRELUDE_LINES)
                    .filter(|line| *line > 0)?;
                Some(StackFrame::new(
                    frame.function.clone(),
                    FrameOrigin::File(context.to_string()),
                    Some(line),
                    frame.column,
                ))
            }
            _ => Some(frame.clone()),
        })
        .collect();

    if remapped.is_empty() {
        None
    } else {
        Some(remapped)
    }
}
