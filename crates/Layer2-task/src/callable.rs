//! Callable references and module resolution
//!
//! A task's code never travels as a Rust closure. It is either inline script
//! text or a descriptor naming a module file, resolved relative to a context
//! path the same way scripts resolve their own `import`s.

use branchy_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Extension tried when a descriptor names a file without one
pub const MODULE_EXTENSION: &str = "rhai";

/// File tried when a descriptor names a directory
pub const MODULE_INDEX: &str = "main.rhai";

/// Entry function a module task must define
pub const MODULE_ENTRY: &str = "main";

/// What a task runs, as given by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callable {
    /// Script text evaluating to a closure, e.g. `|a, b| a + b`
    Inline(String),

    /// Module descriptor, e.g. `./modules/add`
    Module(String),
}

impl Callable {
    pub fn inline(source: impl Into<String>) -> Self {
        Self::Inline(source.into())
    }

    pub fn module(descriptor: impl Into<String>) -> Self {
        Self::Module(descriptor.into())
    }
}

/// What a task runs, as sent to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CallableSource {
    Inline { source: String },

    /// Module file, already resolved to an absolute path
    Module { path: PathBuf },
}

impl CallableSource {
    pub fn kind(&self) -> &'static str {
        match self {
            CallableSource::Inline { .. } => "inline",
            CallableSource::Module { .. } => "module",
        }
    }
}

/// Resolve `descriptor` against the directory of `from`.
///
/// Tries, in order: the path itself, the path with `.rhai` appended, and
/// `main.rhai` inside it. Bare descriptors (`utils/math`) resolve like
/// relative ones; absolute descriptors are used as they are.
pub fn resolve_module(descriptor: &str, from: &Path) -> Result<PathBuf> {
    if descriptor.trim().is_empty() {
        return Err(Error::module_not_found(descriptor, from.display()));
    }

    let requested = Path::new(descriptor);
    let target = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        from.parent().unwrap_or_else(|| Path::new("/")).join(requested)
    };
    let target = normalize(&target);

    let mut with_extension = OsString::from(target.as_os_str());
    with_extension.push(".");
    with_extension.push(MODULE_EXTENSION);

    let candidates = [
        target.clone(),
        PathBuf::from(with_extension),
        target.join(MODULE_INDEX),
    ];

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| Error::module_not_found(descriptor, from.display()))
}

/// Absolute context path for a `file!()`-style location.
///
/// Compiler-reported paths are relative to the workspace root, which is not
/// necessarily the current directory (tests run from the member crate), so
/// the current directory and its ancestors are tried in turn.
pub fn context_path_from_location(file: &str) -> PathBuf {
    let file = Path::new(file);
    if file.is_absolute() {
        return normalize(file);
    }

    let cwd = current_dir();
    cwd.ancestors()
        .map(|dir| dir.join(file))
        .find(|candidate| candidate.is_file())
        .map(|found| normalize(&found))
        .unwrap_or_else(|| normalize(&cwd.join(file)))
}

/// `path` made absolute against the current directory, then normalized
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&current_dir().join(path))
    }
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

/// Lexically resolve `.` and `..` without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                // Leading `..` segments stack up
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("modules/stats")).unwrap();
        fs::write(root.join("modules/add.rhai"), "fn main(a, b) { a + b }").unwrap();
        fs::write(root.join("modules/stats/main.rhai"), "fn main() { 0 }").unwrap();
        fs::write(root.join("caller.rs"), "").unwrap();
        (dir, root)
    }

    #[test]
    fn test_resolve_with_extension() {
        let (_guard, root) = fixture();
        let resolved = resolve_module("./modules/add", &root.join("caller.rs")).unwrap();
        assert_eq!(resolved, root.join("modules/add.rhai"));
    }

    #[test]
    fn test_resolve_exact_and_parent_segments() {
        let (_guard, root) = fixture();
        let from = root.join("modules/stats/main.rhai");
        let resolved = resolve_module("../add.rhai", &from).unwrap();
        assert_eq!(resolved, root.join("modules/add.rhai"));
    }

    #[test]
    fn test_resolve_directory_index() {
        let (_guard, root) = fixture();
        let resolved = resolve_module("modules/stats", &root.join("caller.rs")).unwrap();
        assert_eq!(resolved, root.join("modules/stats/main.rhai"));
    }

    #[test]
    fn test_resolve_absolute() {
        let (_guard, root) = fixture();
        let absolute = root.join("modules/add");
        let resolved =
            resolve_module(absolute.to_str().unwrap(), Path::new("/elsewhere/x.rs")).unwrap();
        assert_eq!(resolved, root.join("modules/add.rhai"));
    }

    #[test]
    fn test_resolve_missing() {
        let (_guard, root) = fixture();
        let err = resolve_module("./modules/nope", &root.join("caller.rs")).unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { .. }));

        let err = resolve_module("  ", &root.join("caller.rs")).unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { .. }));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_normalize_stacks_leading_parent_segments() {
        assert_eq!(normalize(Path::new("../../b")), PathBuf::from("../../b"));
        assert_eq!(normalize(Path::new("./../a/../../b")), PathBuf::from("../../b"));
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn test_absolute_path() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            absolute_path(Path::new("jobs/../tasks/run.rs")),
            normalize(&cwd.join("tasks/run.rs"))
        );
        assert_eq!(absolute_path(Path::new("/srv/./app.rs")), PathBuf::from("/srv/app.rs"));

        let parent = absolute_path(Path::new("../../x.rs"));
        assert!(parent.is_absolute());
        assert!(!parent.components().any(|c| c == Component::ParentDir));
    }

    #[test]
    fn test_context_path_from_location() {
        let path = context_path_from_location(file!());
        assert!(path.is_absolute());
        assert!(path.is_file(), "{} should exist", path.display());
        assert!(path.ends_with("src/callable.rs"));
    }

    #[test]
    fn test_callable_source_wire_form() {
        let inline = CallableSource::Inline {
            source: "|| 1".into(),
        };
        assert_eq!(
            serde_json::to_value(&inline).unwrap(),
            serde_json::json!({"kind": "inline", "source": "|| 1"})
        );
        assert_eq!(inline.kind(), "inline");
    }
}
