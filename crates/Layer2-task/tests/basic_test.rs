//! End-to-end tests against the real `branchy-worker` binary
//!
//! `cargo test -p branchy-task --test basic_test -- --nocapture`

use branchy_foundation::Error;
use branchy_task::{create_task, Callable, TaskOptions, Threads, WorkerCommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn worker() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_branchy-worker"))
}

fn options() -> TaskOptions {
    TaskOptions::new().worker(worker())
}

fn this_file() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/basic_test.rs")
}

#[tokio::test]
async fn test_sync_result() {
    let sum = create_task(Callable::inline("|a, b, c| a + b + c"), options()).unwrap();

    let result = sum.call(vec![json!(1), json!(2), json!(3)]).await.unwrap();
    assert_eq!(result, json!(6));
}

#[tokio::test]
async fn test_delayed_result() {
    let delayed = create_task(
        Callable::inline("|| {\n    sleep(50);\n    \"foo\"\n}"),
        options(),
    )
    .unwrap();

    let start = Instant::now();
    let result = delayed.call(vec![]).await.unwrap();

    assert_eq!(result, json!("foo"));
    assert!(
        start.elapsed() >= Duration::from_millis(50),
        "settled after {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn test_structured_values_roundtrip() {
    let describe = create_task(
        Callable::inline("|user| #{ name: user.name, tags: user.tags.len(), admin: user.admin }"),
        options(),
    )
    .unwrap();

    let result = describe
        .call(vec![json!({"name": "ada", "tags": ["a", "b"], "admin": false})])
        .await
        .unwrap();
    assert_eq!(result, json!({"name": "ada", "tags": 2, "admin": false}));
}

#[tokio::test]
async fn test_rethrows_worker_errors() {
    let failing = create_task(
        Callable::inline(
            "|| {\n    throw #{ name: \"DomainError\", message: \"Some error inside worker\" };\n}",
        ),
        options(),
    )
    .unwrap();

    let err = failing.call(vec![]).await.unwrap_err();
    assert!(err.is_task_failure(), "{:?}", err);

    let worker_error = err.worker_error().unwrap();
    assert_eq!(worker_error.name, "DomainError");
    assert_eq!(worker_error.message, "Some error inside worker");

    let first_frame = worker_error.frames().next().unwrap_or_default();
    assert!(first_frame.contains("basic_test.rs:2:"), "{}", worker_error.stack);

    let rendered = err.to_string();
    assert!(rendered.starts_with("Error in worker task:\n"), "{}", rendered);
    assert!(rendered.contains("    DomainError: Some error inside worker"));
}

#[tokio::test]
async fn test_plain_throw_is_error() {
    let failing = create_task(Callable::inline("|| { throw \"boom\"; }"), options()).unwrap();

    let err = failing.call(vec![]).await.unwrap_err();
    let worker_error = err.worker_error().unwrap();
    assert_eq!(worker_error.name, "Error");
    assert_eq!(worker_error.message, "boom");
}

#[tokio::test]
async fn test_module_descriptor() {
    let add = create_task(Callable::module("./modules/add"), options()).unwrap();
    assert!(add.context_path().ends_with("tests/modules/add.rhai"));

    let result = add.call(vec![json!(1), json!(2), json!(3)]).await.unwrap();
    assert_eq!(result, json!(6));
}

#[tokio::test]
async fn test_missing_module_fails_at_creation() {
    let err = create_task(Callable::module("./modules/nope"), options()).unwrap_err();
    assert!(matches!(err, Error::ModuleNotFound { .. }), "{:?}", err);
    assert!(err.to_string().contains("./modules/nope"));
}

#[tokio::test]
async fn test_inline_context_variables() {
    let filename = create_task(
        Callable::inline("|| filename()"),
        options().concurrent(Threads::Auto),
    )
    .unwrap();
    let dirname = create_task(
        Callable::inline("|| dirname()"),
        options().concurrent(Threads::Auto),
    )
    .unwrap();

    let (file, dir) = tokio::join!(filename.call(vec![]), dirname.call(vec![]));

    let expected = this_file();
    assert_eq!(filename.context_path(), expected.as_path());
    assert_eq!(file.unwrap(), json!(expected.to_string_lossy()));
    assert_eq!(
        dir.unwrap(),
        json!(expected.parent().unwrap().to_string_lossy())
    );
}

#[tokio::test]
async fn test_module_context_is_module_file() {
    let constants = create_task(Callable::module("./modules/constants"), options()).unwrap();

    let expected = this_file().parent().unwrap().join("modules/constants.rhai");
    let result = constants.call(vec![]).await.unwrap();
    assert_eq!(result, json!(expected.to_string_lossy()));
}

#[tokio::test]
async fn test_inline_imports_module() {
    let sum = create_task(
        Callable::inline("|a, b, c| {\n    import \"modules/add\" as add;\n    add::main(a, b, c)\n}"),
        options(),
    )
    .unwrap();

    let result = sum.call(vec![json!(1), json!(2), json!(3)]).await.unwrap();
    assert_eq!(result, json!(6));
}

#[tokio::test]
async fn test_module_imports_module() {
    let sum = create_task(Callable::module("./modules/require"), options()).unwrap();

    let result = sum.call(vec![json!(1), json!(2), json!(3)]).await.unwrap();
    assert_eq!(result, json!(6));
}

#[tokio::test]
async fn test_explicit_context_path() {
    let dir = tempfile::tempdir().unwrap();
    let context = dir.path().join("virtual.rs");

    let task = create_task(
        Callable::inline("|| filename()"),
        options().context_path(&context),
    )
    .unwrap();

    let result = task.call(vec![]).await.unwrap();
    assert_eq!(result, json!(context.to_string_lossy()));
}

#[tokio::test]
async fn test_discovers_worker_binary() {
    // No explicit worker: found next to the test binary
    let sum = create_task(Callable::inline("|a, b| a + b"), TaskOptions::new()).unwrap();
    assert_eq!(sum.call(vec![json!(2), json!(3)]).await.unwrap(), json!(5));
}

#[cfg(unix)]
#[tokio::test]
async fn test_dead_worker_is_channel_fault() {
    let task = create_task(
        Callable::inline("|| 1"),
        TaskOptions::new().worker(WorkerCommand::new("true")),
    )
    .unwrap();

    let err = task.call(vec![]).await.unwrap_err();
    assert!(err.is_channel_fault(), "{:?}", err);
    assert!(!err.is_task_failure());
}
