// Integration tests for the Lox compiler and VM.
//
// Each test writes a Lox program to a temp file and runs it through the
// built `lox` binary, checking its stdout and exit code — mirroring
// `ruff`'s own `run_code`-style integration tests but against a process
// boundary, since the core scenarios here are phrased in terms of
// spec.md §6's exit codes rather than interpreter-internal state.

use std::io::Write;
use std::process::Command;

/// Runs `code` through the built binary, returning (stdout, exit code).
fn run_source(code: &str) -> (String, i32) {
    let mut file = tempfile().expect("failed to create temp source file");
    file.write_all(code.as_bytes()).unwrap();
    let path = file.into_temp_path();

    let output = Command::new(env!("CARGO_BIN_EXE_lox"))
        .arg(&path)
        .output()
        .expect("failed to run lox binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let code = output.status.code().unwrap_or(-1);
    (stdout, code)
}

/// A minimal standalone temp-file helper (no `tempfile` crate dependency):
/// creates a uniquely named `.lox` file under the OS temp dir that deletes
/// itself on drop.
struct NamedTempFile {
    path: std::path::PathBuf,
    file: std::fs::File,
}

struct TempPath(std::path::PathBuf);

impl std::ops::Deref for TempPath {
    type Target = std::path::Path;
    fn deref(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

impl NamedTempFile {
    fn into_temp_path(self) -> TempPath {
        drop(self.file);
        TempPath(self.path)
    }
}

impl Write for NamedTempFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn tempfile() -> std::io::Result<NamedTempFile> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let path = std::env::temp_dir().join(format!("lox_test_{}_{}.lox", pid, n));
    let file = std::fs::File::create(&path)?;
    Ok(NamedTempFile { path, file })
}

const EXIT_OK: i32 = 0;
const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;

// ---- positive end-to-end scenarios (spec.md §8) ------------------------

#[test]
fn arithmetic_precedence_evaluates_left_to_right_with_operator_precedence() {
    let (out, code) = run_source("print 1 + 2 * 3;");
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.trim(), "7");
}

#[test]
fn string_concatenation_via_plus() {
    let (out, code) = run_source(r#"print "foo" + "bar";"#);
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.trim(), "foobar");
}

#[test]
fn closures_capture_locals_by_reference_across_calls() {
    let (out, code) = run_source(
        "fun makeCounter() { \
           var i = 0; \
           fun count() { i = i + 1; return i; } \
           return count; \
         } \
         var counter = makeCounter(); \
         print counter(); \
         print counter();",
    );
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.lines().collect::<Vec<_>>(), vec!["1", "2"]);
}

#[test]
fn methods_are_invoked_on_instances() {
    let (out, code) = run_source(
        "class Greeter { greet() { print \"hi\"; } } \
         var g = Greeter(); \
         g.greet();",
    );
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.trim(), "hi");
}

#[test]
fn inheritance_resolves_super_calls_and_fields() {
    let (out, code) = run_source(
        "class A { speak() { print \"A\"; } } \
         class B < A { speak() { super.speak(); print \"B\"; } } \
         B().speak();",
    );
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.lines().collect::<Vec<_>>(), vec!["A", "B"]);
}

#[test]
fn while_loop_counts_up() {
    let (out, code) = run_source(
        "var i = 0; \
         while (i < 3) { \
           print i; \
           i = i + 1; \
         }",
    );
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.lines().collect::<Vec<_>>(), vec!["0", "1", "2"]);
}

#[test]
fn for_loop_desugars_to_the_same_counting_behavior_as_while() {
    let (out, code) = run_source("for (var i = 0; i < 3; i = i + 1) print i;");
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.lines().collect::<Vec<_>>(), vec!["0", "1", "2"]);
}

// ---- negative end-to-end scenarios -------------------------------------

#[test]
fn adding_a_string_to_a_number_is_a_runtime_type_error() {
    let (_out, code) = run_source(r#"print "four" + 4;"#);
    assert_eq!(code, EXIT_RUNTIME_ERROR);
}

#[test]
fn redeclaring_a_local_in_the_same_scope_is_a_compile_error() {
    let (_out, code) = run_source("{ var a = 1; var a = 2; }");
    assert_eq!(code, EXIT_COMPILE_ERROR);
}

#[test]
fn unbounded_recursion_overflows_the_call_stack() {
    let (_out, code) = run_source("fun recurse() { return recurse(); } recurse();");
    assert_eq!(code, EXIT_RUNTIME_ERROR);
}

// ---- testable properties (spec.md §8) -----------------------------------

#[test]
fn gc_stress_mode_does_not_change_observable_output() {
    let src = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(12);";

    let mut file = tempfile().unwrap();
    file.write_all(src.as_bytes()).unwrap();
    let path = file.into_temp_path();

    let normal = Command::new(env!("CARGO_BIN_EXE_lox")).arg(&path).output().unwrap();
    let stressed = Command::new(env!("CARGO_BIN_EXE_lox"))
        .arg(&path)
        .env("LOX_GC_STRESS", "1")
        .output()
        .unwrap();

    assert_eq!(normal.status.code(), stressed.status.code());
    assert_eq!(normal.stdout, stressed.stdout);
}

#[test]
fn equal_content_strings_intern_to_the_same_reference() {
    let (out, code) = run_source(
        "var a = \"shared\"; \
         var b = \"shared\"; \
         print a == b;",
    );
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.trim(), "true");
}

#[test]
fn reassigning_a_captured_local_is_visible_to_every_closure_over_it() {
    let (out, code) = run_source(
        "var shared; \
         var seen; \
         fun set() { shared = 1; } \
         fun get() { seen = shared; } \
         shared = 0; \
         set(); \
         get(); \
         print seen;",
    );
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.trim(), "1");
}

#[test]
fn deeply_nested_blocks_pop_every_local_on_scope_exit() {
    let (out, code) = run_source(
        "{ \
           var a = 1; \
           { \
             var b = 2; \
             { \
               var c = 3; \
               print a + b + c; \
             } \
           } \
         } \
         print \"after\";",
    );
    assert_eq!(code, EXIT_OK);
    assert_eq!(out.lines().collect::<Vec<_>>(), vec!["6", "after"]);
}
