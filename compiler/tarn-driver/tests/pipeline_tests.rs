use std::io::Write;
use std::process::{Command, Stdio};
use tarn_driver::pipeline::{execute_compilation_pipeline, PipelineError, PipelineOptions};
use tarn_driver::query::QueryError;
use tarn_macros::{assert_err, assert_lines_contain, assert_matches, assert_ok};
use tarn_mir::error::MirError;
use tarn_mir::passes::LoweringOptions;

const MODULE: &str = r#"struct Big { a: i64, b: i64, c: i64, d: i64, e: i64 }

fn @id : fn(@owned Big) -> (@owned Big) {
bb0(%0 : Big):
  return %0
}

fn @caller : fn(@owned Big) -> (@owned Big) {
bb0(%0 : Big):
  %1 = function_ref @id : fn(@owned Big) -> (@owned Big)
  %2 = apply %1(%0) : fn(@owned Big) -> (@owned Big)
  return %2
}
"#;

fn emit_mir() -> PipelineOptions {
    PipelineOptions {
        emit_mir: true,
        ..Default::default()
    }
}

#[test]
fn test_pipeline_emits_lowered_module() {
    let output = assert_ok!(execute_compilation_pipeline(emit_mir(), MODULE));
    assert_lines_contain!(
        output,
        [
            "fn @id : fn(@in Big) -> (@out Big) {",
            "fn @caller : fn(@in Big) -> (@out Big) {",
            "%4 = apply %3(%2, %1) : fn(@in Big) -> (@out Big)",
        ]
    );
}

#[test]
fn test_pipeline_skips_lowering() {
    let options = PipelineOptions {
        skip_lowering: true,
        ..emit_mir()
    };
    let output = assert_ok!(execute_compilation_pipeline(options, MODULE));
    assert!(output.contains("fn @id : fn(@owned Big) -> (@owned Big) {"));
    assert!(!output.contains("@in Big"));
}

#[test]
fn test_pipeline_respects_register_budget() {
    let options = PipelineOptions {
        emit_report: true,
        lowering: LoweringOptions {
            max_direct_words: 5,
        },
        ..Default::default()
    };
    let output = assert_ok!(execute_compilation_pipeline(options, MODULE));
    assert!(output.contains("signatures: []"), "{}", output);
}

#[test]
fn test_pipeline_emits_queried_function_only() {
    let options = PipelineOptions {
        queries: vec!["mir.fn.id".to_owned()],
        ..emit_mir()
    };
    let output = assert_ok!(execute_compilation_pipeline(options, MODULE));
    assert!(output.starts_with("fn @id : fn(@in Big) -> (@out Big) {"));
    assert!(!output.contains("@caller"));
    assert!(!output.contains("struct Big"));
}

#[test]
fn test_pipeline_reports_unknown_query_target() {
    let options = PipelineOptions {
        queries: vec!["mir.fn.missing".to_owned()],
        ..emit_mir()
    };
    let error = assert_err!(execute_compilation_pipeline(options, MODULE));
    let name = assert_matches!(
        error,
        PipelineError::QueryError(QueryError::UnknownFunction(name)) => name
    );
    assert_eq!(name, "missing");
}

#[test]
fn test_pipeline_rejects_malformed_input() {
    let error = assert_err!(execute_compilation_pipeline(emit_mir(), "fn @f : fn() -> () {"));
    assert_matches!(error, PipelineError::MirError(MirError::Parse(_)) => ());
}

#[test]
fn test_pipeline_verifies_input() {
    let source = r#"fn @f : fn() -> () {
bb0:
  %0 = alloc_stack i64
  %1 = tuple () : ()
  return %1
}
"#;
    let error = assert_err!(execute_compilation_pipeline(emit_mir(), source));
    assert_matches!(error, PipelineError::MirError(MirError::Verifier(_)) => ());

    let options = PipelineOptions {
        skip_verify: true,
        ..emit_mir()
    };
    assert_ok!(execute_compilation_pipeline(options, source));
}

#[test]
fn test_pipeline_emits_report_and_layout() {
    let options = PipelineOptions {
        emit_layout: true,
        emit_report: true,
        ..Default::default()
    };
    let output = assert_ok!(execute_compilation_pipeline(options, MODULE));
    assert!(output.starts_with("Big: "), "{}", output);
    assert!(output.contains("function: \"caller\""), "{}", output);
    assert!(output.contains("recreated_call_sites: 1"), "{}", output);
}

#[test]
fn test_tarnc_reads_stdin() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tarnc"))
        .args(["-", "--emit-query", "mir.fn.caller", "--emit-mir"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn tarnc");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(MODULE.as_bytes())
        .expect("failed to write module to tarnc");
    let output = child.wait_with_output().expect("tarnc did not finish");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout is not utf-8");
    assert_lines_contain!(
        stdout,
        [
            "fn @caller : fn(@in Big) -> (@out Big) {",
            "bb0(%0 : *Big, %1 : *Big):",
            "dealloc_stack %2",
        ]
    );
}

#[test]
fn test_tarnc_fails_on_unknown_query_namespace() {
    let output = Command::new(env!("CARGO_BIN_EXE_tarnc"))
        .args(["-", "--emit-query", "hir.fn.caller"])
        .stdin(Stdio::null())
        .output()
        .expect("failed to run tarnc");
    assert!(!output.status.success());
}
