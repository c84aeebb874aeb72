#[macro_use]
mod common;

use insta::assert_snapshot;
use tarn_macros::{assert_err, assert_lines_contain, assert_matches, assert_ok};
use tarn_mir::error::{LoweringError, MirError};
use tarn_mir::passes::{LoweredSignature, LoweringOptions};

const PRELUDE: &str = "struct Big { a: i64, b: i64, c: i64, d: i64, e: i64 }\n\n";

fn with_prelude(source: &str) -> String {
    format!("{}{}", PRELUDE, source)
}

#[test]
fn test_snapshot_corpus() {
    insta::glob!("data/*.test", |path| {
        let input = std::fs::read_to_string(path).unwrap();
        let (printed, _) = lower_source!(&input)
            .unwrap_or_else(|e| panic!("failed to lower corpus file {}: {}", path.display(), e));
        assert_snapshot!(printed);
    })
}

#[test]
fn test_report_lists_resigned_functions() {
    let source = with_prelude(
        r#"fn @id : fn(@owned Big) -> (@owned Big) {
bb0(%0 : Big):
  return %0
}

fn @caller : fn(@owned Big) -> (@owned Big) {
bb0(%0 : Big):
  %1 = function_ref @id : fn(@owned Big) -> (@owned Big)
  %2 = apply %1(%0) : fn(@owned Big) -> (@owned Big)
  return %2
}
"#,
    );
    let (_, report) = assert_ok!(lower_source!(&source));
    assert_eq!(
        report.signatures,
        vec![
            LoweredSignature {
                function: "id".to_owned(),
                before: "fn(@owned Big) -> (@owned Big)".to_owned(),
                after: "fn(@in Big) -> (@out Big)".to_owned(),
            },
            LoweredSignature {
                function: "caller".to_owned(),
                before: "fn(@owned Big) -> (@owned Big)".to_owned(),
                after: "fn(@in Big) -> (@out Big)".to_owned(),
            },
        ]
    );
    assert_eq!(report.recreated_call_sites, 1);
    assert!(report.retyped_globals.is_empty());
}

#[test]
fn test_lowering_is_idempotent() {
    let source = with_prelude(
        r#"fn @id : fn(@owned Big) -> (@owned Big) {
bb0(%0 : Big):
  return %0
}

fn @caller : fn(@owned Big) -> (@owned Big) {
bb0(%0 : Big):
  %1 = function_ref @id : fn(@owned Big) -> (@owned Big)
  %2 = apply %1(%0) : fn(@owned Big) -> (@owned Big)
  return %2
}
"#,
    );
    let (once, _) = assert_ok!(lower_source!(&source));
    let (twice, report) = assert_ok!(lower_source!(&once));
    assert!(report.is_empty(), "second run changed {:?}", report);
    assert_eq!(once, twice);
}

#[test]
fn test_register_budget_is_configurable() {
    let source = with_prelude(
        r#"fn @id : fn(@owned Big) -> (@owned Big) {
bb0(%0 : Big):
  return %0
}
"#,
    );
    let options = LoweringOptions {
        max_direct_words: 8,
    };
    let (printed, report) = assert_ok!(lower_source!(&source, options));
    assert!(report.is_empty());
    assert_lines_contain!(
        printed,
        ["fn @id : fn(@owned Big) -> (@owned Big) {", "bb0(%0 : Big):", "return %0"]
    );
}

#[test]
fn test_struct_extract_reads_through_the_address() {
    let source = with_prelude(
        r#"fn @field : fn(@owned Big) -> (@owned i64) {
bb0(%0 : Big):
  %1 = struct_extract %0, #Big.a : i64
  return %1
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "fn @field : fn(@in Big) -> (@owned i64) {",
            "bb0(%0 : *Big):",
            "%1 = struct_element_addr %0, #Big.a : *i64",
            "%2 = load [trivial] %1 : i64",
            "return %2",
        ]
    );
}

#[test]
fn test_try_apply_result_moves_to_a_stack_buffer() {
    let source = with_prelude(
        r#"fn @make : fn() -> (@owned Big) throws @owned i64

fn @try_make : fn() -> () {
bb0:
  %0 = function_ref @make : fn() -> (@owned Big) throws @owned i64
  try_apply %0() : fn() -> (@owned Big) throws @owned i64, normal bb1, error bb2
bb1(%1 : Big):
  debug_value %1, name "made"
  %2 = tuple () : ()
  return %2
bb2(%3 : i64):
  unreachable
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "%0 = alloc_stack Big",
            "%1 = function_ref @make : fn() -> (@out Big) throws @owned i64",
            "try_apply %1(%0) : fn() -> (@out Big) throws @owned i64, normal bb1, error bb2",
            "bb1(%2 : ()):",
            "debug_value_addr %0, name \"made\"",
            "%3 = tuple () : ()",
            "dealloc_stack %0",
            "return %3",
            "bb2(%4 : i64):",
            "unreachable",
        ]
    );
}

#[test]
fn test_global_function_values_are_retyped() {
    let source = with_prelude(
        r#"fn @sink : fn(@owned Big) -> ()

global @handler : fn(@owned Big) -> () = {
  %0 = function_ref @sink : fn(@owned Big) -> ()
}

fn @call_handler : fn(@owned Big) -> () {
bb0(%0 : Big):
  %1 = global_addr @handler : *fn(@owned Big) -> ()
  %2 = load [trivial] %1 : fn(@owned Big) -> ()
  %3 = apply %2(%0) : fn(@owned Big) -> ()
  return %3
}
"#,
    );
    let (printed, report) = assert_ok!(lower_source!(&source));
    assert_eq!(report.retyped_globals, vec!["handler".to_owned()]);
    assert_lines_contain!(
        printed,
        [
            "global @handler : fn(@in Big) -> () = {",
            "%0 = function_ref @sink : fn(@in Big) -> ()",
            "bb0(%0 : *Big):",
            "%1 = global_addr @handler : *fn(@in Big) -> ()",
            "%2 = load [trivial] %1 : fn(@in Big) -> ()",
            "%3 = apply %2(%0) : fn(@in Big) -> ()",
            "return %3",
        ]
    );
}

#[test]
fn test_generic_parameter_bound_to_large_type() {
    let source = with_prelude(
        r#"generic_env #0 = [Big]

fn @consume [env #0] : fn(@owned $0) -> () {
bb0(%0 : $0):
  %1 = tuple () : ()
  return %1
}
"#,
    );
    let (printed, report) = assert_ok!(lower_source!(&source));
    assert_eq!(report.signatures.len(), 1);
    assert_eq!(report.signatures[0].after, "fn(@in $0) -> ()");
    assert_lines_contain!(printed, ["bb0(%0 : *$0):", "return %1"]);
}

const HEAVY: &str = r#"class Node { x: i64 }

struct Heavy { n: Node, a: i64, b: i64, c: i64, d: i64 }

"#;

#[test]
fn test_borrowed_yield_is_rejected() {
    let source = format!(
        "{}{}",
        HEAVY,
        r#"fn @read : fn @yield_once () yields (@guaranteed Heavy) -> ()

fn @use_read : fn() -> () {
bb0:
  %0 = function_ref @read : fn @yield_once () yields (@guaranteed Heavy) -> ()
  (%1, %2) = begin_apply %0() : fn @yield_once () yields (@guaranteed Heavy) -> ()
  end_apply %2
  %3 = tuple () : ()
  return %3
}
"#
    );
    let error = assert_err!(lower_source!(&source));
    let error = assert_matches!(
        error,
        MirError::Lowering(LoweringError::UnsupportedBorrowedYield(e)) => e
    );
    assert_eq!(error.function, "use_read");
    assert_eq!(error.ty, "Heavy");
}

#[test]
fn test_owned_yield_is_taken_from_the_address() {
    let source = format!(
        "{}{}",
        HEAVY,
        r#"fn @read : fn @yield_once () yields (@owned Heavy) -> ()

fn @use_read : fn() -> () {
bb0:
  %0 = function_ref @read : fn @yield_once () yields (@owned Heavy) -> ()
  (%1, %2) = begin_apply %0() : fn @yield_once () yields (@owned Heavy) -> ()
  end_apply %2
  %3 = tuple () : ()
  return %3
}
"#
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert!(printed.contains("yields (@in Heavy)"), "{}", printed);
    assert!(printed.contains("= load [take] "), "{}", printed);
}

#[test]
fn test_report_serializes_to_ron() {
    let source = with_prelude(
        r#"fn @id : fn(@owned Big) -> (@owned Big) {
bb0(%0 : Big):
  return %0
}
"#,
    );
    let (_, report) = assert_ok!(lower_source!(&source));
    let ron = assert_ok!(ron::ser::to_string(&report));
    assert!(ron.contains(r#"function:"id""#), "{}", ron);
    assert!(ron.contains(r#"after:"fn(@in Big) -> (@out Big)""#), "{}", ron);
    assert!(ron.contains("recreated_call_sites:0"), "{}", ron);
}

#[test]
fn test_buffers_are_deallocated_before_throw() {
    let source = with_prelude(
        r#"fn @make : fn() -> (@owned Big)

fn @consume : fn(@owned Big) -> ()

fn @maybe : fn(@owned i1) -> () throws @owned i64 {
bb0(%0 : i1):
  %1 = function_ref @make : fn() -> (@owned Big)
  %2 = apply %1() : fn() -> (@owned Big)
  %3 = function_ref @consume : fn(@owned Big) -> ()
  %4 = apply %3(%2) : fn(@owned Big) -> ()
  cond_br %0, bb1, bb2
bb1:
  return %4
bb2:
  %5 = integer_literal 1 : i64
  throw %5
}
"#,
    );
    let (printed, report) = assert_ok!(lower_source!(&source));
    assert_eq!(report.recreated_call_sites, 2);
    assert_lines_contain!(
        printed,
        [
            "fn @maybe : fn(@owned i1) -> () throws @owned i64 {",
            "bb0(%0 : i1):",
            "%1 = alloc_stack Big",
            "%3 = apply %2(%1) : fn() -> (@out Big)",
            "%5 = apply %4(%1) : fn(@in Big) -> ()",
            "cond_br %0, bb1, bb2",
            "bb1:",
            "dealloc_stack %1",
            "return %5",
            "bb2:",
            "%6 = integer_literal 1 : i64",
            "dealloc_stack %1",
            "throw %6",
        ]
    );
}

#[test]
fn test_value_operations_move_to_addresses() {
    let source = with_prelude(
        r#"fn @ops : fn(@owned Big) -> () {
bb0(%0 : Big):
  retain_value %0
  release_value %0
  %1 = alloc_stack Big
  store %0 to [init] %1
  store %0 to [assign] %1
  destroy_addr %1
  dealloc_stack %1
  destroy_value %0
  %2 = tuple () : ()
  return %2
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "fn @ops : fn(@in Big) -> () {",
            "bb0(%0 : *Big):",
            "retain_value_addr %0",
            "release_value_addr %0",
            "%1 = alloc_stack Big",
            "copy_addr [take] %0 to [init] %1",
            "copy_addr [take] %0 to %1",
            "destroy_addr %1",
            "dealloc_stack %1",
            "destroy_addr %0",
            "return %2",
        ]
    );
    assert!(!printed.contains("retain_value %0"), "{}", printed);
    assert!(!printed.contains("destroy_value"), "{}", printed);
}

#[test]
fn test_guaranteed_argument_is_taken_into_the_result() {
    let source = with_prelude(
        r#"fn @pass : fn(@guaranteed Big) -> (@owned Big) {
bb0(%0 : Big):
  return %0
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "fn @pass : fn(@in_guaranteed Big) -> (@out Big) {",
            "bb0(%0 : *Big, %1 : *Big):",
            "copy_addr [take] %1 to [init] %0",
            "%2 = tuple () : ()",
            "return %2",
        ]
    );
}

#[test]
fn test_partial_apply_captures_by_address() {
    let source = with_prelude(
        r#"fn @sink2 : fn(@owned i64, @owned Big) -> ()

fn @capture : fn(@owned Big) -> () {
bb0(%0 : Big):
  %1 = function_ref @sink2 : fn(@owned i64, @owned Big) -> ()
  %2 = partial_apply %1(%0) : fn(@owned i64, @owned Big) -> () as fn @thick (@owned i64) -> ()
  %3 = integer_literal 7 : i64
  %4 = apply %2(%3) : fn @thick (@owned i64) -> ()
  return %4
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "bb0(%0 : *Big):",
            "%1 = function_ref @sink2 : fn(@owned i64, @in Big) -> ()",
            "%2 = partial_apply %1(%0) : fn(@owned i64, @in Big) -> () as fn @thick (@owned i64) -> ()",
            "%4 = apply %2(%3) : fn @thick (@owned i64) -> ()",
        ]
    );
}

#[test]
fn test_function_conversions_follow_the_new_signature() {
    let source = with_prelude(
        r#"fn @sink : fn(@owned Big) -> ()

fn @thicken : fn() -> () {
bb0:
  %0 = function_ref @sink : fn(@owned Big) -> ()
  %1 = thin_to_thick_function %0 : fn @thick (@owned Big) -> ()
  %2 = convert_function %1 : fn @thick (@owned Big) -> ()
  %3 = tuple () : ()
  return %3
}
"#,
    );
    let (printed, report) = assert_ok!(lower_source!(&source));
    assert_eq!(report.signatures.len(), 1);
    assert_eq!(report.signatures[0].function, "sink");
    assert_lines_contain!(
        printed,
        [
            "fn @thicken : fn() -> () {",
            "%0 = function_ref @sink : fn(@in Big) -> ()",
            "%1 = thin_to_thick_function %0 : fn @thick (@in Big) -> ()",
            "%2 = convert_function %1 : fn @thick (@in Big) -> ()",
        ]
    );
}

#[test]
fn test_copy_load_of_inout_storage_collapses_into_copy_addr() {
    let source = with_prelude(
        r#"fn @consume : fn(@owned Big) -> ()

fn @from_inout : fn(@inout Big) -> () {
bb0(%0 : *Big):
  %1 = load [copy] %0 : Big
  %2 = function_ref @consume : fn(@owned Big) -> ()
  %3 = apply %2(%1) : fn(@owned Big) -> ()
  return %3
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "fn @from_inout : fn(@inout Big) -> () {",
            "bb0(%0 : *Big):",
            "%1 = alloc_stack Big",
            "copy_addr %0 to [init] %1",
            "%3 = apply %2(%1) : fn(@in Big) -> ()",
            "dealloc_stack %1",
            "return %3",
        ]
    );
    assert!(!printed.contains("load [copy]"), "{}", printed);
}

#[test]
fn test_block_argument_of_function_type_is_retyped() {
    let source = with_prelude(
        r#"fn @sink : fn(@owned Big) -> ()

fn @pick : fn() -> () {
bb0:
  %0 = function_ref @sink : fn(@owned Big) -> ()
  br bb1(%0)
bb1(%1 : fn(@owned Big) -> ()):
  %2 = tuple () : ()
  return %2
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "%0 = function_ref @sink : fn(@in Big) -> ()",
            "br bb1(%0)",
            "bb1(%1 : fn(@in Big) -> ()):",
        ]
    );
}

#[test]
fn test_method_lookups_are_retyped() {
    let source = with_prelude(
        r#"class Node { x: i64 }

fn @dispatch : fn(@guaranteed Node) -> () {
bb0(%0 : Node):
  %1 = class_method %0, #Node.take : fn @method (@owned Big, @guaranteed Node) -> ()
  %2 = witness_method Node, #Node.make : fn @witness_method () -> (@owned Big)
  %3 = tuple () : ()
  return %3
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "%1 = class_method %0, #Node.take : fn @method (@in Big, @guaranteed Node) -> ()",
            "%2 = witness_method Node, #Node.make : fn @witness_method () -> (@out Big)",
        ]
    );
}

#[test]
fn test_enum_payload_is_cast_to_the_new_signature() {
    let source = with_prelude(
        r#"enum Handler { none, some(fn(@owned Big) -> ()) }

fn @sink : fn(@owned Big) -> ()

fn @unwrap : fn(@owned Handler) -> () {
bb0(%0 : Handler):
  %1 = unchecked_enum_data %0, #some : fn(@owned Big) -> ()
  %2 = tuple () : ()
  return %2
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "fn @unwrap : fn(@owned Handler) -> () {",
            "%1 = unchecked_enum_data %0, #some : fn(@owned Big) -> ()",
            "%2 = unchecked_bitwise_cast %1 : fn(@in Big) -> ()",
            "%3 = tuple () : ()",
        ]
    );
}

#[test]
fn test_foreign_global_keeps_its_type() {
    let source = with_prelude(
        r#"fn @c_take : fn @c (@owned Big) -> ()

fn @sink : fn(@owned Big) -> ()

global @c_handler : fn @c (@owned Big) -> () = {
  %0 = function_ref @c_take : fn @c (@owned Big) -> ()
}
"#,
    );
    let (printed, report) = assert_ok!(lower_source!(&source));
    assert!(report.retyped_globals.is_empty(), "{:?}", report);
    assert_eq!(report.signatures.len(), 1);
    assert_lines_contain!(
        printed,
        [
            "global @c_handler : fn @c (@owned Big) -> () = {",
            "%0 = function_ref @c_take : fn @c (@owned Big) -> ()",
        ]
    );
}

#[test]
fn test_store_into_block_storage_keeps_the_captured_type() {
    let source = with_prelude(
        r#"fn @sink : fn(@owned Big) -> ()

fn @capture_block : fn() -> () {
bb0:
  %0 = alloc_stack @block_storage fn(@owned Big) -> ()
  %1 = project_block_storage %0 : *fn(@owned Big) -> ()
  %2 = function_ref @sink : fn(@owned Big) -> ()
  store %2 to [trivial] %1
  dealloc_stack %0
  %3 = tuple () : ()
  return %3
}
"#,
    );
    let (printed, _) = assert_ok!(lower_source!(&source));
    assert_lines_contain!(
        printed,
        [
            "%1 = project_block_storage %0 : *fn(@owned Big) -> ()",
            "%2 = function_ref @sink : fn(@in Big) -> ()",
            "%3 = unchecked_bitwise_cast %2 : fn(@owned Big) -> ()",
            "store %3 to [trivial] %1",
        ]
    );
}
