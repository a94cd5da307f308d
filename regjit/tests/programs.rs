use std::cell::RefCell;

use regjit::{
    CompileErrorKind, Error, Intrinsics, capture_output, compile_source, execute,
    run_source,
};

thread_local! {
    static INTEGERS: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
    static TEXT: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

extern "C" fn record_integer(value: i64) {
    INTEGERS.with_borrow_mut(|values| values.push(value));
}

extern "C" fn record_text(ptr: *const u8, len: usize) {
    // SAFETY: generated code passes its embedded text and length
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
    TEXT.with_borrow_mut(|text| text.extend_from_slice(bytes));
}

fn recording() -> Intrinsics {
    Intrinsics {
        print_integer: record_integer,
        print_text: record_text,
    }
}

/// Runs `source` and returns every printed integer and all printed text.
fn run(source: &str) -> (Vec<i64>, String) {
    INTEGERS.take();
    TEXT.take();
    let program = compile_source(source, recording()).expect("compile");
    execute(&program).expect("execute");
    let text = String::from_utf8(TEXT.take()).expect("utf-8");
    (INTEGERS.take(), text)
}

fn integers(body: &str) -> Vec<i64> {
    run(&format!("proc main {{ {body} }}")).0
}

fn compile_error(source: &str) -> Error {
    compile_source(source, recording()).expect_err("should not compile")
}

#[test]
fn counted_loop_runs_to_its_bound() {
    assert_eq!(
        integers("rax = 0; loop (rax < 10) { rax += 1; } << rax;"),
        vec![10]
    );
}

#[test]
fn guarded_break_leaves_the_loop() {
    assert_eq!(
        integers("rax = 0; loop { break if rax == 5; rax += 1; } << rax;"),
        vec![5]
    );
}

#[test]
fn continue_rechecks_the_condition() {
    let body = "rax = 0; rbx = 0; \
                loop (rax < 10) { rax += 1; continue if rax > 5; rbx += 1; } \
                << rax; << rbx;";
    assert_eq!(integers(body), vec![10, 5]);
}

#[test]
fn break_only_leaves_the_innermost_loop() {
    let body = "rax = 0; rbx = 0; \
                loop (rax < 3) { \
                    rax += 1; rcx = 0; \
                    loop { rcx += 1; rbx += 1; break if rcx == 2; } \
                } \
                << rbx;";
    assert_eq!(integers(body), vec![6]);
}

#[test]
fn division_truncates_toward_zero() {
    let body = "rax = 17; rax %= 5; << rax; \
                rbx = 17; rbx /= 5; << rbx; \
                rcx = -7; rcx /= 2; << rcx; \
                rdx = -7; rdx %= 2; << rdx;";
    assert_eq!(integers(body), vec![2, 3, -3, -1]);
}

#[test]
fn division_involving_rax_rdx_and_rbx() {
    let body = "rax = 3; rdx = 20; rdx /= rax; << rdx; << rax; \
                rax = 20; rbx = 6; rax %= rbx; << rax; << rbx; \
                rbx = 9; rdx = 2; rbx /= rdx; << rbx; << rdx;";
    assert_eq!(integers(body), vec![6, 3, 2, 6, 4, 2]);
}

#[test]
fn arithmetic_and_bitwise_shorthand() {
    let body = "rax = 6; rax *= 7; << rax; \
                rbx = 12; rbx &= 10; << rbx; \
                rcx = 12; rcx |= 3; << rcx; \
                rdx = 12; rdx ^= 10; << rdx; \
                r8 = 5; r9 = 8; r8 -= r9; << r8;";
    assert_eq!(integers(body), vec![42, 8, 15, 6, -3]);
}

#[test]
fn immediates_beyond_32_bits() {
    let body = "rax = 1; rax += 5000000000; << rax; \
                rbx = 2; rbx *= 4294967296; << rbx; \
                << 1 if rax > 4000000000; << 2 if rax < 4000000000;";
    assert_eq!(integers(body), vec![5_000_000_001, 8_589_934_592, 1]);
}

#[test]
fn leading_immediate_comparisons() {
    let body = "rax = 3; \
                << 1 if 10 > rax; << 2 if rax > 10; \
                << 3 if 5 == rax; << 4 if 3 == rax; \
                << 5 if 3 <= rax; << 6 if 3 < rax; \
                << 7 if 3 != rax; << 8 if 4 >= rax;";
    assert_eq!(integers(body), vec![1, 4, 5, 8]);
}

#[test]
fn branch_takes_exactly_one_arm() {
    let body = "rax = 2; \
                branch (rax == 1) { << 10; } else { << 20; } \
                branch (rax != 1) { << 30; } \
                branch (rax == 1) { << 40; }";
    assert_eq!(integers(body), vec![20, 30]);
}

#[test]
fn calls_and_returns() {
    let source = "proc twice { rax *= 2; } \
                  proc count { return if rax >= 20; rax += 1; count; } \
                  proc main { rax = 3; twice; twice; << rax; count; << rax; }";
    assert_eq!(run(source).0, vec![12, 20]);
}

#[test]
fn procedures_may_be_called_before_declaration() {
    let source = "proc main { later; << rbx; } proc later { rbx = 99; }";
    assert_eq!(run(source).0, vec![99]);
}

#[test]
fn push_and_pop_swap_registers() {
    let body = "rax = 1; rbx = 2; push rax; push rbx; pop rax; pop rbx; \
                << rax; << rbx;";
    assert_eq!(integers(body), vec![2, 1]);
}

#[test]
fn host_calls_with_an_odd_number_of_pushes() {
    let body = "rax = 5; push rax; << rax; pop rbx; << rbx;";
    assert_eq!(integers(body), vec![5, 5]);
}

#[test]
fn host_calls_preserve_every_register() {
    let body = "rcx = 7; r11 = 9; rbp = 11; rsi = 13; rdi = 15; \
                << rcx; << r11; << rbp; << rsi; << rdi; << rcx;";
    assert_eq!(integers(body), vec![7, 9, 11, 13, 15, 7]);
}

#[test]
fn text_and_integers_interleave() {
    let (values, text) =
        run(r#"proc main { << "hello, "; << 42; << "world\n"; << "\"q\"\t"; }"#);
    assert_eq!(values, vec![42]);
    assert_eq!(text, "hello, world\n\"q\"\t");
}

#[test]
fn guarded_text_is_skipped() {
    let (_, text) = run(r#"proc main { rax = 1; << "no" if rax == 0; << "yes"; }"#);
    assert_eq!(text, "yes");
}

#[test]
fn host_intrinsics_print_through_capture() {
    let (result, out) = capture_output(|| {
        run_source(r#"proc main { << 12; << " apples\n"; << -3; }"#)
    });
    result.expect("run");
    assert_eq!(out, b"12 apples\n-3");
}

#[test]
fn undefined_procedure_error_has_no_position() {
    let err = compile_error("proc main { missing; }");
    let Error::Compile(compile) = &err else {
        panic!("expected compile error, got {err:?}");
    };
    assert_eq!(
        compile.kind,
        CompileErrorKind::UndefinedProcedure("missing".into())
    );
    assert_eq!(err.stage(), "Compiler");
    assert_eq!(
        err.to_string(),
        "0:0: Compiler error: Calling procedure \"missing\", which doesn't exist."
    );
}

#[test]
fn missing_main_is_reported() {
    let err = compile_error("proc helper { }");
    assert_eq!(
        err.message(),
        "Calling procedure \"main\", which doesn't exist."
    );
}

#[test]
fn longhand_statements_do_not_compile() {
    let err = compile_error("proc main {\n  rax = rbx + 1;\n}");
    assert_eq!(
        err.to_string(),
        "2:3: Compiler error: Statement not implemented in the compiler."
    );
}

#[test]
fn two_immediate_conditions_do_not_compile() {
    let err = compile_error("proc main { loop (1 < 2) { } }");
    assert_eq!(
        err.message(),
        "Unsupported comparison operand type combination."
    );
    assert_eq!(err.pos().map(|p| p.column), Some(19));
}

#[test]
fn loop_control_outside_a_loop() {
    let err = compile_error("proc main { branch (rax == 0) { continue; } }");
    assert_eq!(err.message(), "break or continue outside a loop.");
    assert_eq!(err.pos().map(|p| p.column), Some(33));
}

#[test]
fn front_end_errors_name_their_stage() {
    let err = compile_error("proc main { break }");
    assert_eq!(err.stage(), "Parser");
    assert_eq!(err.message(), "Expected ;.");

    let err = compile_error("proc main { << \"open; }");
    assert_eq!(err.stage(), "Lexer");
}
