use std::path::PathBuf;
use std::process::{Command, Output};

fn source_file(name: &str, source: &str) -> PathBuf {
    let path = std::env::temp_dir()
        .join(format!("regjit-cli-{}-{name}.rj", std::process::id()));
    std::fs::write(&path, source).expect("write source");
    path
}

fn regjit(args: &[&str], name: &str, source: &str) -> (Output, String) {
    let path = source_file(name, source);
    let file = path.to_string_lossy().into_owned();
    let output = Command::new(env!("CARGO_BIN_EXE_regjit"))
        .args(args)
        .arg(&file)
        .output()
        .expect("spawn regjit");
    let _ = std::fs::remove_file(&path);
    (output, file)
}

#[test]
fn runs_a_program() {
    let (output, _) = regjit(
        &[],
        "run",
        "proc main { rax = 0; loop (rax < 3) { rax += 1; << rax; << \" \"; } }",
    );
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "1 2 3 ");
}

#[test]
fn compile_errors_print_file_line_and_column() {
    let (output, file) = regjit(&[], "longhand", "proc main {\n  rax = rbx * 2;\n}");
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(
        String::from_utf8_lossy(&output.stderr).trim_end(),
        format!("{file}:2:3: Compiler error: Statement not implemented in the compiler.")
    );
}

#[test]
fn parse_errors_name_the_parser() {
    let (output, file) = regjit(&[], "parse", "proc main { rax = ; }");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.starts_with(&format!("{file}:1:19: Parser error: ")),
        "{stderr}"
    );
}

#[test]
fn dumps_without_executing() {
    let (output, _) = regjit(
        &["--dump-tokens", "--dump-ast", "--dump-code", "--no-exec"],
        "dump",
        "proc main { << 7; }",
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(":1:1: `proc`"), "{stdout}");
    assert!(stdout.contains("PROCEDURE main\n  << 7\n"), "{stdout}");
    assert!(stdout.contains("entry: 0x"), "{stdout}");
    assert!(stdout.contains("intrinsic print_integer/1"), "{stdout}");
    assert!(stdout.contains("call main"), "{stdout}");
    assert!(stdout.trim_end().ends_with("ret"), "{stdout}");
}

#[test]
fn missing_file_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_regjit"))
        .arg("/nonexistent/regjit/input.rj")
        .output()
        .expect("spawn regjit");
    assert_eq!(output.status.code(), Some(1));
}
