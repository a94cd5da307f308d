//! Text dumps of the token stream and the procedure table.

use std::fmt::Write;

use crate::ast::{ProcedureTable, Statement, StatementKind};
use crate::token::Token;

/// One line per token: `file:line:col: kind`.
pub fn dump_tokens(file: &str, tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        let pos = token.span.start;
        let _ = writeln!(out, "{file}:{}:{}: {}", pos.line, pos.column, token.kind);
    }
    out
}

/// `PROCEDURE name` headers followed by the body, two spaces per nesting
/// level.
pub fn dump_ast(table: &ProcedureTable) -> String {
    let mut out = String::new();
    for procedure in table {
        let _ = writeln!(out, "PROCEDURE {}", procedure.name);
        dump_body(&mut out, &procedure.body, 1);
    }
    out
}

fn dump_body(out: &mut String, body: &[Statement], depth: usize) {
    for statement in body {
        dump_statement(out, statement, depth);
    }
}

fn dump_statement(out: &mut String, statement: &Statement, depth: usize) {
    let indent = "  ".repeat(depth);
    let guard = match &statement.guard {
        Some(condition) => format!(" if {condition}"),
        None => String::new(),
    };
    let line = match &statement.kind {
        StatementKind::Assignment { dest, source } => format!("{dest} = {source}"),
        StatementKind::Shorthand { dest, op, source } => {
            format!("{dest} {}= {source}", op.symbol())
        }
        StatementKind::Longhand { dest, op, lhs, rhs } => {
            format!("{dest} = {lhs} {} {rhs}", op.symbol())
        }
        StatementKind::Loop { condition, body } => {
            let header = match condition {
                Some(condition) => format!("loop ({condition})"),
                None => "loop".to_string(),
            };
            let _ = writeln!(out, "{indent}{header}{guard}");
            dump_body(out, body, depth + 1);
            return;
        }
        StatementKind::Branch {
            condition,
            then_body,
            else_body,
        } => {
            let _ = writeln!(out, "{indent}branch ({condition}){guard}");
            dump_body(out, then_body, depth + 1);
            if !else_body.is_empty() {
                let _ = writeln!(out, "{indent}else");
                dump_body(out, else_body, depth + 1);
            }
            return;
        }
        StatementKind::Break => "break".to_string(),
        StatementKind::Continue => "continue".to_string(),
        StatementKind::Return => "return".to_string(),
        StatementKind::Call { procedure } => format!("call {procedure}"),
        StatementKind::Stdout { source } => format!("<< {source}"),
        StatementKind::StdoutText { text } => {
            format!("<< \"{}\"", text.as_bytes().escape_ascii())
        }
        StatementKind::Push { reg } => format!("push {reg}"),
        StatementKind::Pop { reg } => format!("pop {reg}"),
    };
    let _ = writeln!(out, "{indent}{line}{guard}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    #[test]
    fn token_dump_lists_positions() {
        let tokens = tokenize("proc main {\n  rax = -1;\n}").expect("lex");
        let dump = dump_tokens("t.rj", &tokens);
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines[0], "t.rj:1:1: `proc`");
        assert_eq!(lines[1], "t.rj:1:6: identifier main");
        assert_eq!(lines[3], "t.rj:2:3: register rax");
        assert_eq!(lines[5], "t.rj:2:9: `-`");
        assert_eq!(lines[6], "t.rj:2:10: integer 1");
        assert_eq!(lines.last(), Some(&"t.rj:3:2: end of input"));
    }

    #[test]
    fn ast_dump_nests_bodies() {
        let source = r#"
            proc main {
                rax = 0;
                loop (rax < 3) {
                    rax += 1;
                    branch (rax == 2) { << "two\n"; } else { << rax if rbx != 1; }
                }
                helper;
            }
            proc helper { return; }
        "#;
        let table = parse_tokens(tokenize(source).expect("lex")).expect("parse");
        assert_eq!(
            dump_ast(&table),
            "PROCEDURE main\n\
             \x20 rax = 0\n\
             \x20 loop (rax < 3)\n\
             \x20   rax += 1\n\
             \x20   branch (rax == 2)\n\
             \x20     << \"two\\n\"\n\
             \x20   else\n\
             \x20     << rax if rbx != 1\n\
             \x20 call helper\n\
             PROCEDURE helper\n\
             \x20 return\n"
        );
    }
}
