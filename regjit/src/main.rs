use clap::Parser as ClapParser;
use std::{fs, process};

use parser::dump::{dump_ast, dump_tokens};
use parser::{parse_tokens, tokenize};

use regjit::{Error, Intrinsics, compile_program, dump_code, execute};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Program to compile and run
    #[arg(help = "The source file to run")]
    file: String,

    #[arg(long, help = "Print every token with its position")]
    dump_tokens: bool,

    #[arg(long, help = "Print the parsed procedures")]
    dump_ast: bool,

    #[arg(long, help = "Print entry, intrinsics, bytes and disassembly")]
    dump_code: bool,

    /// Compile (and dump) only
    #[arg(long, help = "Do not execute the compiled program")]
    no_exec: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.file) {
        Ok(content) => content,
        Err(err) => {
            eprintln!("Error reading file '{}': {}", cli.file, err);
            process::exit(1);
        }
    };

    if let Err(err) = run(&cli, &source) {
        report(&cli.file, &err);
        process::exit(1);
    }
}

fn run(cli: &Cli, source: &str) -> Result<(), Error> {
    let tokens = tokenize(source)?;
    log::info!("{}: {} token(s)", cli.file, tokens.len());
    if cli.dump_tokens {
        print!("{}", dump_tokens(&cli.file, &tokens));
    }

    let table = parse_tokens(tokens)?;
    if cli.dump_ast {
        print!("{}", dump_ast(&table));
    }

    let program = compile_program(&table, Intrinsics::host())?;
    log::info!(
        "{}: {} byte(s) of code, entry 0x{:04x}",
        cli.file,
        program.machine_code().len(),
        program.entry()
    );
    if cli.dump_code {
        match dump_code(&program) {
            Ok(dump) => print!("{dump}"),
            Err(err) => log::warn!("could not disassemble: {err}"),
        }
    }

    if cli.no_exec {
        return Ok(());
    }
    execute(&program)?;
    Ok(())
}

fn report(file: &str, err: &Error) {
    match err.pos() {
        Some(pos) => eprintln!(
            "{file}:{}:{}: {} error: {}",
            pos.line,
            pos.column,
            err.stage(),
            err.message()
        ),
        None => eprintln!("{file}: {} error: {}", err.stage(), err.message()),
    }
}
