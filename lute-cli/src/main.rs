//! `lute` — the Lute language front-end driver.
//!
//! ```text
//! lute check file.lute          # Parse + bind names; report OK or the error
//! lute dump file.lute           # Parse and print every function with its body
//! lute dump --json file.lute    # The same, as a JSON AST
//! lute tokens file.lute         # Print the token stream (debugging aid)
//! lute version                  # Print version info
//! ```

use std::fs;
use std::process::ExitCode;

use lute_lexer::{Lexer, Token};
use lute_parser::{dump, ParseError, SymbolTable};

fn main() -> ExitCode {
    // Run the real entry point on a thread with a large stack so deeply
    // nested expressions don't overflow the recursive-descent parser.
    const STACK_SIZE: usize = 64 * 1024 * 1024; // 64 MiB
    let handler = std::thread::Builder::new()
        .name("lute-main".into())
        .stack_size(STACK_SIZE)
        .spawn(lute_main)
        .expect("failed to spawn main thread");
    match handler.join() {
        Ok(code) => code,
        Err(e) => std::panic::resume_unwind(e),
    }
}

fn lute_main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::FAILURE;
    }
    match args[1].as_str() {
        "check" => cmd_check(&args[2..]),
        "dump" => cmd_dump(&args[2..]),
        "tokens" => cmd_tokens(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("lute {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        // `lute file.lute` is shorthand for `lute check file.lute`.
        arg if std::path::Path::new(arg)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("lute")) =>
        {
            cmd_check(&args[1..])
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  lute check file.lute          Parse + bind names");
    eprintln!("  lute dump [--json] file.lute  Print every function with its body");
    eprintln!("  lute tokens file.lute         Print the token stream");
    eprintln!("  lute version                  Print version info");
}

fn read_source(path: &str) -> Result<String, ExitCode> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("could not read {path}: {e}");
        ExitCode::FAILURE
    })
}

fn report(err: &ParseError) -> ExitCode {
    eprintln!("{err}");
    ExitCode::FAILURE
}

fn cmd_check(args: &[String]) -> ExitCode {
    let Some(path) = args.first() else {
        print_usage();
        return ExitCode::FAILURE;
    };
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut st = SymbolTable::new();
    match lute_parser::parse(&source, path, &mut st) {
        Ok(out) => {
            for w in &out.warnings {
                eprintln!("{w}");
            }
            println!("OK");
            ExitCode::SUCCESS
        }
        Err(e) => report(&e),
    }
}

fn cmd_dump(args: &[String]) -> ExitCode {
    let json = args.first().is_some_and(|a| a == "--json");
    let rest = if json { &args[1..] } else { args };
    let Some(path) = rest.first() else {
        print_usage();
        return ExitCode::FAILURE;
    };
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut st = SymbolTable::new();
    match lute_parser::parse(&source, path, &mut st) {
        Ok(out) => {
            if json {
                match serde_json::to_string_pretty(&out.root) {
                    Ok(s) => println!("{s}"),
                    Err(e) => {
                        eprintln!("could not serialize AST: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                print!("{}", dump::dump_all(&st, false));
            }
            ExitCode::SUCCESS
        }
        Err(e) => report(&e),
    }
}

fn cmd_tokens(args: &[String]) -> ExitCode {
    let Some(path) = args.first() else {
        print_usage();
        return ExitCode::FAILURE;
    };
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut lex = match Lexer::new(path, &source) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    loop {
        let line = lex.line();
        if lex.attr.is_empty() {
            println!("{}:{}: {}", line.fileidx, line.line, lex.token);
        } else {
            println!("{}:{}: {} ({})", line.fileidx, line.line, lex.token, lex.attr);
        }
        if lex.token == Token::EndOfFile {
            break;
        }
        if let Err(e) = lex.next() {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
