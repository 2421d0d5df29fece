//! ChocoLang command-line.
//!
//! When called without argument it drops into an interactive
//! read-evaluate-print loop. When called with a path it runs that file.

use std::env;
use std::fs;
use std::io;
use std::process::ExitCode;

use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use chocolang::interpreter::Interpreter;

fn main() -> ExitCode {
    init_tracing();

    let args = env::args().skip(1).collect::<Vec<_>>();
    let result = match args.first() {
        Some(path) => run_file(path),
        None => run_prompt(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_file(path: &str) -> Result<ExitCode, anyhow::Error> {
    let source =
        fs::read_to_string(path).with_context(|| format!("could not open file '{}'", path))?;

    let mut stdout = io::stdout();
    let mut interp = Interpreter::new(&mut stdout);
    match interp.eval(&source) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_prompt() -> Result<ExitCode, anyhow::Error> {
    println!("======================================");
    println!("  ChocoLang 0.6.0 - Almond Amour");
    println!("  Type 'exit' or 'quit' to leave");
    println!("======================================");
    println!();

    let mut rl = DefaultEditor::new()?;
    let mut stdout = io::stdout();
    let mut interp = Interpreter::new(&mut stdout);
    let mut line_number = 1u32;

    loop {
        let line = match rl.readline(&format!("choco:{}> ", line_number)) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let mut line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(&line);

        match line.as_str() {
            "exit" | "quit" => {
                println!("Goodbye!");
                break;
            }
            "help" => {
                print_help();
                line_number += 1;
                continue;
            }
            "clear" => {
                drop(interp);
                interp = Interpreter::new(&mut stdout);
                println!("Environment cleared.");
                line_number = 1;
                continue;
            }
            "vars" => {
                println!("Defined variables:");
                let bindings = interp.global_bindings();
                if bindings.is_empty() {
                    println!("  (none)");
                }
                for (name, value) in bindings {
                    println!("  {} = {}", name, value);
                }
                line_number += 1;
                continue;
            }
            "funcs" => {
                println!("Defined functions:");
                let signatures = interp.function_signatures();
                if signatures.is_empty() {
                    println!("  (none)");
                }
                for signature in signatures {
                    println!("  {}", signature);
                }
                line_number += 1;
                continue;
            }
            _ => {}
        }

        if !line.ends_with(';') && !line.ends_with('}') {
            line.push(';');
        }

        if let Err(e) = interp.eval(&line) {
            eprintln!("{}", e);
        }

        line_number += 1;
    }

    Ok(ExitCode::SUCCESS)
}

fn print_help() {
    println!("ChocoLang REPL Commands:");
    println!("  exit, quit     - Exit the REPL");
    println!("  help           - Show this help message");
    println!("  clear          - Clear all variables and functions");
    println!("  vars           - Show all defined variables");
    println!("  funcs          - Show all defined functions");
    println!();
    println!("Examples:");
    println!("  let x = 10;");
    println!("  puts x + 5;");
    println!("  fn greet(name) {{ return \"Hello, \" + name; }}");
    println!("  puts greet(\"World\");");
}
