// HostLisp REPL - Read, Compile, Run
//
// Runs a file or an interactive loop over a Session. `--emit` prints the
// compiled host program for each form instead of running it.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use hostlisp::session::{Session, SessionOptions};
use hostlisp::types::Value;

/// HostLisp - a Common Lisp subset compiled to JavaScript
#[derive(Parser)]
#[command(name = "hostlisp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File to run; starts the REPL when absent
    file: Option<PathBuf>,

    /// Print compiled JavaScript instead of evaluating
    #[arg(long)]
    emit: bool,

    /// Start without the prelude macros
    #[arg(long)]
    no_prelude: bool,

    /// Host call depth limit
    #[arg(long, default_value_t = 10_000)]
    max_depth: usize,
}

/// Deep Lisp recursion runs on this much native stack.
const STACK_SIZE: usize = 512 * 1024 * 1024;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let worker = std::thread::Builder::new()
        .name("hostlisp".into())
        .stack_size(STACK_SIZE)
        .spawn(move || run(cli));
    match worker.map(|handle| handle.join()) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            eprintln!("hostlisp: worker thread panicked");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("hostlisp: cannot start worker thread: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> ExitCode {
    let options = SessionOptions {
        prelude: !cli.no_prelude,
        max_call_depth: cli.max_depth,
        ..SessionOptions::default()
    };
    let mut session = match Session::with_options(options) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Bootstrap error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.file {
        Some(path) => run_file(&mut session, path, cli.emit),
        None => repl(&mut session, cli.emit),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_file(session: &mut Session, path: &PathBuf, emit: bool) -> Result<(), String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    if emit {
        let text = session.compile_string(&source).map_err(|e| e.to_string())?;
        print!("{}", text);
    } else {
        session.eval_string(&source).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn repl(session: &mut Session, emit: bool) -> Result<(), String> {
    println!("HostLisp {} - Common Lisp subset on a JavaScript host", env!("CARGO_PKG_VERSION"));
    println!("Type (quit) or Ctrl-D to exit");
    println!();

    let mut rl = DefaultEditor::new().map_err(|e| e.to_string())?;
    let history = history_symbols(session);
    let mut code_buffer = String::new();

    loop {
        let prompt = if code_buffer.is_empty() { "CL-USER> " } else { ".....> " };
        match rl.readline(prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                let trimmed_line = line.trim();
                let quitting = trimmed_line == "(quit)" || trimmed_line == "(exit)";
                if code_buffer.is_empty() && quitting {
                    println!("Goodbye!");
                    break;
                }
                if !trimmed_line.is_empty() {
                    code_buffer.push_str(&line);
                    code_buffer.push('\n');
                }
                if !is_balanced(&code_buffer) {
                    continue;
                }
                let input = std::mem::take(&mut code_buffer);
                if input.trim().is_empty() {
                    continue;
                }
                if emit {
                    match session.compile_string(&input) {
                        Ok(text) => print!("{}", text),
                        Err(e) => println!("Error: {}", e),
                    }
                    continue;
                }
                match session.eval_string(&input) {
                    Ok(values) => {
                        for value in &values {
                            println!("{}", session.print(value));
                        }
                        let primary = values.into_iter().next().unwrap_or(Value::Nil);
                        remember(session, &history, primary);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                code_buffer.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.to_string()),
        }
    }
    Ok(())
}

/// `*`, `**` and `***`, newest first.
fn history_symbols(session: &mut Session) -> [hostlisp::symbol::SymbolId; 3] {
    let symbols = session.symbols_mut();
    let ids = ["*", "**", "***"].map(|name| symbols.intern_cl(name));
    for id in ids {
        symbols.symbol_mut(id).value = Some(Value::Nil);
    }
    ids
}

fn remember(session: &mut Session, history: &[hostlisp::symbol::SymbolId; 3], value: Value) {
    let symbols = session.symbols_mut();
    let [one, two, three] = *history;
    let previous = symbols.symbol(one).value.clone();
    let older = symbols.symbol(two).value.clone();
    symbols.symbol_mut(three).value = older;
    symbols.symbol_mut(two).value = previous;
    symbols.symbol_mut(one).value = Some(value);
}

/// Whether the parentheses of `s` are closed, ignoring strings and
/// comments.
fn is_balanced(s: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    let mut in_comment = false;

    for c in s.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => in_string = !in_string,
            ';' if !in_string => in_comment = true,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth <= 0 && !in_string
}
