//! MiniJS runner
//!
//! Interactive shell and script runner over a [`minijs::Session`].

use minijs::{Session, Value};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        run_file(&args[1]);
    } else {
        run_repl();
    }
}

fn new_session() -> Session {
    let session = match Session::new() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // A minimal host library: print(...) writes its arguments to stdout.
    let registered = session.register("print", |args, _this| {
        let parts: Vec<String> = args.iter().map(|v| v.to_string()).collect();
        println!("{}", parts.join(" "));
        Ok(Value::Null)
    });
    if let Err(e) = registered {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    session
}

fn run_file(filename: &str) {
    let source = match std::fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading {}: {}", filename, e);
            std::process::exit(1);
        }
    };

    let session = new_session();
    match session.run(&source) {
        Ok(result) => {
            if !result.is_empty() {
                println!("{}", result);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_repl() {
    println!("MiniJS - Rust Edition");
    println!("Type script code to evaluate, Ctrl+D to exit.\n");

    let session = new_session();
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error initializing line editor: {}", e);
            std::process::exit(1);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                match session.run(line) {
                    Ok(result) => println!("{}", result),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }
}
