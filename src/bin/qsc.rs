// questscript CLI
// Usage: qsc [FILE] [OPTIONS]

use clap::Parser;
use colored::*;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use questscript::compiler::CompileOptions;
use questscript::vm::{HostEvent, RunResult, Value, Vm, WaitKind, World};

/// questscript - an embeddable quest-dialog scripting engine
#[derive(Parser)]
#[command(name = "qsc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run quest scripts", long_about = None)]
struct Cli {
    /// Script file to run
    file: Option<PathBuf>,

    /// Execute inline code
    #[arg(short = 'e', long = "exec")]
    exec: Option<String>,

    /// Check for errors without running
    #[arg(long = "check")]
    check: bool,

    /// Print the compiled bytecode listing
    #[arg(short = 'd', long = "disasm")]
    disasm: bool,

    /// Treat unresolved labels and arity mismatches as errors
    #[arg(long = "strict")]
    strict: bool,
}

fn main() {
    let cli = Cli::parse();

    let options = CompileOptions {
        strict_labels: cli.strict,
        strict_arity: cli.strict,
        ..CompileOptions::default()
    };

    let result = match (&cli.exec, &cli.file) {
        (Some(code), _) => run_source(code, "<exec>", &cli, &options),
        (None, Some(path)) => {
            let name = path.to_string_lossy().to_string();
            match fs::read_to_string(path) {
                Ok(source) => run_source(&source, &name, &cli, &options),
                Err(e) => Err(format!("Error reading file '{}': {}", path.display(), e)),
            }
        }
        (None, None) => Err("no input; pass a script file or -e CODE".to_string()),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run_source(source: &str, name: &str, cli: &Cli, options: &CompileOptions) -> Result<(), String> {
    let world = World::new();
    let script = world
        .compile(source, name, options)
        .map_err(|e| e.format())?;

    for warning in &script.warnings {
        eprintln!("{}", warning.format());
    }

    if cli.disasm {
        print!("{}", script.disassemble());
        if cli.check {
            return Ok(());
        }
    }
    if cli.check {
        println!("{} No errors found in {}", "✓".green(), name);
        return Ok(());
    }

    // a single local actor answers the dialog on stdin
    world.attach_actor(1, questscript::vm::Actor::default());
    let mut instance = world.instantiate(&script, 1, 0);
    let vm = Vm::new();

    let mut result = vm.run(&mut instance);
    loop {
        let mut string_input = false;
        for event in world.drain_events() {
            match event {
                HostEvent::Message { text, .. } => println!("{}", text),
                HostEvent::NextPrompt { .. } => {
                    println!("{}", "-- next --".bright_black());
                }
                HostEvent::Menu { options, .. } => {
                    for (i, option) in options.iter().enumerate() {
                        println!("  {} {}", format!("{}.", i + 1).cyan(), option);
                    }
                }
                HostEvent::InputRequest {
                    string_input: wants_string,
                    ..
                } => string_input = wants_string,
                HostEvent::CloseDialog { .. } => {
                    println!("{}", "-- close --".bright_black());
                }
            }
        }

        match result {
            RunResult::Finished => break,
            RunResult::Errored(e) => {
                for note in &instance.warnings {
                    eprintln!("{} {}", "!".yellow(), note);
                }
                return Err(e.format());
            }
            RunResult::Suspended(WaitKind::Timer(_)) => {
                result = vm.resume(&mut instance, Value::Int(0));
            }
            RunResult::Suspended(WaitKind::Input) => {
                let delivered = read_reply(string_input)?;
                result = vm.resume(&mut instance, delivered);
            }
        }
    }

    for note in &instance.warnings {
        eprintln!("{} {}", "!".yellow(), note);
    }
    Ok(())
}

fn read_reply(string_input: bool) -> Result<Value, String> {
    print!("{} ", ">".cyan());
    io::stdout().flush().map_err(|e| e.to_string())?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| e.to_string())?;
    let line = line.trim_end_matches(['\n', '\r']);

    if string_input {
        return Ok(Value::str_from(line));
    }
    match line.trim().parse::<i32>() {
        Ok(v) => Ok(Value::Int(v)),
        // a bare Enter acknowledges a `next` prompt
        Err(_) if line.trim().is_empty() => Ok(Value::Int(0)),
        Err(_) => Err(format!("expected a number, got '{}'", line)),
    }
}
