use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fae::diagnostic::{Diagnostic, ansi::AnsiRenderer, json, registry};
use fae::host::{self, HostConfig};
use fae::{Machine, compile};

#[derive(Parser, Debug)]
#[command(name = "fae", version)]
#[command(about = "Compile and run fae scripts")]
struct Cli {
    /// Script to run
    file: Option<PathBuf>,

    /// Print the compiled program as JSON instead of running it
    #[arg(long)]
    dump: bool,

    /// Report errors as JSON on stderr
    #[arg(long)]
    json: bool,

    /// `@Main` calls per second (0 = as fast as possible)
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Stop after this many `@Main` calls
    #[arg(long)]
    frames: Option<u64>,

    /// Explain an error code, e.g. FAE-R008
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,
}

fn report(cli: &Cli, d: &Diagnostic) {
    if cli.json {
        eprintln!("{}", json::render(d));
    } else {
        let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
        eprint!("{}", renderer.render(d));
    }
}

fn main() -> ExitCode {
    host::init_logging();
    let cli = Cli::parse();

    if let Some(code) = &cli.explain {
        return match registry::lookup(&code.to_uppercase()) {
            Some(entry) => {
                print!("{}", entry.long);
                ExitCode::SUCCESS
            }
            None => {
                report(&cli, &Diagnostic::error(format!("unknown error code '{code}'")));
                ExitCode::FAILURE
            }
        };
    }

    let Some(path) = &cli.file else {
        report(&cli, &Diagnostic::error("no script given").with_suggestion("usage: fae <file>"));
        return ExitCode::FAILURE;
    };
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            report(&cli, &Diagnostic::error(format!("cannot read {}: {e}", path.display())));
            return ExitCode::FAILURE;
        }
    };

    let program = match compile(&source, host::NATIVES) {
        Ok(p) => p,
        Err(e) => {
            report(&cli, &Diagnostic::from(&e).with_source(source));
            return ExitCode::FAILURE;
        }
    };

    if cli.dump {
        return match serde_json::to_string_pretty(&program) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                report(&cli, &Diagnostic::error(format!("cannot serialize program: {e}")));
                ExitCode::FAILURE
            }
        };
    }

    if cli.frames.is_some() && program.event("Main").is_none() {
        report(&cli, &Diagnostic::warning("--frames has no effect: the script declares no @Main event"));
    }

    let config = HostConfig { fps: cli.fps, frames: cli.frames };
    let mut machine = Machine::new(program);
    match host::run_events(&mut machine, &config) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            report(&cli, &Diagnostic::from(&e).with_source(source));
            ExitCode::FAILURE
        }
    }
}
