use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use hypo::Cpu;

/// Virtual machine for Hypo object files.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Object file produced by hypoc
    file: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let obj = match fs::read(&args.file) {
        Ok(obj) => obj,
        Err(e) => {
            println!("{} {e}", "error:".red());
            return ExitCode::FAILURE;
        }
    };

    let mut cpu = match Cpu::new(obj) {
        Ok(cpu) => cpu,
        Err(e) => {
            println!("{} {e}", "error:".red());
            return ExitCode::FAILURE;
        }
    };

    let mut stdout = io::stdout();
    while cpu.running() {
        if let Err(e) = cpu.step(&mut stdout) {
            println!("{} {e}\n", "fatal:".red());
            let _ = cpu.write_trace(&mut stdout.lock());
            break;
        }
    }

    ExitCode::SUCCESS
}
