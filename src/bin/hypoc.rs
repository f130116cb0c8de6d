use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Assembler for the Hypo virtual machine.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Destination for the assembled object
    #[arg(short, value_name = "PATH", default_value = "out")]
    output: PathBuf,

    /// Assembly source file
    file: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let src = match fs::read(&args.file) {
        Ok(src) => src,
        Err(e) => {
            eprintln!("{}: {e}", args.file.display());
            return ExitCode::FAILURE;
        }
    };

    let mut out = match File::create(&args.output) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}: {e}", args.output.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = hypo::assemble(&src, &mut out, &mut io::stderr()) {
        // Do not leave a half-written object behind
        drop(out);
        let _ = fs::remove_file(&args.output);
        eprintln!("{}: {e}", args.file.display());
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
