use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use petal_cli::cli_args::{Cli, Command};
use petal_cli::{run_check, run_render};

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => {
            let output = run_render(&args)?;
            match &args.output {
                Some(path) => fs::write(path, output)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(output.as_bytes())?;
                    stdout.write_all(b"\n")?;
                }
            }
        }
        Command::Check(args) => {
            run_check(&args)?;
            eprintln!("{}: ok", args.template.display());
        }
    }
    Ok(())
}
