// Copyright (C) 2024 Ethan Uppal. All rights reserved.

mod cmd;

use clap::{Parser, Subcommand};
use spark_jit::error::Result;

#[derive(Parser)]
#[command(name = "spark", about = "Run spark bytecode through a JIT")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run `mov eax, 0x1234; ret` straight from executable memory.
    Raw(cmd::raw::Cmd),
    /// Run a listing with the JIT or the interpreter.
    Run(cmd::run::Cmd),
    /// Parse a listing and print it with its encoding.
    Check(cmd::check::Cmd),
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Raw(cmd) => cmd.execute()?,
        Commands::Run(cmd) => cmd.execute()?,
        Commands::Check(cmd) => cmd.execute()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use crate::{Cli, Commands};

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_takes_negative_arguments() {
        let cli = Cli::try_parse_from([
            "spark",
            "run",
            "demos/factorial.fasm",
            "--args",
            "-1,2",
            "--interpret",
        ])
        .expect("arguments are valid");
        match cli.command {
            Commands::Run(cmd) => {
                assert_eq!(vec![-1, 2], cmd.args);
                assert!(cmd.interpret);
                assert!(!cmd.dump);
            }
            _ => panic!("expected `run`"),
        }
    }
}
