// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use std::{fs, path::PathBuf};

use clap::Args;
use log::warn;
use spark_jit::{
    compiler::{compile, JitOptions},
    error::Result,
};
use spark_vm::{
    arch::Word, interpreter::Interpreter, listing, runtime::Runtime,
};

#[derive(Args)]
pub struct Cmd {
    /// Path to the listing.
    pub filepath: PathBuf,

    /// Run with the interpreter instead of the JIT.
    #[arg(long)]
    pub interpret: bool,

    /// Comma-separated arguments for locals 0 to 7.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub args: Vec<i64>,

    /// Print the generated machine code.
    #[arg(long)]
    pub dump: bool,

    /// Map code read/write/execute instead of sealing it.
    #[arg(long)]
    pub rwx: bool,

    /// Give up after this many interpreted ops.
    #[arg(long)]
    pub step_limit: Option<u64>,
}

impl Cmd {
    pub fn execute(&self) -> Result<()> {
        let source = fs::read_to_string(&self.filepath)?;
        let function = listing::parse(&source)?;
        let args = self.args.iter().map(|&arg| arg as Word).collect::<Vec<_>>();
        let mut runtime = Runtime::new();
        for flag in self.ignored_flags() {
            warn!("{} has no effect {}", flag, self.engine_description());
        }

        let result = if self.interpret {
            let mut interpreter =
                Interpreter::new(&function.encode()).with_arguments(&args)?;
            if let Some(limit) = self.step_limit {
                interpreter = interpreter.with_step_limit(limit);
            }
            interpreter.run(&mut runtime)?
        } else {
            let options =
                JitOptions::default().with_write_xor_execute(!self.rwx);
            let compiled = compile(&function, &options)?;
            if self.dump {
                print_hex(compiled.code());
            }
            compiled.call(&args, &mut runtime)?
        };

        println!("Result = {}", result as i64);
        for (id, value) in runtime.values() {
            println!("value {} = {}", id, value);
        }
        println!("safepoints: {}", runtime.safepoint_count());
        Ok(())
    }

    /// Flags that were given but mean nothing to the chosen engine.
    fn ignored_flags(&self) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if self.interpret {
            if self.dump {
                ignored.push("--dump");
            }
            if self.rwx {
                ignored.push("--rwx");
            }
        } else if self.step_limit.is_some() {
            ignored.push("--step-limit");
        }
        ignored
    }

    fn engine_description(&self) -> &'static str {
        if self.interpret {
            "with --interpret"
        } else {
            "without --interpret"
        }
    }
}

fn print_hex(code: &[u8]) {
    for (line, chunk) in code.chunks(16).enumerate() {
        let bytes = chunk
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{:04x}: {}", line * 16, bytes);
    }
}
