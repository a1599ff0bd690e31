// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use std::{fs, path::PathBuf};

use clap::Args;
use spark_jit::error::Result;
use spark_vm::listing;

#[derive(Args)]
pub struct Cmd {
    /// Path to the listing.
    pub filepath: PathBuf,
}

impl Cmd {
    pub fn execute(&self) -> Result<()> {
        let source = fs::read_to_string(&self.filepath)?;
        let function = listing::parse(&source)?;
        let encoded = function.encode();
        for (at, (op, raw)) in
            function.body.iter().zip(&encoded.body).enumerate()
        {
            println!("{:>4}  {:08x}  {}", at, raw, op);
        }
        Ok(())
    }
}
