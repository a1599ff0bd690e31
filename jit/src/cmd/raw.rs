// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use clap::Args;
use spark_jit::{error::Result, raw::raw_demo};

#[derive(Args)]
pub struct Cmd {}

impl Cmd {
    pub fn execute(&self) -> Result<()> {
        println!("Result = {:X}", raw_demo()?);
        Ok(())
    }
}
