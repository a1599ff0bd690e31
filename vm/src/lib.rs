// Copyright (C) 2024 Ethan Uppal. All rights reserved.

#![forbid(unsafe_code)]

pub mod arch;
pub mod interpreter;
pub mod listing;
pub mod op;
pub mod program;
pub mod runtime;
