// Copyright (C) 2024 Ethan Uppal. All rights reserved.

pub mod compiler;
pub mod error;
pub mod executable_memory;
mod host;
pub mod raw;
pub mod x86;
