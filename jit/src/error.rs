// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use std::io;

use spark_vm::{
    arch::InstructionAddress, interpreter::VmError, listing::ParseError,
};
use thiserror::Error;

use crate::x86::Label;

#[derive(Debug, Error)]
pub enum JitError {
    #[error("could not map {length} bytes: {source}")]
    Map {
        length: usize,
        #[source]
        source: io::Error,
    },

    #[error("could not change memory protection: {0}")]
    Protect(#[source] io::Error),

    #[error("executable memory must not be empty")]
    Empty,

    #[error("{len} bytes at offset {offset} overrun a {capacity}-byte region")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("memory is not writable")]
    NotWritable,

    #[error("memory is not executable")]
    NotExecutable,

    #[error("{0:?} is bound twice")]
    LabelRebound(Label),

    #[error("{0:?} is jumped to but never bound")]
    UnboundLabel(Label),

    #[error("op {at} jumps to {target}, outside the function")]
    InvalidJumpTarget {
        at: InstructionAddress,
        target: isize,
    },

    #[error("function can run past its last op")]
    MissingReturn,

    #[error("{given} arguments given but at most {max} fit")]
    TooManyArguments { given: usize, max: usize },

    #[error("cannot run x86-64 code on {0}")]
    UnsupportedArchitecture(&'static str),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("interpreter error: {0}")]
    Vm(#[from] VmError),
}

pub type Result<T> = std::result::Result<T, JitError>;
