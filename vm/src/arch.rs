// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use core::ops::Range;
use static_assertions::const_assert;

/// A value held in a local.
pub type Word = u64;

/// One encoded [`crate::op::Op`].
pub type RawOp = u32;

pub type InstructionAddress = usize;
pub type InstructionOffset = isize;
pub type LocalAddress = u8;

pub const LOCAL_ADDRESS_BITS: usize = 8;
const_assert!(LOCAL_ADDRESS_BITS <= LocalAddress::BITS as usize);

pub const LOCALS_COUNT: usize = 256;
const_assert!(LOCALS_COUNT <= 1usize << LOCAL_ADDRESS_BITS);

/// Size in bytes of one local in a native frame.
pub const LOCAL_SIZE: usize = core::mem::size_of::<Word>();

pub const ARGUMENT_LOCALS: Range<usize> = 0..8;
const_assert!(ARGUMENT_LOCALS.end <= LOCALS_COUNT);

pub const RETURN_LOCAL: usize = 0;
const_assert!(RETURN_LOCAL < LOCALS_COUNT);
