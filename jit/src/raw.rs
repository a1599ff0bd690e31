// Copyright (C) 2024 Ethan Uppal. All rights reserved.

//! Hand-written machine code, run without the compiler.

use log::debug;

use crate::{
    compiler::ensure_host_is_x86_64, error::Result,
    executable_memory::ExecutableMemory,
};

/// `mov eax, 0x1234; ret`
pub const RAW_DEMO_CODE: [u8; 6] = [0xb8, 0x34, 0x12, 0x00, 0x00, 0xc3];

/// Copies `code` into executable memory and calls it as a function that
/// takes nothing and returns a `u32` in EAX.
///
/// # Safety
///
/// `code` must be x86-64 code that follows the C calling convention for
/// `extern "C" fn() -> u32`.
pub unsafe fn run_raw(code: &[u8]) -> Result<u32> {
    ensure_host_is_x86_64()?;
    let memory = ExecutableMemory::from_code(code)?;
    let function = memory.as_fn::<extern "C" fn() -> u32>()?;
    let result = function();
    debug!("raw code returned {:#x}", result);
    Ok(result)
}

/// Runs [`RAW_DEMO_CODE`], which returns `0x1234`.
pub fn raw_demo() -> Result<u32> {
    // SAFETY: the demo code only sets EAX and returns.
    unsafe { run_raw(&RAW_DEMO_CODE) }
}
