// Copyright (C) 2024 Ethan Uppal. All rights reserved.

//! Entry points that compiled code calls back into. Their addresses are
//! baked into the code as immediates.

use spark_vm::{
    arch::Word,
    runtime::{Runtime, Value, ValueId},
};

pub(crate) type SetValueFn = unsafe extern "C" fn(*mut Runtime, u32, Word);
pub(crate) type SafepointFn = unsafe extern "C" fn(*mut Runtime);

/// # Safety
///
/// `runtime` must be the live, unaliased runtime the compiled function was
/// called with.
pub(crate) unsafe extern "C" fn set_value(
    runtime: *mut Runtime,
    id: u32,
    bits: Word,
) {
    let runtime = &mut *runtime;
    runtime.set_value(id as ValueId, Value::from_bits(bits));
}

/// # Safety
///
/// As for [`set_value`].
pub(crate) unsafe extern "C" fn safepoint(runtime: *mut Runtime) {
    let runtime = &mut *runtime;
    runtime.safepoint();
}

pub(crate) fn set_value_address() -> u64 {
    set_value as SetValueFn as usize as u64
}

pub(crate) fn safepoint_address() -> u64 {
    safepoint as SafepointFn as usize as u64
}
