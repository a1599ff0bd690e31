// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use log::debug;
use spark_vm::{
    arch::{
        InstructionAddress, InstructionOffset, LocalAddress, Word,
        ARGUMENT_LOCALS, LOCALS_COUNT, LOCAL_SIZE, RETURN_LOCAL,
    },
    op::{immediate_value, Op},
    program::DecodedFunction,
    runtime::Runtime,
};

use crate::{
    error::{JitError, Result},
    executable_memory::ExecutableMemory,
    host,
    x86::{Assembler, Condition, Label, Mem, Reg},
};

/// Native signature of a compiled function.
pub type NativeEntry = unsafe extern "C" fn(*mut Word, *mut Runtime) -> Word;

/// Holds the locals array for the whole call.
const LOCALS: Reg = Reg::Rbx;
/// Holds the runtime pointer for host calls.
const RUNTIME: Reg = Reg::R12;
/// Saved only so the stack stays 16-byte aligned at host calls.
const ALIGNMENT: Reg = Reg::R13;
const SCRATCH: Reg = Reg::Rax;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JitOptions {
    /// Map code read/write, then seal it read/execute. When off, the code
    /// is mapped read/write/execute throughout.
    pub write_xor_execute: bool,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            write_xor_execute: true,
        }
    }
}

impl JitOptions {
    pub fn with_write_xor_execute(mut self, enabled: bool) -> Self {
        self.write_xor_execute = enabled;
        self
    }
}

/// Native code for one function, ready to call.
#[derive(Debug)]
pub struct CompiledFunction {
    memory: ExecutableMemory,
    code_len: usize,
}

impl CompiledFunction {
    /// The emitted machine code.
    pub fn code(&self) -> &[u8] {
        &self.memory.as_slice()[..self.code_len]
    }

    /// Runs the function on a fresh zeroed frame with `args` in the
    /// argument locals, returning local 0.
    pub fn call(&self, args: &[Word], runtime: &mut Runtime) -> Result<Word> {
        if args.len() > ARGUMENT_LOCALS.len() {
            return Err(JitError::TooManyArguments {
                given: args.len(),
                max: ARGUMENT_LOCALS.len(),
            });
        }
        let mut locals = [0 as Word; LOCALS_COUNT];
        locals[ARGUMENT_LOCALS.start..ARGUMENT_LOCALS.start + args.len()]
            .copy_from_slice(args);

        // SAFETY: the code was emitted by `emit_function` for exactly this
        // signature, and only touches the 256 locals and the runtime.
        let entry = unsafe { self.memory.as_fn::<NativeEntry>() }?;
        Ok(unsafe { entry(locals.as_mut_ptr(), runtime) })
    }
}

/// Compiles `function` to native code and maps it.
pub fn compile(
    function: &DecodedFunction,
    options: &JitOptions,
) -> Result<CompiledFunction> {
    ensure_host_is_x86_64()?;

    let code = emit_function(function)?;
    let memory = if options.write_xor_execute {
        ExecutableMemory::from_code(&code)?
    } else {
        let mut memory = ExecutableMemory::of_size_rwx(code.len())?;
        memory.write(0, &code)?;
        memory
    };
    debug!(
        "compiled {} ops into {} bytes at {:p}",
        function.len(),
        code.len(),
        memory.start()
    );

    Ok(CompiledFunction {
        memory,
        code_len: code.len(),
    })
}

pub(crate) fn ensure_host_is_x86_64() -> Result<()> {
    if cfg!(target_arch = "x86_64") {
        Ok(())
    } else {
        Err(JitError::UnsupportedArchitecture(std::env::consts::ARCH))
    }
}

/// Translates `function` to x86-64 machine code with the [`NativeEntry`]
/// signature. Every local lives in memory at `[LOCALS + 8 * index]`.
pub fn emit_function(function: &DecodedFunction) -> Result<Vec<u8>> {
    validate(function)?;

    let mut asm = Assembler::new();
    let labels = (0..function.len())
        .map(|_| asm.new_label())
        .collect::<Vec<Label>>();

    emit_prologue(&mut asm);
    for (at, op) in function.body.iter().enumerate() {
        asm.bind(labels[at])?;
        emit_op(&mut asm, *op, at, &labels);
    }
    asm.finish()
}

/// Rejects jumps that leave the function and bodies that can fall off
/// their end.
fn validate(function: &DecodedFunction) -> Result<()> {
    match function.body.last() {
        Some(Op::Ret) | Some(Op::Jmp(_)) => {}
        _ => return Err(JitError::MissingReturn),
    }
    for (at, op) in function.body.iter().enumerate() {
        if let Some(offset) = op.jump_offset() {
            jump_target(at, offset, function.len())?;
        }
    }
    Ok(())
}

fn jump_target(
    at: InstructionAddress,
    offset: InstructionOffset,
    len: usize,
) -> Result<InstructionAddress> {
    let target = at as InstructionOffset + offset;
    if target < 0 || target as usize >= len {
        Err(JitError::InvalidJumpTarget { at, target })
    } else {
        Ok(target as InstructionAddress)
    }
}

fn local(address: LocalAddress) -> Mem {
    Mem::new(LOCALS, address as i32 * LOCAL_SIZE as i32)
}

fn emit_prologue(asm: &mut Assembler) {
    asm.push(LOCALS);
    asm.push(RUNTIME);
    asm.push(ALIGNMENT);
    asm.mov_r64_r64(LOCALS, Reg::Rdi);
    asm.mov_r64_r64(RUNTIME, Reg::Rsi);
}

fn emit_epilogue(asm: &mut Assembler) {
    asm.pop(ALIGNMENT);
    asm.pop(RUNTIME);
    asm.pop(LOCALS);
    asm.ret();
}

fn emit_op(
    asm: &mut Assembler,
    op: Op,
    at: InstructionAddress,
    labels: &[Label],
) {
    // targets were checked in `validate`
    let jump_label = |op: Op| {
        let offset = op.jump_offset().unwrap_or(0);
        labels[(at as InstructionOffset + offset) as usize]
    };

    match op {
        Op::Mov(to, from) => {
            asm.mov_r64_mem(SCRATCH, local(from));
            asm.mov_mem_r64(local(to), SCRATCH);
        }
        Op::MovI(to, constant) => {
            asm.mov_r64_imm64(SCRATCH, immediate_value(constant));
            asm.mov_mem_r64(local(to), SCRATCH);
        }
        Op::Add(to, a, b) => {
            asm.mov_r64_mem(SCRATCH, local(a));
            asm.add_r64_mem(SCRATCH, local(b));
            asm.mov_mem_r64(local(to), SCRATCH);
        }
        Op::Sub(to, a, b) => {
            asm.mov_r64_mem(SCRATCH, local(a));
            asm.sub_r64_mem(SCRATCH, local(b));
            asm.mov_mem_r64(local(to), SCRATCH);
        }
        Op::Mul(to, a, b) => {
            asm.mov_r64_mem(SCRATCH, local(a));
            asm.imul_r64_mem(SCRATCH, local(b));
            asm.mov_mem_r64(local(to), SCRATCH);
        }
        Op::Lt(to, a, b) => {
            asm.mov_r64_mem(SCRATCH, local(a));
            asm.cmp_r64_mem(SCRATCH, local(b));
            asm.setcc_r8(Condition::Less, SCRATCH);
            asm.movzx_r32_r8(SCRATCH, SCRATCH);
            asm.mov_mem_r64(local(to), SCRATCH);
        }
        Op::Bnz(a, _) => {
            asm.mov_r64_mem(SCRATCH, local(a));
            asm.test_r64_r64(SCRATCH, SCRATCH);
            asm.jcc(Condition::NotEqual, jump_label(op));
        }
        Op::Jmp(_) => asm.jmp(jump_label(op)),
        Op::SetValue(id, from) => {
            // set_value(runtime, id, value)
            asm.mov_r64_r64(Reg::Rdi, RUNTIME);
            asm.mov_r32_imm32(Reg::Rsi, id as u32);
            asm.mov_r64_mem(Reg::Rdx, local(from));
            asm.mov_r64_imm64(SCRATCH, host::set_value_address());
            asm.call_r64(SCRATCH);
        }
        Op::Safepoint => {
            // safepoint(runtime)
            asm.mov_r64_r64(Reg::Rdi, RUNTIME);
            asm.mov_r64_imm64(SCRATCH, host::safepoint_address());
            asm.call_r64(SCRATCH);
        }
        Op::Ret => {
            asm.mov_r64_mem(SCRATCH, local(RETURN_LOCAL as LocalAddress));
            emit_epilogue(asm);
        }
        Op::Nop => asm.nop(),
    }
}
