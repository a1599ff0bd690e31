// Copyright (C) 2024 Ethan Uppal. All rights reserved.

//! Just enough of an x86-64 encoder for the compiler: 64-bit moves and ALU
//! ops against `[base + disp]` memory operands, calls through a register,
//! and rel32 jumps to labels.

use enum_tags::enum_tags;
use paste::paste;
use static_assertions::const_assert_eq;

use crate::error::{JitError, Result};

/// A general purpose register, tagged with its hardware number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[enum_tags(public, repr(u8))]
pub enum Reg {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

const_assert_eq!(Reg::TAG_COUNT, 16);

impl Reg {
    pub const fn number(self) -> u8 {
        self.tag()
    }

    /// The three bits that go in ModRM, SIB or the opcode itself.
    const fn low_bits(self) -> u8 {
        self.number() & 0b111
    }

    /// Whether the fourth bit has to go in a REX prefix.
    const fn is_extended(self) -> bool {
        self.number() & 0b1000 != 0
    }
}

/// Condition codes, tagged with the low nibble of their `jcc`/`setcc`
/// opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[enum_tags(public, repr(u8))]
pub enum Condition {
    Equal = 4,
    NotEqual,
    Less = 12,
    GreaterOrEqual,
    LessOrEqual,
    Greater,
}

/// A `[base + disp]` memory operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mem {
    pub base: Reg,
    pub disp: i32,
}

impl Mem {
    pub const fn new(base: Reg, disp: i32) -> Self {
        Self { base, disp }
    }
}

/// A jump target, bound to a code offset at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

/// A rel32 field waiting for its label's offset.
struct Fixup {
    at: usize,
    label: Label,
}

const REX: u8 = 0x40;
const REX_W: u8 = 0b1000;
const REX_R: u8 = 0b0100;
const REX_B: u8 = 0b0001;

const MOD_INDIRECT: u8 = 0b00;
const MOD_DISP8: u8 = 0b01;
const MOD_DISP32: u8 = 0b10;
const MOD_DIRECT: u8 = 0b11;

/// `rm` value that means "a SIB byte follows".
const RM_SIB: u8 = 0b100;
/// SIB with no index and RSP/R12 as base.
const SIB_BASE_ONLY: u8 = 0x24;

macro_rules! reg_mem_ops {
    ($($name:ident => [$($opcode:literal),+]),* $(,)?) => {
        paste! {
            $(
                #[doc = concat!("`", stringify!($name), " dst, qword [mem]`")]
                pub fn [<$name _r64_mem>](&mut self, dst: Reg, src: Mem) {
                    self.rex_mem(true, dst, src);
                    self.emit(&[$($opcode),+]);
                    self.modrm_mem(dst.low_bits(), src);
                }
            )*
        }
    };
}

#[derive(Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset into the code.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    fn emit_i32(&mut self, value: i32) {
        self.emit(&value.to_le_bytes());
    }

    // --- labels ---------------------------------------------------------

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current position.
    pub fn bind(&mut self, label: Label) -> Result<()> {
        let slot = &mut self.labels[label.0];
        if slot.is_some() {
            return Err(JitError::LabelRebound(label));
        }
        *slot = Some(self.code.len());
        Ok(())
    }

    /// `jmp rel32`
    pub fn jmp(&mut self, label: Label) {
        self.emit_u8(0xe9);
        self.rel32(label);
    }

    /// `jcc rel32`
    pub fn jcc(&mut self, condition: Condition, label: Label) {
        self.emit(&[0x0f, 0x80 | condition.tag()]);
        self.rel32(label);
    }

    fn rel32(&mut self, label: Label) {
        self.fixups.push(Fixup {
            at: self.code.len(),
            label,
        });
        self.emit_i32(0);
    }

    /// Resolves every jump and hands back the machine code.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        for Fixup { at, label } in self.fixups {
            let target =
                self.labels[label.0].ok_or(JitError::UnboundLabel(label))?;
            let next = at + 4;
            let rel = target as i64 - next as i64;
            self.code[at..next].copy_from_slice(&(rel as i32).to_le_bytes());
        }
        Ok(self.code)
    }

    // --- moves ----------------------------------------------------------

    /// `mov dst32, imm32`, zero-extending into the full register.
    pub fn mov_r32_imm32(&mut self, dst: Reg, imm: u32) {
        if dst.is_extended() {
            self.emit_u8(REX | REX_B);
        }
        self.emit_u8(0xb8 + dst.low_bits());
        self.emit(&imm.to_le_bytes());
    }

    /// `mov dst, imm64`
    pub fn mov_r64_imm64(&mut self, dst: Reg, imm: u64) {
        self.emit_u8(REX | REX_W | rex_b(dst));
        self.emit_u8(0xb8 + dst.low_bits());
        self.emit(&imm.to_le_bytes());
    }

    /// `mov dst, src`
    pub fn mov_r64_r64(&mut self, dst: Reg, src: Reg) {
        self.emit_u8(REX | REX_W | rex_r(src) | rex_b(dst));
        self.emit_u8(0x89);
        self.modrm_direct(src.low_bits(), dst);
    }

    /// `mov qword [dst], src`
    pub fn mov_mem_r64(&mut self, dst: Mem, src: Reg) {
        self.rex_mem(true, src, dst);
        self.emit_u8(0x89);
        self.modrm_mem(src.low_bits(), dst);
    }

    /// `movzx dst32, src8`
    pub fn movzx_r32_r8(&mut self, dst: Reg, src: Reg) {
        // without REX, byte registers 4..=7 would be AH, CH, DH and BH
        if dst.is_extended() || src.number() >= 4 {
            self.emit_u8(REX | rex_r(dst) | rex_b(src));
        }
        self.emit(&[0x0f, 0xb6]);
        self.modrm_direct(dst.low_bits(), src);
    }

    // --- arithmetic -----------------------------------------------------

    reg_mem_ops! {
        mov => [0x8b],
        add => [0x03],
        sub => [0x2b],
        cmp => [0x3b],
        imul => [0x0f, 0xaf],
    }

    /// `test a, b`
    pub fn test_r64_r64(&mut self, a: Reg, b: Reg) {
        self.emit_u8(REX | REX_W | rex_r(b) | rex_b(a));
        self.emit_u8(0x85);
        self.modrm_direct(b.low_bits(), a);
    }

    /// `setcc dst8`
    pub fn setcc_r8(&mut self, condition: Condition, dst: Reg) {
        if dst.number() >= 4 {
            self.emit_u8(REX | rex_b(dst));
        }
        self.emit(&[0x0f, 0x90 | condition.tag()]);
        self.modrm_direct(0, dst);
    }

    // --- stack and control ----------------------------------------------

    pub fn push(&mut self, reg: Reg) {
        if reg.is_extended() {
            self.emit_u8(REX | REX_B);
        }
        self.emit_u8(0x50 + reg.low_bits());
    }

    pub fn pop(&mut self, reg: Reg) {
        if reg.is_extended() {
            self.emit_u8(REX | REX_B);
        }
        self.emit_u8(0x58 + reg.low_bits());
    }

    /// `call target`, absolute through a register.
    pub fn call_r64(&mut self, target: Reg) {
        if target.is_extended() {
            self.emit_u8(REX | REX_B);
        }
        self.emit_u8(0xff);
        self.modrm_direct(2, target);
    }

    pub fn ret(&mut self) {
        self.emit_u8(0xc3);
    }

    pub fn nop(&mut self) {
        self.emit_u8(0x90);
    }

    // --- operand encoding -----------------------------------------------

    fn rex_mem(&mut self, wide: bool, reg: Reg, mem: Mem) {
        let w = if wide { REX_W } else { 0 };
        let rex = REX | w | rex_r(reg) | rex_b(mem.base);
        if rex != REX {
            self.emit_u8(rex);
        }
    }

    fn modrm_direct(&mut self, reg_field: u8, rm: Reg) {
        self.emit_u8(modrm(MOD_DIRECT, reg_field, rm.low_bits()));
    }

    fn modrm_mem(&mut self, reg_field: u8, mem: Mem) {
        let base = mem.base.low_bits();
        // mod 00 with base RBP/R13 means RIP-relative instead
        let mode = if mem.disp == 0 && base != 0b101 {
            MOD_INDIRECT
        } else if i8::try_from(mem.disp).is_ok() {
            MOD_DISP8
        } else {
            MOD_DISP32
        };

        self.emit_u8(modrm(mode, reg_field, base));
        if base == RM_SIB {
            self.emit_u8(SIB_BASE_ONLY);
        }
        match mode {
            MOD_DISP8 => self.emit_u8(mem.disp as i8 as u8),
            MOD_DISP32 => self.emit_i32(mem.disp),
            _ => {}
        }
    }
}

const fn modrm(mode: u8, reg_field: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg_field & 0b111) << 3) | (rm & 0b111)
}

const fn rex_r(reg: Reg) -> u8 {
    if reg.is_extended() {
        REX_R
    } else {
        0
    }
}

const fn rex_b(reg: Reg) -> u8 {
    if reg.is_extended() {
        REX_B
    } else {
        0
    }
}
