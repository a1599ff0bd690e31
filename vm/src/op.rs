// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use std::fmt;

use enum_tags::enum_tags;
use static_assertions::const_assert;

use crate::arch::{
    InstructionOffset, LocalAddress, RawOp, Word, LOCAL_ADDRESS_BITS,
};

/// Smallest sized integer type that can fit an op code.
pub type RawOpCode = u8;

/// Smallest sized integer type that can fit an immediate value.
pub type Immediate = u16;


/// Bits for opcode.
pub const OPCODE_BITS: usize = 8; // the types above are just the smallest
                                  // thing that fits; these are the actual
                                  // widths, which may be less.
const_assert!(OPCODE_BITS <= RawOpCode::BITS as usize);

/// Bits for immediate value.
pub const IMM_BITS: usize = 16;
const_assert!(IMM_BITS <= Immediate::BITS as usize);

/// Bits for extended immediate value.
pub const IMM_EXT_BITS: usize = 24;
const_assert!(IMM_EXT_BITS <= RawOp::BITS as usize);

#[rustfmt::skip]
mod encoding_spec {
    use super::*;

//  +------------------------------------------------------------------------------------+
//  | Encodings (inspired by Lua). `Op`s fit in one `RawOp`.                             |
//  +------------------------------------------------------------------------------------+
//  | ABC (3 addresses):                                                                 |
      const_assert!(OPCODE_BITS + 3 * LOCAL_ADDRESS_BITS <= RawOp::BITS as usize);
//  | AB (2 addresses):                                                                  |
      const_assert!(OPCODE_BITS + 2 * LOCAL_ADDRESS_BITS <= RawOp::BITS as usize);
//  | AI (address + immediate)                                                           |
      const_assert!(OPCODE_BITS + LOCAL_ADDRESS_BITS + IMM_BITS <= RawOp::BITS as usize);
//  | IX (extended immediate)                                                            |
      const_assert!(OPCODE_BITS + IMM_EXT_BITS <= RawOp::BITS as usize);
//  | N (no operands)                                                                    |
      const_assert!(OPCODE_BITS <= RawOp::BITS as usize);
//  +------------------------------------------------------------------------------------+
}

/// A bytecode operation. Locals are [`Word`]s; arithmetic wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[enum_tags(private, repr(RawOpCode))]
pub enum Op {
    /// `Self::Mov(a, b)` copies the contents at address `b` to `a`.
    Mov(LocalAddress, LocalAddress),
    /// `Self::MovI(a, i)` loads `i`, sign-extended, at address `a`.
    MovI(LocalAddress, Immediate),
    /// `Self::Add(a, b, c)` loads the sum of the contents at addresses `b`
    /// and `c` at address `a`.
    Add(LocalAddress, LocalAddress, LocalAddress),
    /// `Self::Sub(a, b, c)` loads `b - c` at address `a`.
    Sub(LocalAddress, LocalAddress, LocalAddress),
    /// `Self::Mul(a, b, c)` loads `b * c` at address `a`.
    Mul(LocalAddress, LocalAddress, LocalAddress),
    /// `Self::Lt(a, b, c)` loads 1 at address `a` if `b < c` as signed
    /// integers, 0 otherwise.
    Lt(LocalAddress, LocalAddress, LocalAddress),
    /// `Self::Bnz(a, off)` jumps by the sign-extended `off` ops, relative to
    /// this one, if the contents at address `a` are nonzero.
    Bnz(LocalAddress, Immediate),
    /// `Self::Jmp(off)` jumps by the sign-extended `off` ops, relative to
    /// this one.
    Jmp(ExtendedImmediate),
    /// `Self::SetValue(id, b)` hands the contents at address `b` to the host
    /// under value id `id`.
    SetValue(LocalAddress, LocalAddress),
    /// `Self::Safepoint` lets the host collect garbage.
    Safepoint,
    /// `Self::Ret` returns the contents at address 0.
    Ret,
    /// `Self::Nop` has no effect.
    Nop,
}

const_assert!(Op::TAG_COUNT <= 1 << OPCODE_BITS);

/// An `IMM_EXT_BITS`-bit twos complement immediate. Bits above
/// `IMM_EXT_BITS` are always zero, so it survives packing unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtendedImmediate(RawOp);

impl ExtendedImmediate {
    pub const MAX: Self = Self(bitmask(IMM_EXT_BITS));

    /// `None` if `bits` does not fit in `IMM_EXT_BITS` bits.
    pub const fn new(bits: RawOp) -> Option<Self> {
        if bits & !bitmask(IMM_EXT_BITS) == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// The immediate for a relative jump by `offset` ops, if it fits.
    pub const fn from_offset(offset: InstructionOffset) -> Option<Self> {
        let bound: InstructionOffset = 1 << (IMM_EXT_BITS - 1);
        if offset < -bound || offset >= bound {
            None
        } else {
            Some(Self(offset as RawOp & bitmask(IMM_EXT_BITS)))
        }
    }

    pub const fn bits(self) -> RawOp {
        self.0
    }
}

impl Op {
    /// Encodes this operation as a [`RawOp`].
    pub const fn encode_packed(&self) -> RawOp {
        let encoded_args = match *self {
            Self::Mov(a, b) | Self::SetValue(a, b) => {
                Self::encode_packed_ab_args(a, b)
            }
            Self::MovI(a, i) | Self::Bnz(a, i) => {
                Self::encode_packed_ai_args(a, i)
            }
            Self::Add(a, b, c)
            | Self::Sub(a, b, c)
            | Self::Mul(a, b, c)
            | Self::Lt(a, b, c) => Self::encode_packed_abc_args(a, b, c),
            Self::Jmp(ix) => Self::encode_packed_ix_args(ix),
            Self::Safepoint | Self::Ret | Self::Nop => 0,
        };

        (self.opcode() as RawOp) | (encoded_args << OPCODE_BITS)
    }

    /// Decodes this operation from a [`RawOp`].
    pub fn decode_packed(raw: RawOp) -> Option<Self> {
        let opcode = (raw & bitmask(OPCODE_BITS)) as RawOpCode;
        let args = raw >> OPCODE_BITS;
        match opcode {
            Self::MOV_TAG => Self::decode_packed_ab_args(args, Self::Mov),
            Self::MOVI_TAG => Self::decode_packed_ai_args(args, Self::MovI),
            Self::ADD_TAG => Self::decode_packed_abc_args(args, Self::Add),
            Self::SUB_TAG => Self::decode_packed_abc_args(args, Self::Sub),
            Self::MUL_TAG => Self::decode_packed_abc_args(args, Self::Mul),
            Self::LT_TAG => Self::decode_packed_abc_args(args, Self::Lt),
            Self::BNZ_TAG => Self::decode_packed_ai_args(args, Self::Bnz),
            Self::JMP_TAG => Self::decode_packed_ix_args(args, Self::Jmp),
            Self::SETVALUE_TAG => {
                Self::decode_packed_ab_args(args, Self::SetValue)
            }
            Self::SAFEPOINT_TAG => Some(Self::Safepoint),
            Self::RET_TAG => Some(Self::Ret),
            Self::NOP_TAG => Some(Self::Nop),
            _ => None,
        }
    }

    pub const fn opcode(&self) -> RawOpCode {
        self.tag()
    }

    /// The listing mnemonic for this operation.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Self::Mov(..) => "mov",
            Self::MovI(..) => "movi",
            Self::Add(..) => "add",
            Self::Sub(..) => "sub",
            Self::Mul(..) => "mul",
            Self::Lt(..) => "lt",
            Self::Bnz(..) => "bnz",
            Self::Jmp(..) => "jmp",
            Self::SetValue(..) => "setv",
            Self::Safepoint => "safepoint",
            Self::Ret => "ret",
            Self::Nop => "nop",
        }
    }

    /// The relative jump offset of a branch, if this is one.
    pub fn jump_offset(&self) -> Option<InstructionOffset> {
        match *self {
            Self::Bnz(_, offset) => Some(make_instruction_offset(offset)),
            Self::Jmp(offset) => Some(make_extended_instruction_offset(offset)),
            _ => None,
        }
    }

    const fn encode_packed_ab_args(a: LocalAddress, b: LocalAddress) -> RawOp {
        (a as RawOp) | ((b as RawOp) << LOCAL_ADDRESS_BITS)
    }

    fn decode_packed_ab_args(
        args: RawOp,
        f: impl FnOnce(LocalAddress, LocalAddress) -> Self,
    ) -> Option<Self> {
        let a = args & bitmask(LOCAL_ADDRESS_BITS);
        let b = (args >> LOCAL_ADDRESS_BITS) & bitmask(LOCAL_ADDRESS_BITS);
        Some(f(a as LocalAddress, b as LocalAddress))
    }

    const fn encode_packed_abc_args(
        a: LocalAddress,
        b: LocalAddress,
        c: LocalAddress,
    ) -> RawOp {
        (a as RawOp)
            | ((b as RawOp) << LOCAL_ADDRESS_BITS)
            | ((c as RawOp) << (2 * LOCAL_ADDRESS_BITS))
    }

    fn decode_packed_abc_args(
        args: RawOp,
        f: impl FnOnce(LocalAddress, LocalAddress, LocalAddress) -> Self,
    ) -> Option<Self> {
        let a = args & bitmask(LOCAL_ADDRESS_BITS);
        let b = (args >> LOCAL_ADDRESS_BITS) & bitmask(LOCAL_ADDRESS_BITS);
        let c =
            (args >> (2 * LOCAL_ADDRESS_BITS)) & bitmask(LOCAL_ADDRESS_BITS);
        Some(f(a as LocalAddress, b as LocalAddress, c as LocalAddress))
    }

    const fn encode_packed_ai_args(a: LocalAddress, i: Immediate) -> RawOp {
        (a as RawOp) | ((i as RawOp) << LOCAL_ADDRESS_BITS)
    }

    fn decode_packed_ai_args(
        args: RawOp,
        f: impl FnOnce(LocalAddress, Immediate) -> Self,
    ) -> Option<Self> {
        let a = args & bitmask(LOCAL_ADDRESS_BITS);
        let i = (args >> LOCAL_ADDRESS_BITS) & bitmask(IMM_BITS);
        Some(f(a as LocalAddress, i as Immediate))
    }

    const fn encode_packed_ix_args(ix: ExtendedImmediate) -> RawOp {
        ix.bits()
    }

    fn decode_packed_ix_args(
        args: RawOp,
        f: impl FnOnce(ExtendedImmediate) -> Self,
    ) -> Option<Self> {
        let ix = ExtendedImmediate(args & bitmask(IMM_EXT_BITS));
        Some(f(ix))
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.mnemonic();
        match *self {
            Self::Mov(a, b) | Self::SetValue(a, b) => {
                write!(f, "{} {}, {}", mnemonic, a, b)
            }
            Self::MovI(a, i) => {
                write!(f, "{} {}, {}", mnemonic, a, immediate_value(i) as i64)
            }
            Self::Add(a, b, c)
            | Self::Sub(a, b, c)
            | Self::Mul(a, b, c)
            | Self::Lt(a, b, c) => {
                write!(f, "{} {}, {}, {}", mnemonic, a, b, c)
            }
            Self::Bnz(a, offset) => write!(
                f,
                "{} {}, {}",
                mnemonic,
                a,
                make_instruction_offset(offset)
            ),
            Self::Jmp(offset) => write!(
                f,
                "{} {}",
                mnemonic,
                make_extended_instruction_offset(offset)
            ),
            Self::Safepoint | Self::Ret | Self::Nop => f.write_str(mnemonic),
        }
    }
}

pub const fn bitmask(bits: usize) -> RawOp {
    ((1 as RawOp) << bits).wrapping_sub(1)
}

/// The [`Word`] an [`Op::MovI`] immediate loads.
pub fn immediate_value(i: Immediate) -> Word {
    sign_extend_to(i, IMM_BITS)
}

/// Creates an [`InstructionOffset`] from an [`Immediate`] `offset`, where
/// `offset` is an `IMM_BITS`-bit twos complement integer.
pub fn make_instruction_offset(offset: Immediate) -> InstructionOffset {
    let sign_extended: usize = sign_extend_to(offset, IMM_BITS);
    sign_extended as InstructionOffset
}

/// Like [`make_instruction_offset`], for `IMM_EXT_BITS`-bit offsets.
pub fn make_extended_instruction_offset(
    offset: ExtendedImmediate,
) -> InstructionOffset {
    let sign_extended: usize = sign_extend_to(offset.bits(), IMM_EXT_BITS);
    sign_extended as InstructionOffset
}

pub fn sign_extend_to<
    In: num_traits::Unsigned + num_traits::PrimInt + num_traits::AsPrimitive<Out>,
    Out: 'static
        + num_traits::Unsigned
        + num_traits::PrimInt
        + num_traits::WrappingShl,
>(
    value: In,
    bits: usize,
) -> Out {
    let sign_bit = In::one() << (bits - 1);
    if value & sign_bit != In::zero() {
        let extension = Out::max_value().wrapping_shl(bits as u32);
        value.as_() | extension
    } else {
        value.as_()
    }
}
