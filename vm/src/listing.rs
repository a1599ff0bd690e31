// Copyright (C) 2024 Ethan Uppal. All rights reserved.

//! Text form of a function: one op per line, `#` or `;` comments, and
//! `name:` labels that `bnz` and `jmp` may target instead of a numeric
//! relative offset.
//!
//! ```text
//! movi 0, 0        # cnt = 0
//! movi 1, 100
//! movi 2, 1
//! head:
//! lt 3, 0, 1
//! bnz 3, body
//! jmp done
//! body:
//! add 0, 0, 2
//! jmp head
//! done:
//! ret
//! ```

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    arch::{InstructionOffset, LocalAddress},
    op::{bitmask, ExtendedImmediate, Immediate, Op, IMM_BITS, IMM_EXT_BITS},
    program::DecodedFunction,
};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// 1-based.
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("`{mnemonic}` takes {expected} operands, found {found}")]
    OperandCount {
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("`{0}` is not an integer")]
    InvalidOperand(String),
    #[error("{value} is outside {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
    #[error("`{0}` is not a valid label name")]
    InvalidLabel(String),
    #[error("label `{0}` is defined twice")]
    DuplicateLabel(String),
    #[error("label `{0}` is never defined")]
    UnknownLabel(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parses a listing into a function.
pub fn parse(source: &str) -> ParseResult<DecodedFunction> {
    let mut labels = HashMap::new();
    let mut op_lines = Vec::new();

    for (index, raw_line) in source.lines().enumerate() {
        let line = index + 1;
        let text = strip_comment(raw_line).trim();
        if text.is_empty() {
            continue;
        }
        if let Some(name) = text.strip_suffix(':') {
            let name = name.trim();
            if !is_label_name(name) {
                return Err(ParseError {
                    line,
                    kind: ParseErrorKind::InvalidLabel(name.to_string()),
                });
            }
            if labels.insert(name.to_string(), op_lines.len()).is_some() {
                return Err(ParseError {
                    line,
                    kind: ParseErrorKind::DuplicateLabel(name.to_string()),
                });
            }
        } else {
            op_lines.push((line, text));
        }
    }

    op_lines
        .iter()
        .enumerate()
        .map(|(at, &(line, text))| {
            OpLine { text, at, labels: &labels }
                .parse()
                .map_err(|kind| ParseError { line, kind })
        })
        .collect::<ParseResult<Vec<Op>>>()
        .map(DecodedFunction::new)
}

fn strip_comment(line: &str) -> &str {
    match line.find(|c: char| c == '#' || c == ';') {
        Some(start) => &line[..start],
        None => line,
    }
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One op line, positioned at op index `at`.
struct OpLine<'a> {
    text: &'a str,
    at: usize,
    labels: &'a HashMap<String, usize>,
}

type KindResult<T> = Result<T, ParseErrorKind>;

impl OpLine<'_> {
    fn parse(&self) -> KindResult<Op> {
        let (mnemonic, rest) = match self.text.split_once(char::is_whitespace)
        {
            Some((mnemonic, rest)) => (mnemonic, rest),
            None => (self.text, ""),
        };
        let operands = rest
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|operand| !operand.is_empty())
            .collect::<Vec<_>>();

        let op = match mnemonic.to_ascii_lowercase().as_str() {
            "mov" => {
                let [a, b] = expect_operands::<2>("mov", &operands)?;
                Op::Mov(local(a)?, local(b)?)
            }
            "movi" => {
                let [a, i] = expect_operands::<2>("movi", &operands)?;
                let value = integer_in(
                    i,
                    -(1 << (IMM_BITS - 1)),
                    bitmask(IMM_BITS) as i64,
                )?;
                Op::MovI(local(a)?, value as Immediate)
            }
            "add" => self.three_locals("add", &operands, Op::Add)?,
            "sub" => self.three_locals("sub", &operands, Op::Sub)?,
            "mul" => self.three_locals("mul", &operands, Op::Mul)?,
            "lt" => self.three_locals("lt", &operands, Op::Lt)?,
            "bnz" => {
                let [a, target] = expect_operands::<2>("bnz", &operands)?;
                let offset = self.offset(target, IMM_BITS)?;
                Op::Bnz(local(a)?, offset as Immediate)
            }
            "jmp" => {
                let [target] = expect_operands::<1>("jmp", &operands)?;
                let offset = self.offset(target, IMM_EXT_BITS)?;
                ExtendedImmediate::from_offset(offset as InstructionOffset)
                    .map(Op::Jmp)
                    .ok_or_else(|| {
                        ParseErrorKind::InvalidOperand(target.to_string())
                    })?
            }
            "setv" => {
                let [id, b] = expect_operands::<2>("setv", &operands)?;
                Op::SetValue(local(id)?, local(b)?)
            }
            "safepoint" => {
                expect_operands::<0>("safepoint", &operands)?;
                Op::Safepoint
            }
            "ret" => {
                expect_operands::<0>("ret", &operands)?;
                Op::Ret
            }
            "nop" => {
                expect_operands::<0>("nop", &operands)?;
                Op::Nop
            }
            _ => {
                return Err(ParseErrorKind::UnknownMnemonic(
                    mnemonic.to_string(),
                ))
            }
        };
        Ok(op)
    }

    fn three_locals(
        &self,
        mnemonic: &'static str,
        operands: &[&str],
        f: impl FnOnce(LocalAddress, LocalAddress, LocalAddress) -> Op,
    ) -> KindResult<Op> {
        let [a, b, c] = expect_operands::<3>(mnemonic, operands)?;
        Ok(f(local(a)?, local(b)?, local(c)?))
    }

    /// A relative offset that fits in `bits` two's complement bits, from
    /// either a label or a literal.
    fn offset(&self, target: &str, bits: usize) -> KindResult<i64> {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if is_label_name(target) {
            let destination = *self
                .labels
                .get(target)
                .ok_or_else(|| ParseErrorKind::UnknownLabel(target.into()))?;
            let offset = destination as InstructionOffset
                - self.at as InstructionOffset;
            in_range(offset as i64, min, max)
        } else {
            integer_in(target, min, max)
        }
    }
}

fn expect_operands<'a, const N: usize>(
    mnemonic: &'static str,
    operands: &[&'a str],
) -> KindResult<[&'a str; N]> {
    <[&str; N]>::try_from(operands).map_err(|_| ParseErrorKind::OperandCount {
        mnemonic,
        expected: N,
        found: operands.len(),
    })
}

fn local(operand: &str) -> KindResult<LocalAddress> {
    integer_in(operand, 0, LocalAddress::MAX as i64)
        .map(|value| value as LocalAddress)
}

fn integer_in(operand: &str, min: i64, max: i64) -> KindResult<i64> {
    in_range(integer(operand)?, min, max)
}

fn in_range(value: i64, min: i64, max: i64) -> KindResult<i64> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ParseErrorKind::OutOfRange { value, min, max })
    }
}

/// An optional leading `-`, then decimal digits or `0x` and hex digits.
fn integer(operand: &str) -> KindResult<i64> {
    let invalid = || ParseErrorKind::InvalidOperand(operand.to_string());

    let (negative, unsigned) = match operand.strip_prefix('-') {
        Some(unsigned) => (true, unsigned),
        None => (false, operand),
    };
    let (radix, digits) = match unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        Some(hex) => (16, hex),
        None => (10, unsigned),
    };
    // `from_str_radix` would also take a sign of its own
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }

    let magnitude = u64::from_str_radix(digits, radix).map_err(|_| invalid())?;
    if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    }
    .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use crate::{
        listing::{parse, ParseError, ParseErrorKind},
        op::{ExtendedImmediate, Op},
        program::DecodedFunction,
    };

    fn jmp(offset: isize) -> Op {
        Op::Jmp(ExtendedImmediate::from_offset(offset).expect("offset fits"))
    }

    const COUNT_TO_HUNDRED: &str = "
        # while (cnt < 100) cnt := cnt + 1
        movi 0, 0
        movi 1, 100
        MOVI 2 1        ; case and commas are optional
        head:
        lt 3, 0, 1
        bnz 3, body
        jmp done
        body:
        add 0, 0, 2
        setv 7, 0
        safepoint
        jmp head
        done:
        ret
    ";

    #[test]
    fn parses_labels_into_relative_offsets() {
        let function = parse(COUNT_TO_HUNDRED).expect("listing is valid");
        assert_eq!(
            vec![
                Op::MovI(0, 0),
                Op::MovI(1, 100),
                Op::MovI(2, 1),
                Op::Lt(3, 0, 1),
                Op::Bnz(3, 2),
                jmp(5),
                Op::Add(0, 0, 2),
                Op::SetValue(7, 0),
                Op::Safepoint,
                jmp(-6),
                Op::Ret,
            ],
            function.body
        );
    }

    #[test]
    fn display_parses_back() {
        let function = parse(COUNT_TO_HUNDRED).expect("listing is valid");
        let rendered = function.to_string();
        assert_eq!(function, parse(&rendered).expect("rendering is valid"));
    }

    #[test]
    fn numeric_operands() {
        assert_eq!(
            DecodedFunction::new(vec![
                Op::MovI(0, 0xffff),
                Op::MovI(1, 0x7fff),
                Op::Bnz(0, 0xffff),
                Op::Ret
            ]),
            parse("movi 0, -1\nmovi 1, 0x7fff\nbnz 0, -1\nret")
                .expect("listing is valid")
        );
    }

    #[test]
    fn integers_take_one_leading_minus() {
        assert_eq!(
            DecodedFunction::new(vec![
                Op::MovI(0, 0x8000),
                Op::MovI(1, 0xff),
                Op::MovI(2, 0xfff0),
                Op::Ret
            ]),
            parse("movi 0, -32768\nmovi 1, 0XfF\nmovi 2, -0x10\nret")
                .expect("listing is valid")
        );
        for operand in ["--5", "+5", "0x-5", "-0x-5", "-", "0x", "- 5"] {
            assert!(
                matches!(
                    parse(&format!("movi 0, {}", operand)),
                    Err(ParseError {
                        line: 1,
                        kind: ParseErrorKind::InvalidOperand(_)
                            | ParseErrorKind::OperandCount { .. }
                    })
                ),
                "`{}` should be rejected",
                operand
            );
        }
    }

    #[test]
    fn huge_integers_are_errors() {
        for operand in [
            "--9223372036854775808",
            "-0x-8000000000000000",
            "18446744073709551616",
            "9223372036854775808",
        ] {
            assert_eq!(
                Err(ParseError {
                    line: 1,
                    kind: ParseErrorKind::InvalidOperand(operand.into())
                }),
                parse(&format!("movi 0, {}", operand)),
            );
        }
        assert_eq!(
            Err(ParseError {
                line: 1,
                kind: ParseErrorKind::OutOfRange {
                    value: i64::MIN,
                    min: -32768,
                    max: 65535
                }
            }),
            parse("movi 0, -9223372036854775808")
        );
        assert_eq!(
            Err(ParseError {
                line: 1,
                kind: ParseErrorKind::OutOfRange {
                    value: 1 << 23,
                    min: -(1 << 23),
                    max: (1 << 23) - 1
                }
            }),
            parse("jmp 0x800000")
        );
    }

    #[test]
    fn reports_line_numbers() {
        assert_eq!(
            Err(ParseError {
                line: 3,
                kind: ParseErrorKind::UnknownMnemonic("frob".into())
            }),
            parse("nop\n\nfrob 1\n")
        );
    }

    #[test]
    fn rejects_bad_operands() {
        assert_eq!(
            Err(ParseError {
                line: 1,
                kind: ParseErrorKind::OperandCount {
                    mnemonic: "add",
                    expected: 3,
                    found: 2
                }
            }),
            parse("add 1, 2")
        );
        assert_eq!(
            Err(ParseError {
                line: 1,
                kind: ParseErrorKind::OutOfRange {
                    value: 256,
                    min: 0,
                    max: 255
                }
            }),
            parse("mov 256, 0")
        );
        assert_eq!(
            Err(ParseError {
                line: 1,
                kind: ParseErrorKind::InvalidOperand("1x".into())
            }),
            parse("mov 1x, 0")
        );
    }

    #[test]
    fn rejects_bad_labels() {
        assert_eq!(
            Err(ParseError {
                line: 2,
                kind: ParseErrorKind::DuplicateLabel("a".into())
            }),
            parse("a:\na:\nret")
        );
        assert_eq!(
            Err(ParseError {
                line: 1,
                kind: ParseErrorKind::UnknownLabel("nowhere".into())
            }),
            parse("jmp nowhere")
        );
        assert_eq!(
            Err(ParseError {
                line: 1,
                kind: ParseErrorKind::InvalidLabel("1st".into())
            }),
            parse("1st:")
        );
    }
}
