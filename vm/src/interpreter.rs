// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use log::{debug, trace};
use thiserror::Error;

use crate::{
    arch::{
        InstructionAddress, InstructionOffset, LocalAddress, RawOp, Word,
        ARGUMENT_LOCALS, LOCALS_COUNT, RETURN_LOCAL,
    },
    op::{immediate_value, Op},
    program::EncodedFunction,
    runtime::{Runtime, Value, ValueId},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("op {from} transfers control to {target}, outside the function")]
    InvalidInstructionAddress {
        from: InstructionAddress,
        target: InstructionOffset,
    },
    #[error("word {raw:#010x} at {at} is not an op")]
    UndecodableOp { at: InstructionAddress, raw: RawOp },
    #[error("{given} arguments given but at most {max} fit")]
    TooManyArguments { given: usize, max: usize },
    #[error("stopped after {0} steps")]
    StepLimitExceeded(u64),
}

pub type VmResult<T> = Result<T, VmError>;

/// Runs an [`EncodedFunction`] one packed op at a time.
pub struct Interpreter {
    code: Vec<RawOp>,
    locals: [Word; LOCALS_COUNT],
    ip: InstructionAddress,
    steps: u64,
    step_limit: Option<u64>,
}

impl Interpreter {
    pub fn new(function: &EncodedFunction) -> Self {
        Self {
            code: function.body.clone(),
            locals: [0; LOCALS_COUNT],
            ip: 0,
            steps: 0,
            step_limit: None,
        }
    }

    /// Copies `args` into the argument locals.
    pub fn with_arguments(mut self, args: &[Word]) -> VmResult<Self> {
        if args.len() > ARGUMENT_LOCALS.len() {
            return Err(VmError::TooManyArguments {
                given: args.len(),
                max: ARGUMENT_LOCALS.len(),
            });
        }
        self.locals[ARGUMENT_LOCALS.start..ARGUMENT_LOCALS.start + args.len()]
            .copy_from_slice(args);
        Ok(self)
    }

    /// Fails [`Interpreter::run`] once `limit` ops have executed.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Runs until the function returns, yielding local 0.
    pub fn run(&mut self, runtime: &mut Runtime) -> VmResult<Word> {
        loop {
            if let Some(result) = self.step(runtime)? {
                debug!("returned {:#x} after {} steps", result, self.steps);
                return Ok(result);
            }
        }
    }

    /// Executes one op, yielding the result if it was a `ret`.
    pub fn step(&mut self, runtime: &mut Runtime) -> VmResult<Option<Word>> {
        if let Some(limit) = self.step_limit {
            if self.steps >= limit {
                return Err(VmError::StepLimitExceeded(limit));
            }
        }
        self.steps += 1;

        let op = self.decode_op()?;
        trace!("{:>4}: {}", self.ip, op);

        match op {
            Op::Mov(to, from) => {
                self.write_local(to, self.read_local(from));
            }
            Op::MovI(to, constant) => {
                self.write_local(to, immediate_value(constant));
            }
            Op::Add(to, a, b) => {
                let sum = self.read_local(a).wrapping_add(self.read_local(b));
                self.write_local(to, sum);
            }
            Op::Sub(to, a, b) => {
                let difference =
                    self.read_local(a).wrapping_sub(self.read_local(b));
                self.write_local(to, difference);
            }
            Op::Mul(to, a, b) => {
                let product =
                    self.read_local(a).wrapping_mul(self.read_local(b));
                self.write_local(to, product);
            }
            Op::Lt(to, a, b) => {
                let less =
                    (self.read_local(a) as i64) < (self.read_local(b) as i64);
                self.write_local(to, less as Word);
            }
            Op::Bnz(a, _) => {
                if self.read_local(a) != 0 {
                    return self.jump_by(op).map(|()| None);
                }
            }
            Op::Jmp(_) => return self.jump_by(op).map(|()| None),
            Op::SetValue(id, from) => {
                runtime.set_value(
                    id as ValueId,
                    Value::from_bits(self.read_local(from)),
                );
            }
            Op::Safepoint => runtime.safepoint(),
            Op::Ret => return Ok(Some(self.locals[RETURN_LOCAL])),
            Op::Nop => {}
        }

        self.jump_to(self.ip as InstructionOffset + 1).map(|()| None)
    }

    /// Number of ops executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn locals(&self) -> &[Word; LOCALS_COUNT] {
        &self.locals
    }

    fn decode_op(&self) -> VmResult<Op> {
        let raw = *self.code.get(self.ip).ok_or(
            VmError::InvalidInstructionAddress {
                from: self.ip,
                target: self.ip as InstructionOffset,
            },
        )?;
        Op::decode_packed(raw)
            .ok_or(VmError::UndecodableOp { at: self.ip, raw })
    }

    fn jump_by(&mut self, op: Op) -> VmResult<()> {
        let offset = op.jump_offset().unwrap_or(1);
        self.jump_to(self.ip as InstructionOffset + offset)
    }

    fn jump_to(&mut self, target: InstructionOffset) -> VmResult<()> {
        if target < 0 || target as usize >= self.code.len() {
            Err(VmError::InvalidInstructionAddress {
                from: self.ip,
                target,
            })
        } else {
            self.ip = target as InstructionAddress;
            Ok(())
        }
    }

    fn read_local(&self, address: LocalAddress) -> Word {
        self.locals[address as usize]
    }

    fn write_local(&mut self, address: LocalAddress, value: Word) {
        self.locals[address as usize] = value;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        interpreter::{Interpreter, VmError},
        op::{ExtendedImmediate, Immediate, Op},
        program::{DecodedFunction, EncodedFunction},
        runtime::{Runtime, Value},
    };

    fn jmp(offset: isize) -> Op {
        Op::Jmp(ExtendedImmediate::from_offset(offset).expect("offset fits"))
    }

    fn run(body: Vec<Op>) -> Result<(u64, Runtime), VmError> {
        let mut runtime = Runtime::new();
        let result = Interpreter::new(&DecodedFunction::new(body).encode())
            .run(&mut runtime)?;
        Ok((result, runtime))
    }

    #[test]
    fn basic_program() {
        let main = DecodedFunction::new(vec![
            Op::MovI(0, 1),
            Op::MovI(1, 2),
            Op::Add(2, 0, 1),
            Op::Ret,
        ]);

        let mut interpreter = Interpreter::new(&main.encode());
        let mut runtime = Runtime::new();

        for _ in 0..3 {
            assert_eq!(
                None,
                interpreter
                    .step(&mut runtime)
                    .expect("program should run without errors")
            );
        }

        assert_eq!(1, interpreter.locals()[0]);
        assert_eq!(2, interpreter.locals()[1]);
        assert_eq!(3, interpreter.locals()[2]);

        assert_eq!(
            Some(1),
            interpreter
                .step(&mut runtime)
                .expect("program should run without errors")
        );
    }

    #[test]
    fn basic_loop() {
        // computes the sum of the first 10 natural numbers
        let (result, _) = run(vec![
            // init
            Op::MovI(1, 10), // i = 10
            Op::MovI(0, 0),  // sum = 0
            Op::MovI(3, 1),  // one = 1
            // loop
            Op::Add(0, 0, 1),                             // sum += i
            Op::Sub(1, 1, 3),                             // i -= one
            Op::Bnz(1, (0 as Immediate).wrapping_sub(2)), // if i != 0, loop
            Op::Ret,
        ])
        .expect("program should run without errors");

        assert_eq!(55, result);
    }

    #[test]
    fn counts_to_a_hundred_with_callbacks() {
        // while (cnt < 100) { cnt := cnt + 1; safepoint }
        let (result, runtime) = run(vec![
            Op::MovI(0, 0),   // cnt = 0
            Op::MovI(1, 100), // bound = 100
            Op::MovI(2, 1),   // one = 1
            Op::Lt(3, 0, 1),  // head: c = cnt < bound
            Op::Bnz(3, 2),    // enter body
            jmp(5),           // exit
            Op::Add(0, 0, 2), // cnt += one
            Op::SetValue(7, 0),
            Op::Safepoint,
            jmp(-6),          // back to head
            Op::Ret,
        ])
        .expect("program should run without errors");

        assert_eq!(100, result);
        assert_eq!(Some(Value::from_int(100)), runtime.value(7));
        assert_eq!(100, runtime.set_value_count());
        assert_eq!(100, runtime.safepoint_count());
    }

    #[test]
    fn signed_comparison() {
        let (result, _) = run(vec![
            Op::MovI(1, 0xffff), // -1
            Op::MovI(2, 1),
            Op::Lt(0, 1, 2),
            Op::Ret,
        ])
        .expect("program should run without errors");
        assert_eq!(1, result);
    }

    #[test]
    fn arguments_land_in_first_locals() {
        let function =
            DecodedFunction::new(vec![Op::Mul(0, 0, 1), Op::Ret]).encode();
        let result = Interpreter::new(&function)
            .with_arguments(&[6, 7])
            .expect("two arguments fit")
            .run(&mut Runtime::new())
            .expect("program should run without errors");
        assert_eq!(42, result);

        assert!(matches!(
            Interpreter::new(&function).with_arguments(&[0; 9]),
            Err(VmError::TooManyArguments { given: 9, max: 8 })
        ));
    }

    #[test]
    fn falling_off_the_end_is_an_error() {
        assert_eq!(
            Err(VmError::InvalidInstructionAddress { from: 0, target: 1 }),
            run(vec![Op::Nop]).map(|(result, _)| result)
        );
    }

    #[test]
    fn jumping_outside_is_an_error() {
        assert_eq!(
            Err(VmError::InvalidInstructionAddress {
                from: 0,
                target: -1
            }),
            run(vec![jmp(-1), Op::Ret]).map(|(result, _)| result)
        );
    }

    #[test]
    fn undecodable_word_is_reported() {
        let function = EncodedFunction::new(vec![0xff]);
        assert_eq!(
            Err(VmError::UndecodableOp { at: 0, raw: 0xff }),
            Interpreter::new(&function).run(&mut Runtime::new())
        );
    }

    #[test]
    fn step_limit_stops_infinite_loops() {
        let function = DecodedFunction::new(vec![jmp(0)]).encode();
        assert_eq!(
            Err(VmError::StepLimitExceeded(1000)),
            Interpreter::new(&function)
                .with_step_limit(1000)
                .run(&mut Runtime::new())
        );
    }
}
