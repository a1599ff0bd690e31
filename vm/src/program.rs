// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use std::fmt;

use crate::{arch::RawOp, op::Op};

/// A function body as packed words, the form the interpreter runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodedFunction {
    pub body: Vec<RawOp>,
}

impl EncodedFunction {
    pub fn new(body: Vec<RawOp>) -> Self {
        Self { body }
    }

    /// Decodes every word, failing on the first that is not an [`Op`].
    pub fn decode(&self) -> Option<DecodedFunction> {
        self.body
            .iter()
            .map(|raw| Op::decode_packed(*raw))
            .collect::<Option<Vec<Op>>>()
            .map(|body| DecodedFunction { body })
    }
}

/// A function body as [`Op`]s, the form the JIT compiles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedFunction {
    pub body: Vec<Op>,
}

impl DecodedFunction {
    pub fn new(body: Vec<Op>) -> Self {
        Self { body }
    }

    pub fn encode(&self) -> EncodedFunction {
        EncodedFunction {
            body: self.body.iter().map(Op::encode_packed).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl From<Vec<Op>> for DecodedFunction {
    fn from(body: Vec<Op>) -> Self {
        Self { body }
    }
}

/// Renders one op per line; the output parses back with
/// [`crate::listing::parse`].
impl fmt::Display for DecodedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.body {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        op::Op,
        program::{DecodedFunction, EncodedFunction},
    };

    #[test]
    fn encode_then_decode() {
        let function = DecodedFunction::new(vec![
            Op::MovI(0, 1),
            Op::MovI(1, 2),
            Op::Add(0, 0, 1),
            Op::Ret,
        ]);
        assert_eq!(Some(function.clone()), function.encode().decode());
    }

    #[test]
    fn undecodable_word_fails_whole_function() {
        let encoded = EncodedFunction::new(vec![Op::Ret.encode_packed(), 0xff]);
        assert_eq!(None, encoded.decode());
    }
}
