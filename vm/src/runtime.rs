// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use std::{collections::BTreeMap, fmt};

use log::trace;

use crate::arch::Word;

/// Identifies a value handed to the host by [`crate::op::Op::SetValue`].
pub type ValueId = u32;

/// An 8-byte payload that the host reads as either an integer or a float.
/// Only the bits cross the native boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Value(Word);

impl Value {
    pub const fn from_bits(bits: Word) -> Self {
        Self(bits)
    }

    pub const fn from_int(value: i64) -> Self {
        Self(value as Word)
    }

    pub fn from_float(value: f64) -> Self {
        Self(value.to_bits())
    }

    pub const fn bits(self) -> Word {
        self.0
    }

    pub const fn as_int(self) -> i64 {
        self.0 as i64
    }

    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:#x})", self.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_int())
    }
}

/// The host side of a running function: what `setv` and `safepoint` reach.
#[derive(Debug, Default, PartialEq)]
pub struct Runtime {
    values: BTreeMap<ValueId, Value>,
    set_value_calls: u64,
    safepoints: u64,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `id`, replacing any earlier value.
    pub fn set_value(&mut self, id: ValueId, value: Value) {
        trace!("set_value({}, {:?})", id, value);
        self.set_value_calls += 1;
        self.values.insert(id, value);
    }

    pub fn value(&self, id: ValueId) -> Option<Value> {
        self.values.get(&id).copied()
    }

    /// Every stored value in id order.
    pub fn values(&self) -> impl Iterator<Item = (ValueId, Value)> + '_ {
        self.values.iter().map(|(id, value)| (*id, *value))
    }

    pub fn set_value_count(&self) -> u64 {
        self.set_value_calls
    }

    /// Records that the running function reached a GC safepoint.
    pub fn safepoint(&mut self) {
        self.safepoints += 1;
        trace!("safepoint #{}", self.safepoints);
    }

    pub fn safepoint_count(&self) -> u64 {
        self.safepoints
    }
}

#[cfg(test)]
mod tests {
    use super::{Runtime, Value};

    #[test]
    fn values_reinterpret_bits() {
        assert_eq!(-2, Value::from_int(-2).as_int());
        assert_eq!(1.5, Value::from_float(1.5).as_float());
        assert_eq!(u64::MAX, Value::from_int(-1).bits());
    }

    #[test]
    fn set_value_overwrites_and_counts() {
        let mut runtime = Runtime::new();
        runtime.set_value(3, Value::from_int(1));
        runtime.set_value(1, Value::from_int(2));
        runtime.set_value(3, Value::from_int(4));

        assert_eq!(Some(Value::from_int(4)), runtime.value(3));
        assert_eq!(None, runtime.value(2));
        assert_eq!(3, runtime.set_value_count());
        assert_eq!(
            vec![(1, Value::from_int(2)), (3, Value::from_int(4))],
            runtime.values().collect::<Vec<_>>()
        );
    }

    #[test]
    fn safepoints_count() {
        let mut runtime = Runtime::new();
        runtime.safepoint();
        runtime.safepoint();
        assert_eq!(2, runtime.safepoint_count());
    }
}
